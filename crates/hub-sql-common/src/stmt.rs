//! Backend-agnostic SQL statement builder.
//!
//! Statements are written with named `:placeholder` syntax so the same SQL
//! string works whether the underlying driver wants `$1`-style (Postgres)
//! or `?`-style (rusqlite, via positional rewriting) placeholders; see
//! `Statement::to_sql`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hub_common::database::Error;
use once_cell::sync::Lazy;

use crate::database::DatabaseExecutor;
use crate::value::Value;

/// A single returned column.
pub type Column = Value;

/// Expected response shape for a given SQL statement.
#[derive(Debug, Clone, Copy, Default)]
pub enum ExpectedSqlResponse {
    /// A single row.
    SingleRow,
    /// All rows that match a query.
    #[default]
    ManyRows,
    /// How many rows were affected.
    AffectedRows,
    /// The first column of the first row.
    Pluck,
    /// A batch of unparameterized statements.
    Batch,
}

/// A value (or set of values, for `IN (:x)` expansion) bound to a
/// placeholder.
#[derive(Debug, Clone)]
pub enum PlaceholderValue {
    Value(Value),
    Set(Vec<Value>),
}

impl From<Value> for PlaceholderValue {
    fn from(value: Value) -> Self {
        PlaceholderValue::Value(value)
    }
}

impl From<Vec<Value>> for PlaceholderValue {
    fn from(value: Vec<Value>) -> Self {
        PlaceholderValue::Set(value)
    }
}

/// One fragment of a parsed SQL statement.
#[derive(Debug, Clone)]
pub enum SqlPart {
    /// Raw SQL text.
    Raw(Arc<str>),
    /// A `:name` placeholder and its (possibly still unbound) value.
    Placeholder(Arc<str>, Option<PlaceholderValue>),
}

/// Error parsing a raw SQL string into [`SqlPart`]s.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SqlParseError {
    #[error("Unterminated string literal")]
    UnterminatedStringLiteral,
    #[error("Invalid placeholder name")]
    InvalidPlaceholder,
}

/// Rudimentary SQL tokenizer. Does not validate the SQL; it only extracts
/// placeholders so the statement stays database-agnostic.
pub fn split_sql_parts(input: &str) -> Result<Vec<SqlPart>, SqlParseError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '\'' | '"' => {
                let quote = c;
                current.push(chars.next().expect("peeked"));

                let mut closed = false;
                while let Some(&next) = chars.peek() {
                    current.push(chars.next().expect("peeked"));

                    if next == quote {
                        if chars.peek() == Some(&quote) {
                            current.push(chars.next().expect("peeked"));
                        } else {
                            closed = true;
                            break;
                        }
                    }
                }

                if !closed {
                    return Err(SqlParseError::UnterminatedStringLiteral);
                }
            }
            ':' => {
                if !current.is_empty() {
                    parts.push(SqlPart::Raw(current.clone().into()));
                    current.clear();
                }

                chars.next();
                let mut name = String::new();

                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(chars.next().expect("peeked"));
                    } else {
                        break;
                    }
                }

                if name.is_empty() {
                    return Err(SqlParseError::InvalidPlaceholder);
                }

                parts.push(SqlPart::Placeholder(name.into(), None));
            }
            _ => {
                current.push(chars.next().expect("peeked"));
            }
        }
    }

    if !current.is_empty() {
        parts.push(SqlPart::Raw(current.into()));
    }

    Ok(parts)
}

type Cache = HashMap<String, (Vec<SqlPart>, Option<Arc<str>>)>;

/// A parsed, bindable SQL statement.
#[derive(Debug, Default)]
pub struct Statement {
    cache: Arc<RwLock<Cache>>,
    cached_sql: Option<Arc<str>>,
    sql: Option<String>,
    pub parts: Vec<SqlPart>,
    pub expected_response: ExpectedSqlResponse,
}

impl Statement {
    fn new(sql: &str, cache: Arc<RwLock<Cache>>) -> Result<Self, SqlParseError> {
        let parsed = cache
            .read()
            .map(|cache| cache.get(sql).cloned())
            .ok()
            .flatten();

        if let Some((parts, cached_sql)) = parsed {
            Ok(Self {
                parts,
                cached_sql,
                sql: None,
                cache,
                ..Default::default()
            })
        } else {
            let parts = split_sql_parts(sql)?;

            if let Ok(mut cache) = cache.write() {
                cache.insert(sql.to_owned(), (parts.clone(), None));
            } else {
                tracing::warn!("Failed to acquire write lock for SQL statement cache");
            }

            Ok(Self {
                parts,
                sql: Some(sql.to_owned()),
                cache,
                ..Default::default()
            })
        }
    }

    /// Converts this statement into a `$1..$n`-placeholdered SQL string and
    /// the ordered values to bind. Callers targeting a `?`-placeholder
    /// driver rewrite the returned string themselves (see
    /// `hub-sqlite::process_query`).
    pub fn to_sql(self) -> Result<(String, Vec<Value>), Error> {
        if let Some(cached_sql) = self.cached_sql {
            let sql = cached_sql.to_string();
            let values = self
                .parts
                .into_iter()
                .map(|x| match x {
                    SqlPart::Placeholder(name, value) => {
                        match value.ok_or(Error::MissingPlaceholder(name.to_string()))? {
                            PlaceholderValue::Value(value) => Ok(vec![value]),
                            PlaceholderValue::Set(values) => Ok(values),
                        }
                    }
                    SqlPart::Raw(_) => Ok(vec![]),
                })
                .collect::<Result<Vec<_>, Error>>()?
                .into_iter()
                .flatten()
                .collect::<Vec<_>>();
            return Ok((sql, values));
        }

        let mut placeholder_values = Vec::new();
        let mut can_be_cached = true;
        let sql = self
            .parts
            .into_iter()
            .map(|x| match x {
                SqlPart::Placeholder(name, value) => {
                    match value.ok_or(Error::MissingPlaceholder(name.to_string()))? {
                        PlaceholderValue::Value(value) => {
                            placeholder_values.push(value);
                            Ok::<_, Error>(format!("${}", placeholder_values.len()))
                        }
                        PlaceholderValue::Set(mut values) => {
                            can_be_cached = false;
                            let start_size = placeholder_values.len();
                            placeholder_values.append(&mut values);
                            let placeholders = (start_size + 1..=placeholder_values.len())
                                .map(|i| format!("${i}"))
                                .collect::<Vec<_>>()
                                .join(", ");
                            Ok(placeholders)
                        }
                    }
                }
                SqlPart::Raw(raw) => Ok(raw.trim().to_string()),
            })
            .collect::<Result<Vec<String>, _>>()?
            .join(" ");

        if can_be_cached {
            if let Some(original_sql) = self.sql {
                let _ = self.cache.write().map(|mut cache| {
                    if let Some((_, cached_sql)) = cache.get_mut(&original_sql) {
                        *cached_sql = Some(sql.clone().into());
                    }
                });
            }
        }

        Ok((sql, placeholder_values))
    }

    /// Binds a single placeholder.
    #[inline]
    pub fn bind<C, V>(mut self, name: C, value: V) -> Self
    where
        C: ToString,
        V: Into<Value>,
    {
        let name = name.to_string();
        let value: PlaceholderValue = value.into().into();

        for part in self.parts.iter_mut() {
            if let SqlPart::Placeholder(part_name, part_value) = part {
                if **part_name == *name.as_str() {
                    *part_value = Some(value.clone());
                }
            }
        }

        self
    }

    /// Binds a single placeholder to many values, expanding `:foo` into
    /// `$n, $n+1, ...` for an `IN (:foo)` clause.
    #[inline]
    pub fn bind_vec<C, V>(mut self, name: C, value: Vec<V>) -> Self
    where
        C: ToString,
        V: Into<Value>,
    {
        let name = name.to_string();
        let value: PlaceholderValue = value
            .into_iter()
            .map(|x| x.into())
            .collect::<Vec<Value>>()
            .into();

        for part in self.parts.iter_mut() {
            if let SqlPart::Placeholder(part_name, part_value) = part {
                if **part_name == *name.as_str() {
                    *part_value = Some(value.clone());
                }
            }
        }

        self
    }

    pub async fn pluck<C>(self, conn: &C) -> Result<Option<Value>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.pluck(self).await
    }

    pub async fn batch<C>(self, conn: &C) -> Result<(), Error>
    where
        C: DatabaseExecutor,
    {
        conn.batch(self).await
    }

    pub async fn execute<C>(self, conn: &C) -> Result<usize, Error>
    where
        C: DatabaseExecutor,
    {
        conn.execute(self).await
    }

    pub async fn fetch_one<C>(self, conn: &C) -> Result<Option<Vec<Column>>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.fetch_one(self).await
    }

    pub async fn fetch_all<C>(self, conn: &C) -> Result<Vec<Vec<Column>>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.fetch_all(self).await
    }
}

/// Parses (or fetches from a process-wide cache) a new bindable statement.
#[inline(always)]
pub fn query(sql: &str) -> Result<Statement, Error> {
    static CACHE: Lazy<Arc<RwLock<Cache>>> = Lazy::new(|| Arc::new(RwLock::new(HashMap::new())));
    Statement::new(sql, CACHE.clone()).map_err(|e| Error::Database(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_named_placeholders() {
        let stmt = query("SELECT * FROM topic WHERE id = :id AND url = :url")
            .expect("parses")
            .bind("id", "abc")
            .bind("url", "https://example.com/feed");

        let (sql, values) = stmt.to_sql().expect("renders");
        assert_eq!(sql, "SELECT * FROM topic WHERE id = $1 AND url = $2");
        assert_eq!(values, vec![Value::Text("abc".into()), Value::Text("https://example.com/feed".into())]);
    }

    #[test]
    fn expands_bound_vec() {
        let stmt = query("SELECT * FROM topic WHERE id IN (:ids)")
            .expect("parses")
            .bind_vec("ids", vec!["a", "b", "c"]);

        let (sql, values) = stmt.to_sql().expect("renders");
        assert_eq!(sql, "SELECT * FROM topic WHERE id IN ($1, $2, $3)");
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn missing_placeholder_is_an_error() {
        let stmt = query("SELECT * FROM topic WHERE id = :id").expect("parses");
        assert!(stmt.to_sql().is_err());
    }
}
