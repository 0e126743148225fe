//! `tokio_postgres` `FromSql`/`ToSql` bridge for [`Value`]. Every hub
//! column is stored as `TEXT`, `BIGINT` or `BYTEA` (see
//! `migrations/1.0.0/up.sql`), so only those wire types need handling.

use hub_sql_common::value::Value;
use tokio_postgres::types::{self, FromSql, ToSql};

#[derive(Debug)]
pub enum PgValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl<'a> From<&'a Value> for PgValue<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Blob(b) => PgValue::Blob(b),
            Value::Text(text) => PgValue::Text(text.as_str()),
            Value::Null => PgValue::Null,
            Value::Integer(i) => PgValue::Integer(*i),
            Value::Real(r) => PgValue::Real(*r),
        }
    }
}

impl From<PgValue<'_>> for Value {
    fn from(value: PgValue<'_>) -> Self {
        match value {
            PgValue::Blob(b) => Value::Blob(b.to_owned()),
            PgValue::Text(s) => Value::Text(s.to_owned()),
            PgValue::Null => Value::Null,
            PgValue::Integer(i) => Value::Integer(i),
            PgValue::Real(r) => Value::Real(r),
        }
    }
}

impl<'a> FromSql<'a> for PgValue<'a> {
    fn accepts(_ty: &types::Type) -> bool {
        true
    }

    fn from_sql(
        ty: &types::Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(match *ty {
            types::Type::VARCHAR | types::Type::TEXT | types::Type::BPCHAR | types::Type::NAME => {
                PgValue::Text(<&str as FromSql>::from_sql(ty, raw)?)
            }
            types::Type::BOOL => PgValue::Integer(if <bool as FromSql>::from_sql(ty, raw)? {
                1
            } else {
                0
            }),
            types::Type::INT2 => PgValue::Integer(<i16 as FromSql>::from_sql(ty, raw)? as i64),
            types::Type::INT4 => PgValue::Integer(<i32 as FromSql>::from_sql(ty, raw)? as i64),
            types::Type::INT8 => PgValue::Integer(<i64 as FromSql>::from_sql(ty, raw)?),
            types::Type::BYTEA => PgValue::Blob(<&[u8] as FromSql>::from_sql(ty, raw)?),
            _ => {
                return Err(format!("unsupported postgres column type {ty:?}").into());
            }
        })
    }

    fn from_sql_null(_ty: &types::Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgValue::Null)
    }
}

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &types::Type,
        out: &mut types::private::BytesMut,
    ) -> Result<types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Blob(b) => b.to_sql(ty, out),
            PgValue::Text(s) => s.to_sql(ty, out),
            PgValue::Null => Ok(types::IsNull::Yes),
            PgValue::Real(r) => r.to_sql(ty, out),
            PgValue::Integer(i) => match *ty {
                types::Type::BOOL => (*i != 0).to_sql(ty, out),
                types::Type::INT2 => (*i as i16).to_sql(ty, out),
                types::Type::INT4 => (*i as i32).to_sql(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
        }
    }

    fn accepts(_ty: &types::Type) -> bool {
        true
    }

    fn encode_format(&self, ty: &types::Type) -> types::Format {
        match self {
            PgValue::Blob(b) => b.encode_format(ty),
            PgValue::Text(s) => s.encode_format(ty),
            PgValue::Null => types::Format::Text,
            PgValue::Real(r) => r.encode_format(ty),
            PgValue::Integer(i) => i.encode_format(ty),
        }
    }

    fn to_sql_checked(
        &self,
        ty: &types::Type,
        out: &mut types::private::BytesMut,
    ) -> Result<types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Blob(b) => b.to_sql_checked(ty, out),
            PgValue::Text(s) => s.to_sql_checked(ty, out),
            PgValue::Null => Ok(types::IsNull::Yes),
            PgValue::Real(r) => r.to_sql_checked(ty, out),
            PgValue::Integer(i) => match *ty {
                types::Type::BOOL => (*i != 0).to_sql_checked(ty, out),
                types::Type::INT2 => (*i as i16).to_sql_checked(ty, out),
                types::Type::INT4 => (*i as i32).to_sql_checked(ty, out),
                _ => i.to_sql_checked(ty, out),
            },
        }
    }
}
