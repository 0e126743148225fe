//! Statement execution against a live `tokio_postgres::Client`.

use futures_util::{pin_mut, TryStreamExt};
use hub_common::database::Error;
use hub_sql_common::stmt::{Column, Statement};
use tokio_postgres::Client;

use crate::error::to_postgres_error;
use crate::value::PgValue;

pub(crate) async fn pg_batch(conn: &Client, statement: Statement) -> Result<(), Error> {
    let (sql, _values) = statement.to_sql()?;
    conn.batch_execute(&sql).await.map_err(to_postgres_error)
}

pub(crate) async fn pg_execute(conn: &Client, statement: Statement) -> Result<usize, Error> {
    let (sql, values) = statement.to_sql()?;
    let prepared = conn.prepare(&sql).await.map_err(to_postgres_error)?;
    let params = values.iter().map(PgValue::from).collect::<Vec<_>>();

    conn.execute_raw(&prepared, params)
        .await
        .map(|n| n as usize)
        .map_err(to_postgres_error)
}

pub(crate) async fn pg_fetch_one(
    conn: &Client,
    statement: Statement,
) -> Result<Option<Vec<Column>>, Error> {
    let (sql, values) = statement.to_sql()?;
    let prepared = conn.prepare(&sql).await.map_err(to_postgres_error)?;
    let params = values.iter().map(PgValue::from).collect::<Vec<_>>();

    let stream = conn
        .query_raw(&prepared, params)
        .await
        .map_err(to_postgres_error)?;
    pin_mut!(stream);

    stream
        .try_next()
        .await
        .map_err(to_postgres_error)?
        .map(|row| {
            (0..row.len())
                .map(|i| row.try_get::<_, PgValue>(i).map(Column::from))
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_postgres_error)
        })
        .transpose()
}

pub(crate) async fn pg_fetch_all(
    conn: &Client,
    statement: Statement,
) -> Result<Vec<Vec<Column>>, Error> {
    let (sql, values) = statement.to_sql()?;
    let prepared = conn.prepare(&sql).await.map_err(to_postgres_error)?;
    let params = values.iter().map(PgValue::from).collect::<Vec<_>>();

    let stream = conn
        .query_raw(&prepared, params)
        .await
        .map_err(to_postgres_error)?;
    pin_mut!(stream);

    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await.map_err(to_postgres_error)? {
        rows.push(
            (0..row.len())
                .map(|i| row.try_get::<_, PgValue>(i).map(Column::from))
                .collect::<Result<Vec<_>, _>>()
                .map_err(to_postgres_error)?,
        );
    }
    Ok(rows)
}

pub(crate) async fn pg_pluck(
    conn: &Client,
    statement: Statement,
) -> Result<Option<Column>, Error> {
    let (sql, values) = statement.to_sql()?;
    let prepared = conn.prepare(&sql).await.map_err(to_postgres_error)?;
    let params = values.iter().map(PgValue::from).collect::<Vec<_>>();

    let stream = conn
        .query_raw(&prepared, params)
        .await
        .map_err(to_postgres_error)?;
    pin_mut!(stream);

    stream
        .try_next()
        .await
        .map_err(to_postgres_error)?
        .map(|row| row.try_get::<_, PgValue>(0).map(Column::from))
        .transpose()
        .map_err(to_postgres_error)
}
