// azmigrate/src/enumerate/postgres.rs
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{ConnectOptions, Connection, PgConnection, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::{ResourceEnumerator, UnitFilter};
use crate::config::ResourceEndpoint;
use crate::credentials::{CredentialKind, CredentialProvider};
use crate::errors::{MigrationError, Result};
use crate::model::MigrationUnit;
use crate::utils::quote_ident;

/// Opens a connection to `database` on a PostgreSQL endpoint using its resolved password.
pub(crate) async fn connect(
    credentials: &CredentialProvider,
    endpoint: &ResourceEndpoint,
    database: &str,
) -> Result<PgConnection> {
    let pg = endpoint.postgres()?;
    let password = credentials
        .resolve(endpoint, &CredentialKind::DatabasePassword)
        .await?;
    let ssl_mode = PgSslMode::from_str(&pg.ssl_mode).map_err(|_| {
        MigrationError::Configuration(format!("invalid ssl_mode '{}'", pg.ssl_mode))
    })?;
    let options = PgConnectOptions::new()
        .host(&pg.host)
        .port(pg.port)
        .username(&pg.username)
        .password(password.secret.expose())
        .database(database)
        .ssl_mode(ssl_mode)
        .disable_statement_logging();
    Ok(options.connect().await?)
}

/// Lists base tables outside the system schemas, ordered by schema then name.
pub(crate) async fn list_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_schema, table_name FROM information_schema.tables
         WHERE table_type = 'BASE TABLE'
           AND table_schema NOT IN ('pg_catalog', 'information_schema')
           AND table_schema NOT LIKE 'pg_toast%'
         ORDER BY table_schema, table_name",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let schema: String = row.try_get("table_schema")?;
            let table: String = row.try_get("table_name")?;
            Ok(format!("{}.{}", schema, table))
        })
        .collect()
}

/// Exact row count of a `schema.table` name as returned by [`list_tables`].
pub(crate) async fn count_rows(conn: &mut PgConnection, qualified: &str) -> Result<u64> {
    let (schema, table) = qualified.split_once('.').unwrap_or(("public", qualified));
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    ))
    .fetch_one(&mut *conn)
    .await?;
    Ok(count.max(0) as u64)
}

pub struct PostgresEnumerator {
    credentials: Arc<CredentialProvider>,
}

impl PostgresEnumerator {
    pub fn new(credentials: Arc<CredentialProvider>) -> Self {
        Self { credentials }
    }

    async fn server_databases(&self, endpoint: &ResourceEndpoint) -> Result<Vec<String>> {
        let mut conn = connect(&self.credentials, endpoint, "postgres").await?;
        let rows = sqlx::query(
            "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn = true",
        )
        .fetch_all(&mut conn)
        .await?;
        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("datname"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close admin connection cleanly");
        }
        Ok(names)
    }
}

#[async_trait]
impl ResourceEnumerator for PostgresEnumerator {
    async fn list(&self, endpoint: &ResourceEndpoint, filter: &UnitFilter) -> Result<Vec<MigrationUnit>> {
        let existing = self
            .server_databases(endpoint)
            .await
            .map_err(|e| MigrationError::enumeration(endpoint.to_string(), e))?;

        let wanted: Vec<String> = match &filter.collections {
            Some(names) => names.clone(),
            None => existing
                .iter()
                .filter(|name| name.as_str() != "postgres" && !name.starts_with("azure_"))
                .cloned()
                .collect(),
        };
        let units: Vec<MigrationUnit> = wanted
            .into_iter()
            .filter(|name| existing.contains(name))
            .map(MigrationUnit::database)
            .collect();

        info!(endpoint = %endpoint, databases = units.len(), "enumerated databases");
        Ok(units)
    }

    async fn list_collections(
        &self,
        endpoint: &ResourceEndpoint,
        filter: &UnitFilter,
    ) -> Result<Vec<MigrationUnit>> {
        match &filter.collections {
            Some(names) => Ok(names.iter().map(MigrationUnit::database).collect()),
            None => self.list(endpoint, filter).await,
        }
    }
}
