use super::{not_found, Cache, CacheKey};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

/// Pointer cache backed by a two column PostgreSQL table.
pub struct PostgresCache {
    client: Client,
    table: String,
    connection_task: tokio::task::JoinHandle<()>,
}

impl PostgresCache {
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Configuration(format!(
                "invalid pointer table name '{}'",
                table
            )));
        }

        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("pointer cache connection error: {}", e);
            }
        });

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                key TEXT PRIMARY KEY, \
                pointer TEXT NOT NULL, \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            table
        );
        client.batch_execute(&create).await?;
        info!(table = %table, "connected to PostgreSQL pointer cache");

        Ok(Self {
            client,
            table: table.to_string(),
            connection_task,
        })
    }
}

impl Drop for PostgresCache {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

#[async_trait]
impl Cache for PostgresCache {
    async fn get(&self, key: &CacheKey) -> Result<String> {
        let query = format!("SELECT pointer FROM {} WHERE key = $1", self.table);
        let row = self.client.query_opt(&query, &[&key.as_str()]).await?;
        match row {
            Some(row) => Ok(row.try_get::<_, String>(0)?),
            None => Err(not_found(key)),
        }
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (key, pointer, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET pointer = EXCLUDED.pointer, updated_at = now()",
            self.table
        );
        self.client.execute(&query, &[&key.as_str(), &value]).await?;
        Ok(())
    }
}
