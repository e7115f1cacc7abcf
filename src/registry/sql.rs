use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::info;

use super::BrokerStore;
use crate::error::DiscoveryResult;
use crate::models::PeerEntry;

pub type DbPool = Pool<Sqlite>;

/// Broker registry stored in a SQL table
#[derive(Clone)]
pub struct SqlBrokerStore {
    pool: DbPool,
}

#[derive(FromRow)]
struct BrokerRow {
    address: String,
    name: Option<String>,
    last_heartbeat: Option<i64>,
}

impl SqlBrokerStore {
    pub async fn connect(database_url: &str) -> DiscoveryResult<Self> {
        // Create database file if it doesn't exist
        let db_path = database_url.trim_start_matches("sqlite://");
        if !db_path.starts_with("sqlite:") && db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            if !std::path::Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!(database_url, "Connected to broker registry");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl BrokerStore for SqlBrokerStore {
    async fn init_schema(&self) -> DiscoveryResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE brokers (
                address VARCHAR(100) NOT NULL,
                name VARCHAR(100),
                last_heartbeat BIGINT,
                PRIMARY KEY (address)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Created brokers table");
        Ok(())
    }

    async fn insert(&self, entry: &PeerEntry) -> DiscoveryResult<()> {
        sqlx::query("INSERT INTO brokers (address, name, last_heartbeat) VALUES (?, ?, ?)")
            .bind(&entry.address)
            .bind(&entry.name)
            .bind(entry.last_heartbeat)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_heartbeat(&self, entry: &PeerEntry) -> DiscoveryResult<()> {
        sqlx::query("UPDATE brokers SET last_heartbeat = ? WHERE address = ?")
            .bind(entry.last_heartbeat)
            .bind(&entry.address)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_live_since(&self, cutoff: i64) -> DiscoveryResult<Vec<PeerEntry>> {
        let rows: Vec<BrokerRow> = sqlx::query_as(
            "SELECT address, name, last_heartbeat FROM brokers WHERE last_heartbeat > ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::row_to_peer).collect())
    }
}

impl SqlBrokerStore {
    fn row_to_peer(row: BrokerRow) -> PeerEntry {
        PeerEntry::with_heartbeat(
            row.name.unwrap_or_default(),
            row.address,
            row.last_heartbeat.unwrap_or_default(),
        )
    }
}
