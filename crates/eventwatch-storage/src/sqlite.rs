//! SQLite storage backend.
//!
//! Persists contracts, listeners, event records, and checkpoints to a single
//! SQLite file via `sqlx`, WAL mode enabled. The schema enforces the data
//! model's uniqueness constraints directly:
//! `(address, network)` on contracts (address compared case-insensitively)
//! and `(listener_id, tx_hash, log_index)` on event records.
//! `commit_range` runs in one transaction, so a sync height is never visible
//! without the records below it.
//!
//! # Usage
//! ```rust,no_run
//! use eventwatch_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::open("./eventwatch.db").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use eventwatch_core::abi::ContractAbi;
use eventwatch_core::error::SyncError;
use eventwatch_core::store::{ContractRegistry, ListenerStore};
use eventwatch_core::types::{Contract, EventListener, EventRecord, HeightCheckpoint};

/// SQLite-backed `ContractRegistry` + `ListenerStore`.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> SyncError {
    SyncError::Store(e.to_string())
}

fn json_err(e: serde_json::Error) -> SyncError {
    SyncError::Store(e.to_string())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::Store(format!("bad timestamp '{s}': {e}")))
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./eventwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./eventwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. Ideal for tests.
    ///
    /// Pinned to a single connection — each `:memory:` connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contracts (
                id           TEXT    PRIMARY KEY,
                address      TEXT    NOT NULL COLLATE NOCASE,
                network      INTEGER NOT NULL,
                name         TEXT    NOT NULL,
                abi_json     TEXT,
                start_height INTEGER NOT NULL,
                created_at   TEXT    NOT NULL,
                updated_at   TEXT    NOT NULL,
                UNIQUE (address, network)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS listeners (
                id          TEXT    PRIMARY KEY,
                contract_id TEXT    NOT NULL,
                name        TEXT    NOT NULL,
                sync_height INTEGER NOT NULL,
                created_at  TEXT    NOT NULL,
                updated_at  TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_records (
                listener_id  TEXT    NOT NULL,
                block_height INTEGER NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                args_json    TEXT    NOT NULL,
                PRIMARY KEY (listener_id, tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_height
             ON event_records (listener_id, block_height);",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                listener_id TEXT    NOT NULL,
                height      INTEGER NOT NULL,
                block_hash  TEXT    NOT NULL,
                PRIMARY KEY (listener_id, height)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn contract_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Contract, SyncError> {
        let abi = match row.get::<Option<String>, _>("abi_json") {
            Some(json) => Some(serde_json::from_str::<ContractAbi>(&json).map_err(json_err)?),
            None => None,
        };
        Ok(Contract {
            id: row.get("id"),
            address: row.get("address"),
            network: row.get::<i64, _>("network") as u64,
            name: row.get("name"),
            abi,
            start_height: row.get::<i64, _>("start_height") as u64,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn listener_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EventListener, SyncError> {
        Ok(EventListener {
            id: row.get("id"),
            contract_id: row.get("contract_id"),
            name: row.get("name"),
            sync_height: row.get::<i64, _>("sync_height") as u64,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        })
    }
}

#[async_trait]
impl ContractRegistry for SqliteStore {
    async fn create_contract(&self, contract: Contract) -> Result<(), SyncError> {
        let taken = sqlx::query(
            "SELECT 1 FROM contracts WHERE address = ? AND network = ?",
        )
        .bind(&contract.address)
        .bind(contract.network as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if taken.is_some() {
            return Err(SyncError::DuplicateContract {
                address: contract.address,
                network: contract.network,
            });
        }

        let abi_json = contract
            .abi
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        sqlx::query(
            "INSERT INTO contracts
             (id, address, network, name, abi_json, start_height, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contract.id)
        .bind(&contract.address)
        .bind(contract.network as i64)
        .bind(&contract.name)
        .bind(abi_json)
        .bind(contract.start_height as i64)
        .bind(contract.created_at.to_rfc3339())
        .bind(contract.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(contract = %contract.id, network = contract.network, "contract registered");
        Ok(())
    }

    async fn get_contract(&self, id: &str) -> Result<Contract, SyncError> {
        let row = sqlx::query("SELECT * FROM contracts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| SyncError::ContractNotFound(id.to_string()))?;
        Self::contract_from_row(&row)
    }

    async fn list_contracts(&self) -> Result<Vec<Contract>, SyncError> {
        let rows = sqlx::query("SELECT * FROM contracts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::contract_from_row).collect()
    }

    async fn update_contract(
        &self,
        id: &str,
        name: Option<String>,
        abi: Option<ContractAbi>,
    ) -> Result<(), SyncError> {
        let current = self.get_contract(id).await?;
        let name = name.unwrap_or(current.name);
        let abi = abi.or(current.abi);
        let abi_json = abi
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;

        sqlx::query(
            "UPDATE contracts SET name = ?, abi_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(abi_json)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_contract(&self, id: &str) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let deleted = sqlx::query("DELETE FROM contracts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if deleted.rows_affected() == 0 {
            return Err(SyncError::ContractNotFound(id.to_string()));
        }

        // Cascade: listeners of this contract, then their records/checkpoints
        sqlx::query(
            "DELETE FROM event_records WHERE listener_id IN
             (SELECT id FROM listeners WHERE contract_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "DELETE FROM checkpoints WHERE listener_id IN
             (SELECT id FROM listeners WHERE contract_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM listeners WHERE contract_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ListenerStore for SqliteStore {
    async fn create_listener(&self, mut listener: EventListener) -> Result<(), SyncError> {
        let contract = self.get_contract(&listener.contract_id).await?;

        let has_event = contract
            .abi
            .as_ref()
            .map(|abi| abi.has_event(&listener.name))
            .unwrap_or(false);
        if !has_event {
            return Err(SyncError::UnknownEvent {
                contract_id: listener.contract_id,
                event: listener.name,
            });
        }

        listener.sync_height = listener.sync_height.max(contract.start_height);

        sqlx::query(
            "INSERT INTO listeners (id, contract_id, name, sync_height, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&listener.id)
        .bind(&listener.contract_id)
        .bind(&listener.name)
        .bind(listener.sync_height as i64)
        .bind(listener.created_at.to_rfc3339())
        .bind(listener.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_listener(&self, id: &str) -> Result<EventListener, SyncError> {
        let row = sqlx::query("SELECT * FROM listeners WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| SyncError::ListenerNotFound(id.to_string()))?;
        Self::listener_from_row(&row)
    }

    async fn list_listeners(&self) -> Result<Vec<EventListener>, SyncError> {
        let rows = sqlx::query("SELECT * FROM listeners ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::listener_from_row).collect()
    }

    async fn update_listener(
        &self,
        id: &str,
        name: Option<String>,
        sync_height: Option<u64>,
    ) -> Result<(), SyncError> {
        let current = self.get_listener(id).await?;
        let name = name.unwrap_or(current.name);
        let sync_height = sync_height.unwrap_or(current.sync_height);

        sqlx::query(
            "UPDATE listeners SET name = ?, sync_height = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(sync_height as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_listener(&self, id: &str) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let deleted = sqlx::query("DELETE FROM listeners WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if deleted.rows_affected() == 0 {
            return Err(SyncError::ListenerNotFound(id.to_string()));
        }

        sqlx::query("DELETE FROM event_records WHERE listener_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM checkpoints WHERE listener_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn sync_height(&self, id: &str) -> Result<u64, SyncError> {
        let row = sqlx::query("SELECT sync_height FROM listeners WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| SyncError::ListenerNotFound(id.to_string()))?;
        Ok(row.get::<i64, _>("sync_height") as u64)
    }

    async fn commit_range(
        &self,
        listener_id: &str,
        records: Vec<EventRecord>,
        new_height: u64,
        checkpoint: HeightCheckpoint,
    ) -> Result<u64, SyncError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let exists = sqlx::query("SELECT 1 FROM listeners WHERE id = ?")
            .bind(listener_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(SyncError::ListenerNotFound(listener_id.to_string()));
        }

        let mut inserted = 0u64;
        for record in &records {
            let args = serde_json::to_string(&record.decoded_args).map_err(json_err)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO event_records
                 (listener_id, block_height, tx_hash, log_index, args_json)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(listener_id)
            .bind(record.block_height as i64)
            .bind(&record.transaction_hash)
            .bind(record.log_index as i64)
            .bind(&args)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }

        // Height only moves forward here; rollback_to is the one path down
        sqlx::query(
            "UPDATE listeners SET sync_height = MAX(sync_height, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(new_height as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(listener_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (listener_id, height, block_hash)
             VALUES (?, ?, ?)",
        )
        .bind(listener_id)
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.block_hash)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(listener = listener_id, new_height, inserted, "range committed");
        Ok(inserted)
    }

    async fn rollback_to(&self, listener_id: &str, height: u64) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM event_records WHERE listener_id = ? AND block_height > ?")
            .bind(listener_id)
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM checkpoints WHERE listener_id = ? AND height > ?")
            .bind(listener_id)
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let updated = sqlx::query(
            "UPDATE listeners SET sync_height = ?, updated_at = ? WHERE id = ?",
        )
        .bind(height as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(listener_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(SyncError::ListenerNotFound(listener_id.to_string()));
        }

        tx.commit().await.map_err(db_err)?;

        debug!(listener = listener_id, height, "rolled back");
        Ok(())
    }

    async fn records(&self, listener_id: &str) -> Result<Vec<EventRecord>, SyncError> {
        let rows = sqlx::query(
            "SELECT block_height, tx_hash, log_index, args_json FROM event_records
             WHERE listener_id = ? ORDER BY block_height, log_index",
        )
        .bind(listener_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let args = serde_json::from_str(&row.get::<String, _>("args_json"))
                .map_err(json_err)?;
            records.push(EventRecord {
                listener_id: listener_id.to_string(),
                block_height: row.get::<i64, _>("block_height") as u64,
                transaction_hash: row.get("tx_hash"),
                log_index: row.get::<i64, _>("log_index") as u32,
                decoded_args: args,
            });
        }
        Ok(records)
    }

    async fn checkpoints(&self, listener_id: &str) -> Result<Vec<HeightCheckpoint>, SyncError> {
        let rows = sqlx::query(
            "SELECT height, block_hash FROM checkpoints
             WHERE listener_id = ? ORDER BY height",
        )
        .bind(listener_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| HeightCheckpoint {
                height: row.get::<i64, _>("height") as u64,
                block_hash: row.get("block_hash"),
            })
            .collect())
    }

    async fn prune_checkpoints(
        &self,
        listener_id: &str,
        keep_last: usize,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "DELETE FROM checkpoints WHERE listener_id = ? AND height NOT IN
             (SELECT height FROM checkpoints WHERE listener_id = ?
              ORDER BY height DESC LIMIT ?)",
        )
        .bind(listener_id)
        .bind(listener_id)
        .bind(keep_last as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
