use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the SQLite store. Cloning is cheap; all clones serialize
/// through the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Borrow the connection. A panic while holding the lock does not leave
    /// SQLite in a torn state, so poisoning is ignored.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn();

        // Scan targets
        conn.execute(
            "CREATE TABLE IF NOT EXISTS contract_sources (
                address TEXT PRIMARY KEY,
                abi TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS contracts (
                address TEXT PRIMARY KEY,
                name TEXT,
                symbol TEXT,
                contract_type TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nfts (
                id TEXT PRIMARY KEY,
                contract_address TEXT NOT NULL,
                token_id TEXT NOT NULL,
                token_uri TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ownerships (
                nft_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                quantity TEXT NOT NULL,
                PRIMARY KEY (nft_id, owner)
            )",
            [],
        )?;

        // One row per applied ownership delta; guards against double application
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ownership_deltas (
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                item_index INTEGER NOT NULL,
                leg INTEGER NOT NULL,
                PRIMARY KEY (transaction_hash, log_index, item_index, leg)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transfers (
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                item_index INTEGER NOT NULL,
                nft_id TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                quantity TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp INTEGER,
                PRIMARY KEY (transaction_hash, log_index, item_index)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS raw_events (
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                contract_address TEXT NOT NULL,
                event_name TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                args TEXT NOT NULL,
                PRIMARY KEY (transaction_hash, log_index)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_progress (
                contract_address TEXT NOT NULL,
                event_name TEXT NOT NULL,
                last_scanned_block INTEGER NOT NULL,
                PRIMARY KEY (contract_address, event_name)
            )",
            [],
        )?;

        // Create indexes for better query performance
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_raw_events_key
             ON raw_events(contract_address, event_name, block_number)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_nft ON transfers(nft_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_block_number ON transfers(block_number)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ownerships_owner ON ownerships(owner)",
            [],
        )?;

        Ok(())
    }
}
