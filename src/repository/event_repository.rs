use super::models::{RawEvent, address_key};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Raw decoded events and per-key scan progress. Together they determine the
/// block a (contract, event) scan resumes from.
pub struct EventRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> EventRepository<'a> {
    const INSERT_EVENT: &'static str = "INSERT OR IGNORE INTO raw_events (
            transaction_hash, log_index, contract_address, event_name, block_number, args
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    const MAX_EVENT_BLOCK: &'static str = "SELECT MAX(block_number) FROM raw_events
         WHERE contract_address = ?1 AND event_name = ?2";

    const RECORD_PROGRESS: &'static str =
        "INSERT INTO scan_progress (contract_address, event_name, last_scanned_block)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(contract_address, event_name) DO UPDATE SET
            last_scanned_block = MAX(last_scanned_block, excluded.last_scanned_block)";

    const GET_PROGRESS: &'static str = "SELECT last_scanned_block FROM scan_progress
         WHERE contract_address = ?1 AND event_name = ?2";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Store a raw event. Returns `false` when the (tx hash, log index) pair
    /// was already stored.
    pub fn insert(&self, event: &RawEvent) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_EVENT,
            params![
                format!("{:?}", event.transaction_hash),
                event.log_index,
                address_key(&event.contract_address),
                event.event_name,
                event.block_number,
                event.args.to_string(),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn count(&self, contract: &Address, event_name: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM raw_events WHERE contract_address = ?1 AND event_name = ?2",
            params![address_key(contract), event_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Remember that `[.., block_number]` was fully scanned. Never moves back.
    pub fn record_progress(
        &self,
        contract: &Address,
        event_name: &str,
        block_number: u64,
    ) -> Result<()> {
        self.conn.execute(
            Self::RECORD_PROGRESS,
            params![address_key(contract), event_name, block_number],
        )?;
        Ok(())
    }

    /// Block to resume scanning from: the later of the newest ingested event
    /// and the block after the last completed scan, or `default_block`.
    pub fn get_checkpoint(
        &self,
        contract: &Address,
        event_name: &str,
        default_block: u64,
    ) -> Result<u64> {
        let key = address_key(contract);

        let max_event: Option<u64> = self.conn.query_row(
            Self::MAX_EVENT_BLOCK,
            params![key, event_name],
            |row| row.get(0),
        )?;

        let scanned: Option<u64> = self
            .conn
            .query_row(Self::GET_PROGRESS, params![key, event_name], |row| row.get(0))
            .optional()?;

        let resume = match (max_event, scanned.map(|b| b.saturating_add(1))) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => default_block,
        };
        Ok(resume)
    }
}
