use super::models::{Ownership, OwnershipDelta, address_key};
use alloy_primitives::{Address, I256};
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

pub struct OwnershipRepository<'a> {
    conn: &'a Connection,
}

impl<'a> OwnershipRepository<'a> {
    const MARK_DELTA: &'static str = "INSERT OR IGNORE INTO ownership_deltas
            (transaction_hash, log_index, item_index, leg) VALUES (?1, ?2, ?3, ?4)";

    const SELECT_QUANTITY: &'static str =
        "SELECT quantity FROM ownerships WHERE nft_id = ?1 AND owner = ?2";

    const UPSERT_QUANTITY: &'static str =
        "INSERT OR REPLACE INTO ownerships (nft_id, owner, quantity) VALUES (?1, ?2, ?3)";

    const SELECT_BY_NFT: &'static str =
        "SELECT nft_id, owner, quantity FROM ownerships WHERE nft_id = ?1 ORDER BY owner";

    const SELECT_BY_OWNER: &'static str =
        "SELECT nft_id, owner, quantity FROM ownerships WHERE owner = ?1 ORDER BY nft_id";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Apply a signed delta unless the same (event, item, leg) was applied
    /// before. The marker and the balance change commit together.
    ///
    /// Returns `false` for a replayed delta.
    pub fn apply_delta(&self, delta: &OwnershipDelta) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let marked = tx.execute(
            Self::MARK_DELTA,
            params![
                format!("{:?}", delta.transaction_hash),
                delta.log_index,
                delta.item_index,
                delta.leg as i64,
            ],
        )?;
        if marked == 0 {
            return Ok(false);
        }

        let owner = address_key(&delta.owner);
        let current: Option<String> = tx
            .query_row(
                Self::SELECT_QUANTITY,
                params![delta.nft_id, owner],
                |row| row.get(0),
            )
            .optional()?;

        let current = match current {
            Some(text) => parse_quantity(&text)?,
            None => I256::ZERO,
        };
        let updated = current
            .checked_add(delta.delta)
            .context("Ownership quantity overflow")?;

        tx.execute(
            Self::UPSERT_QUANTITY,
            params![delta.nft_id, owner, updated.to_string()],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Quantity held, zero when no delta was ever applied.
    pub fn get_quantity(&self, nft_id: &str, owner: &Address) -> Result<I256> {
        let current: Option<String> = self
            .conn
            .query_row(
                Self::SELECT_QUANTITY,
                params![nft_id, address_key(owner)],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            Some(text) => parse_quantity(&text),
            None => Ok(I256::ZERO),
        }
    }

    pub fn holders(&self, nft_id: &str) -> Result<Vec<Ownership>> {
        let mut stmt = self.conn.prepare(Self::SELECT_BY_NFT)?;
        let rows = stmt
            .query_map(params![nft_id], Self::row_to_ownership)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn holdings(&self, owner: &Address) -> Result<Vec<Ownership>> {
        let mut stmt = self.conn.prepare(Self::SELECT_BY_OWNER)?;
        let rows = stmt
            .query_map(params![address_key(owner)], Self::row_to_ownership)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_ownership(row: &Row) -> rusqlite::Result<Ownership> {
        let owner = Address::from_str(&row.get::<_, String>(1)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let quantity = parse_quantity(&row.get::<_, String>(2)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Ownership {
            nft_id: row.get(0)?,
            owner,
            quantity,
        })
    }
}

fn parse_quantity(text: &str) -> Result<I256> {
    I256::from_dec_str(text)
        .map_err(|_| anyhow::anyhow!("Invalid quantity format in database: {}", text))
}
