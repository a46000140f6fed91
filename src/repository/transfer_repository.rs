use super::models::{Transfer, address_key};
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use rusqlite::{Row, ToSql, params, params_from_iter};
use std::str::FromStr;

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferRepository<'a> {
    const UPSERT_TRANSFER: &'static str = "INSERT INTO transfers (
            transaction_hash, log_index, item_index, nft_id,
            from_address, to_address, quantity, block_number, timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(transaction_hash, log_index, item_index) DO UPDATE SET
            nft_id = excluded.nft_id,
            from_address = excluded.from_address,
            to_address = excluded.to_address,
            quantity = excluded.quantity,
            block_number = excluded.block_number,
            timestamp = COALESCE(excluded.timestamp, transfers.timestamp)";

    const SELECT_TRANSFER: &'static str = "SELECT transaction_hash, log_index, item_index, nft_id, from_address, to_address, quantity, block_number, timestamp FROM transfers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, transfer: &Transfer) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_TRANSFER,
            params![
                format!("{:?}", transfer.transaction_hash),
                transfer.log_index,
                transfer.item_index,
                transfer.nft_id,
                address_key(&transfer.from_address),
                address_key(&transfer.to_address),
                transfer.quantity.to_string(),
                transfer.block_number,
                transfer.timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn query_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(nft) = &filter.nft_id {
            conditions.push("nft_id = ?");
            params.push(Box::new(nft.clone()));
        }

        if let Some(from) = &filter.from_address {
            conditions.push("from_address = ?");
            params.push(Box::new(address_key(from)));
        }

        if let Some(to) = &filter.to_address {
            conditions.push("to_address = ?");
            params.push(Box::new(address_key(to)));
        }

        if let Some((start, end)) = filter.block_range {
            conditions.push("block_number >= ?");
            params.push(Box::new(start));
            conditions.push("block_number <= ?");
            params.push(Box::new(end));
        }

        let mut query = Self::SELECT_TRANSFER.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY block_number, log_index, item_index");
        query.push_str(&format!(" LIMIT {} OFFSET {}", filter.limit, filter.offset));

        let mut stmt = self.conn.prepare(&query)?;
        let transfers = stmt
            .query_map(params_from_iter(params), Self::row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfers)
    }

    pub fn get_statistics(&self) -> Result<TransferStats> {
        let total_transfers: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;

        let unique_tokens: usize =
            self.conn
                .query_row("SELECT COUNT(DISTINCT nft_id) FROM transfers", [], |row| {
                    row.get(0)
                })?;

        let unique_owners: usize = self.conn.query_row(
            "SELECT COUNT(DISTINCT owner) FROM ownerships WHERE quantity NOT LIKE '-%' AND quantity != '0'",
            [],
            |row| row.get(0),
        )?;

        let (earliest_block, latest_block): (Option<u64>, Option<u64>) = self.conn.query_row(
            "SELECT MIN(block_number), MAX(block_number) FROM transfers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(TransferStats {
            total_transfers,
            unique_tokens,
            unique_owners,
            earliest_block,
            latest_block,
        })
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<Transfer> {
        let transaction_hash = row.get::<_, String>(0)?.parse::<B256>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let from_address = Address::from_str(&row.get::<_, String>(4)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let to_address = Address::from_str(&row.get::<_, String>(5)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let quantity = U256::from_str(&row.get::<_, String>(6)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Transfer {
            transaction_hash,
            log_index: row.get(1)?,
            item_index: row.get(2)?,
            nft_id: row.get(3)?,
            from_address,
            to_address,
            quantity,
            block_number: row.get(7)?,
            timestamp: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransferFilter {
    pub nft_id: Option<String>,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub block_range: Option<(u64, u64)>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TransferFilter {
    fn default() -> Self {
        Self {
            nft_id: None,
            from_address: None,
            to_address: None,
            block_range: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug)]
pub struct TransferStats {
    pub total_transfers: usize,
    pub unique_tokens: usize,
    pub unique_owners: usize,
    pub earliest_block: Option<u64>,
    pub latest_block: Option<u64>,
}
