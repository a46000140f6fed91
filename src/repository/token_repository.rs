use super::models::{Nft, address_key};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

pub struct TokenRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TokenRepository<'a> {
    // Metadata only ever fills in; a later upsert without a URI keeps the known one
    const UPSERT_TOKEN: &'static str =
        "INSERT INTO nfts (id, contract_address, token_id, token_uri) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET token_uri = COALESCE(excluded.token_uri, nfts.token_uri)";

    const SELECT_TOKEN: &'static str =
        "SELECT id, contract_address, token_id, token_uri FROM nfts WHERE id = ?1";

    const COUNT_TOKENS: &'static str = "SELECT COUNT(*) FROM nfts";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, nft: &Nft) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_TOKEN,
            params![
                nft.id,
                address_key(&nft.contract_address),
                nft.token_id.to_string(),
                nft.token_uri,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Nft>> {
        let nft = self
            .conn
            .query_row(Self::SELECT_TOKEN, params![id], Self::row_to_nft)
            .optional()?;
        Ok(nft)
    }

    pub fn count(&self) -> Result<usize> {
        let count = self.conn.query_row(Self::COUNT_TOKENS, [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_nft(row: &Row) -> rusqlite::Result<Nft> {
        let contract_address = Address::from_str(&row.get::<_, String>(1)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let token_id = U256::from_str(&row.get::<_, String>(2)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Nft {
            id: row.get(0)?,
            contract_address,
            token_id,
            token_uri: row.get(3)?,
        })
    }
}
