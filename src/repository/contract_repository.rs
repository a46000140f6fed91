use super::models::{Contract, ContractSource, ContractType, address_key};
use alloy::json_abi::JsonAbi;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

pub struct ContractRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ContractRepository<'a> {
    const INSERT_SOURCE: &'static str =
        "INSERT OR IGNORE INTO contract_sources (address, abi) VALUES (?1, ?2)";

    const SELECT_SOURCES: &'static str = "SELECT address, abi FROM contract_sources ORDER BY address";

    const UPSERT_CONTRACT: &'static str =
        "INSERT INTO contracts (address, name, symbol, contract_type) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(address) DO UPDATE SET
            name = excluded.name,
            symbol = excluded.symbol,
            contract_type = excluded.contract_type";

    const SELECT_CONTRACT: &'static str =
        "SELECT address, name, symbol, contract_type FROM contracts";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Register a scan target. Returns `false` when it was already known.
    pub fn insert_source_if_missing(&self, address: &Address, abi: &JsonAbi) -> Result<bool> {
        let abi_json = serde_json::to_string(abi)?;
        let inserted = self
            .conn
            .execute(Self::INSERT_SOURCE, params![address_key(address), abi_json])?;
        Ok(inserted > 0)
    }

    pub fn list_sources(&self) -> Result<Vec<ContractSource>> {
        let mut stmt = self.conn.prepare(Self::SELECT_SOURCES)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(address, abi)| {
                let address = Address::from_str(&address)
                    .with_context(|| format!("Invalid contract address in database: {address}"))?;
                let abi: JsonAbi = serde_json::from_str(&abi)
                    .with_context(|| format!("Invalid ABI stored for {address:?}"))?;
                Ok(ContractSource { address, abi })
            })
            .collect()
    }

    pub fn upsert(&self, contract: &Contract) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_CONTRACT,
            params![
                address_key(&contract.address),
                contract.name,
                contract.symbol,
                contract.contract_type.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Result<Option<Contract>> {
        let query = format!("{} WHERE address = ?1", Self::SELECT_CONTRACT);
        let contract = self
            .conn
            .query_row(&query, params![address_key(address)], Self::row_to_contract)
            .optional()?;
        Ok(contract)
    }

    pub fn list(&self) -> Result<Vec<Contract>> {
        let query = format!("{} ORDER BY address", Self::SELECT_CONTRACT);
        let mut stmt = self.conn.prepare(&query)?;
        let contracts = stmt
            .query_map([], Self::row_to_contract)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contracts)
    }

    fn row_to_contract(row: &Row) -> rusqlite::Result<Contract> {
        let address = Address::from_str(&row.get::<_, String>(0)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let contract_type = ContractType::from_str(&row.get::<_, String>(3)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Contract {
            address,
            name: row.get(1)?,
            symbol: row.get(2)?,
            contract_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;
    use alloy_primitives::address;

    const ABI: &str = r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"tokenId","type":"uint256","indexed":true}]}]"#;

    #[test]
    fn sources_are_registered_once() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        let repo = ContractRepository::new(&conn);
        let abi: JsonAbi = serde_json::from_str(ABI).unwrap();
        let address = address!("0x00000000000000000000000000000000000000aa");

        assert!(repo.insert_source_if_missing(&address, &abi).unwrap());
        assert!(!repo.insert_source_if_missing(&address, &abi).unwrap());

        let sources = repo.list_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].address, address);
        assert_eq!(sources[0].abi.events().count(), 1);
    }

    #[test]
    fn upsert_overwrites_metadata() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn();
        let repo = ContractRepository::new(&conn);
        let address = address!("0x00000000000000000000000000000000000000bb");

        let mut contract = Contract {
            address,
            name: None,
            symbol: None,
            contract_type: ContractType::Erc721,
        };
        repo.upsert(&contract).unwrap();
        contract.name = Some("Punks".into());
        repo.upsert(&contract).unwrap();

        assert_eq!(repo.get(&address).unwrap(), Some(contract));
        assert_eq!(repo.list().unwrap().len(), 1);
    }
}
