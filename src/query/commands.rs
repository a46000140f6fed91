use crate::query::formatters::{
    OutputFormat, format_contracts, format_ownerships, format_stats, format_transfers,
};
use crate::repository::{
    ContractRepository, OwnershipRepository, TokenRepository, TransferFilter, TransferRepository,
};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::Connection;
use std::str::FromStr;

fn parse_address(value: &str, what: &str) -> Result<Address> {
    Address::from_str(value).map_err(|_| anyhow::anyhow!("Invalid {} address: {}", what, value))
}

pub fn cmd_contracts(conn: &Connection, format: &OutputFormat) -> Result<String> {
    let contracts = ContractRepository::new(conn).list()?;
    Ok(format_contracts(&contracts, format))
}

pub fn cmd_owners(conn: &Connection, nft_id: &str, format: &OutputFormat) -> Result<String> {
    let holders = OwnershipRepository::new(conn).holders(nft_id)?;
    Ok(format_ownerships(&holders, format))
}

pub fn cmd_holdings(conn: &Connection, owner: &str, format: &OutputFormat) -> Result<String> {
    let owner = parse_address(owner, "owner")?;
    let holdings = OwnershipRepository::new(conn).holdings(&owner)?;
    Ok(format_ownerships(&holdings, format))
}

#[derive(Debug, Default)]
pub struct TransferQuery {
    pub nft: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub block_range: Option<(u64, u64)>,
    pub limit: usize,
    pub offset: usize,
}

pub fn cmd_transfers(conn: &Connection, query: TransferQuery, format: &OutputFormat) -> Result<String> {
    let from_address = query
        .from
        .as_deref()
        .map(|addr| parse_address(addr, "from"))
        .transpose()?;

    let to_address = query
        .to
        .as_deref()
        .map(|addr| parse_address(addr, "to"))
        .transpose()?;

    if let Some((start, end)) = query.block_range {
        if start > end {
            return Err(anyhow::anyhow!(
                "Invalid block range: {} is after {}",
                start,
                end
            ));
        }
    }

    let filter = TransferFilter {
        nft_id: query.nft,
        from_address,
        to_address,
        block_range: query.block_range,
        limit: query.limit,
        offset: query.offset,
    };

    let transfers = TransferRepository::new(conn).query_transfers(&filter)?;
    Ok(format_transfers(&transfers, format))
}

pub fn cmd_stats(conn: &Connection, format: &OutputFormat) -> Result<String> {
    let stats = TransferRepository::new(conn).get_statistics()?;
    let tokens = TokenRepository::new(conn).count()?;
    Ok(format_stats(&stats, tokens, format))
}
