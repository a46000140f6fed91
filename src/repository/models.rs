use alloy::json_abi::JsonAbi;
use alloy_primitives::{Address, B256, I256, U256};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Canonical text form of an address used as a storage key.
pub fn address_key(address: &Address) -> String {
    format!("{address:?}")
}

/// Token identity: `<contract>-<token id>`.
pub fn nft_id(contract: &Address, token_id: &U256) -> String {
    format!("{}-{}", address_key(contract), token_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContractType {
    #[serde(rename = "ERC721")]
    Erc721,
    #[serde(rename = "ERC1155")]
    Erc1155,
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractType::Erc721 => f.write_str("ERC721"),
            ContractType::Erc1155 => f.write_str("ERC1155"),
        }
    }
}

impl FromStr for ContractType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ERC721" => Ok(ContractType::Erc721),
            "ERC1155" => Ok(ContractType::Erc1155),
            other => Err(anyhow::anyhow!("Unknown contract type: {}", other)),
        }
    }
}

/// A registered scan target.
#[derive(Debug, Clone)]
pub struct ContractSource {
    pub address: Address,
    pub abi: JsonAbi,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub address: Address,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub contract_type: ContractType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Nft {
    pub id: String,
    pub contract_address: Address,
    pub token_id: U256,
    pub token_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub item_index: u32,
    pub nft_id: String,
    pub from_address: Address,
    pub to_address: Address,
    pub quantity: U256,
    pub block_number: u64,
    pub timestamp: Option<u64>,
}

/// Which side of a transfer a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Debit = 0,
    Credit = 1,
}

/// A signed change to one (token, owner) balance together with the event
/// position it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipDelta {
    pub nft_id: String,
    pub owner: Address,
    pub delta: I256,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub item_index: u32,
    pub leg: Leg,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ownership {
    pub nft_id: String,
    pub owner: Address,
    pub quantity: I256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub contract_address: Address,
    pub event_name: String,
    pub block_number: u64,
    pub args: serde_json::Value,
}
