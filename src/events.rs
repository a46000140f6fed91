//! Log decoding: per-ABI (dynamic) and compiled NFT transfer decoders, plus
//! the derivation of token movements from ERC721/ERC1155 transfer logs.

use crate::error::DecodeError;
use crate::repository::ContractType;
use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256, hex};
use serde_json::{Map, Value, json};

pub mod erc721 {
    alloy::sol! {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    }
}

sol! {
    event TransferSingle(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256 id,
        uint256 value
    );
    event TransferBatch(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256[] ids,
        uint256[] values
    );
}

/// Position of a log on chain; the natural id of everything derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

impl LogPosition {
    pub fn of(log: &Log) -> Result<Self, DecodeError> {
        Ok(LogPosition {
            transaction_hash: log
                .transaction_hash
                .ok_or(DecodeError::MissingField("transaction hash"))?,
            log_index: log.log_index.ok_or(DecodeError::MissingField("log index"))?,
            block_number: log
                .block_number
                .ok_or(DecodeError::MissingField("block number"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub args: Value,
}

/// One token changing hands inside a transfer log. Batch transfers yield one
/// movement per id, numbered by `item_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMovement {
    pub contract_type: ContractType,
    pub token_id: U256,
    pub from: Address,
    pub to: Address,
    pub quantity: U256,
    pub item_index: u32,
}

/// How a collector turns raw logs into named events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Decode with the task's ABI event fragment.
    Abi,
    /// Decode with the compiled ERC721/ERC1155 transfer events.
    NftTransfer,
}

impl DecodeStrategy {
    pub fn requires_abi(&self) -> bool {
        matches!(self, DecodeStrategy::Abi)
    }

    /// Whether logs with signature topic `topic0` can be decoded at all.
    pub fn can_decode(&self, topic0: &B256) -> bool {
        match self {
            DecodeStrategy::Abi => true,
            DecodeStrategy::NftTransfer => [
                erc721::Transfer::SIGNATURE_HASH,
                TransferSingle::SIGNATURE_HASH,
                TransferBatch::SIGNATURE_HASH,
            ]
            .contains(topic0),
        }
    }

    pub fn decode(&self, event: Option<&Event>, log: &Log) -> Result<DecodedEvent, DecodeError> {
        match self {
            DecodeStrategy::Abi => {
                let event = event.ok_or(DecodeError::Abi("no event fragment".into()))?;
                decode_with_abi(event, log)
            }
            DecodeStrategy::NftTransfer => decode_nft_transfer(log),
        }
    }
}

pub fn decode_with_abi(event: &Event, log: &Log) -> Result<DecodedEvent, DecodeError> {
    let decoded = event
        .decode_log(log.data())
        .map_err(|e| DecodeError::Abi(e.to_string()))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Map::new();

    for (position, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let value = value.ok_or_else(|| {
            DecodeError::Abi(format!("missing value for input #{position}"))
        })?;
        let name = if input.name.is_empty() {
            format!("arg{position}")
        } else {
            input.name.clone()
        };
        args.insert(name, value_to_json(&value));
    }

    Ok(DecodedEvent {
        name: event.name.clone(),
        args: Value::Object(args),
    })
}

pub fn decode_nft_transfer(log: &Log) -> Result<DecodedEvent, DecodeError> {
    let topics = log.topics();
    let topic0 = topics.first().ok_or(DecodeError::MissingTopics)?;
    let data = &log.data().data;

    let (name, args) = if *topic0 == erc721::Transfer::SIGNATURE_HASH && topics.len() == 4 {
        let event = erc721::Transfer::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        (
            "Transfer",
            json!({
                "from": format!("{:?}", event.from),
                "to": format!("{:?}", event.to),
                "tokenId": event.tokenId.to_string(),
            }),
        )
    } else if *topic0 == TransferSingle::SIGNATURE_HASH {
        let event = TransferSingle::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        (
            "TransferSingle",
            json!({
                "operator": format!("{:?}", event.operator),
                "from": format!("{:?}", event.from),
                "to": format!("{:?}", event.to),
                "id": event.id.to_string(),
                "value": event.value.to_string(),
            }),
        )
    } else if *topic0 == TransferBatch::SIGNATURE_HASH {
        let event = TransferBatch::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        (
            "TransferBatch",
            json!({
                "operator": format!("{:?}", event.operator),
                "from": format!("{:?}", event.from),
                "to": format!("{:?}", event.to),
                "ids": event.ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                "values": event.values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            }),
        )
    } else {
        return Err(DecodeError::UnknownSignature(format!("{topic0:?}")));
    };

    Ok(DecodedEvent {
        name: name.to_string(),
        args,
    })
}

/// Token movements carried by a log. Logs that are not NFT transfers
/// (including ERC20 `Transfer`, which has one topic less) carry none.
pub fn token_movements(log: &Log) -> Result<Vec<TokenMovement>, DecodeError> {
    let topics = log.topics();
    let Some(topic0) = topics.first() else {
        return Ok(Vec::new());
    };
    let data = &log.data().data;

    if *topic0 == erc721::Transfer::SIGNATURE_HASH {
        if topics.len() != 4 {
            return Ok(Vec::new());
        }
        let event = erc721::Transfer::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        return Ok(vec![TokenMovement {
            contract_type: ContractType::Erc721,
            token_id: event.tokenId,
            from: event.from,
            to: event.to,
            quantity: U256::from(1),
            item_index: 0,
        }]);
    }

    if *topic0 == TransferSingle::SIGNATURE_HASH {
        let event = TransferSingle::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        return Ok(vec![TokenMovement {
            contract_type: ContractType::Erc1155,
            token_id: event.id,
            from: event.from,
            to: event.to,
            quantity: event.value,
            item_index: 0,
        }]);
    }

    if *topic0 == TransferBatch::SIGNATURE_HASH {
        let event = TransferBatch::decode_raw_log(topics.iter().copied(), data)
            .map_err(|e| DecodeError::Abi(e.to_string()))?;
        if event.ids.len() != event.values.len() {
            return Err(DecodeError::BatchLengthMismatch {
                ids: event.ids.len(),
                values: event.values.len(),
            });
        }
        return Ok(event
            .ids
            .iter()
            .zip(event.values.iter())
            .enumerate()
            .map(|(index, (id, value))| TokenMovement {
                contract_type: ContractType::Erc1155,
                token_id: *id,
                from: event.from,
                to: event.to,
                quantity: *value,
                item_index: index as u32,
            })
            .collect());
    }

    Ok(Vec::new())
}

fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Address(a) => Value::String(format!("{a:?}")),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}
