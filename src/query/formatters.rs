use crate::repository::{Contract, Ownership, Transfer, TransferStats};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn write_csv(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut wtr = Writer::from_writer(vec![]);
    let _ = wtr.write_record(header);
    for row in rows {
        let _ = wtr.write_record(&row);
    }
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

fn or_dash(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

pub fn format_contracts(contracts: &[Contract], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if contracts.is_empty() {
                return "No contracts found.".to_string();
            }
            let mut table = new_table(vec!["Address", "Type", "Name", "Symbol"]);
            for contract in contracts {
                table.add_row(vec![
                    Cell::new(format!("{:?}", contract.address)),
                    Cell::new(contract.contract_type),
                    Cell::new(or_dash(&contract.name)),
                    Cell::new(or_dash(&contract.symbol)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(contracts).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => write_csv(
            &["address", "contract_type", "name", "symbol"],
            contracts
                .iter()
                .map(|c| {
                    vec![
                        format!("{:?}", c.address),
                        c.contract_type.to_string(),
                        c.name.clone().unwrap_or_default(),
                        c.symbol.clone().unwrap_or_default(),
                    ]
                })
                .collect(),
        ),
    }
}

/// Balances for either the holders of one token or the tokens of one owner.
pub fn format_ownerships(ownerships: &[Ownership], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if ownerships.is_empty() {
                return "No balances found.".to_string();
            }
            let mut table = new_table(vec!["NFT", "Owner", "Quantity"]);
            for ownership in ownerships {
                table.add_row(vec![
                    Cell::new(&ownership.nft_id),
                    Cell::new(format!("{:?}", ownership.owner)),
                    Cell::new(ownership.quantity.to_string()),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let rows: Vec<_> = ownerships
                .iter()
                .map(|o| {
                    json!({
                        "nft_id": o.nft_id,
                        "owner": format!("{:?}", o.owner),
                        "quantity": o.quantity.to_string(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => write_csv(
            &["nft_id", "owner", "quantity"],
            ownerships
                .iter()
                .map(|o| {
                    vec![
                        o.nft_id.clone(),
                        format!("{:?}", o.owner),
                        o.quantity.to_string(),
                    ]
                })
                .collect(),
        ),
    }
}

pub fn format_transfers(transfers: &[Transfer], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_transfers_table(transfers),
        OutputFormat::Json => format_transfers_json(transfers),
        OutputFormat::Csv => format_transfers_csv(transfers),
    }
}

fn format_transfers_table(transfers: &[Transfer]) -> String {
    if transfers.is_empty() {
        return "No transfers found.".to_string();
    }

    let mut table = new_table(vec!["Block", "NFT", "From", "To", "Quantity", "Tx Hash"]);
    for transfer in transfers {
        table.add_row(vec![
            Cell::new(transfer.block_number),
            Cell::new(&transfer.nft_id),
            Cell::new(format!("{:#}", transfer.from_address)),
            Cell::new(format!("{:#}", transfer.to_address)),
            Cell::new(transfer.quantity.to_string()),
            Cell::new(format_tx_hash(&format!("{:?}", transfer.transaction_hash))),
        ]);
    }

    table.to_string()
}

fn format_transfers_json(transfers: &[Transfer]) -> String {
    let json_transfers: Vec<_> = transfers
        .iter()
        .map(|t| {
            json!({
                "block_number": t.block_number,
                "timestamp": t.timestamp,
                "transaction_hash": format!("{:?}", t.transaction_hash),
                "log_index": t.log_index,
                "item_index": t.item_index,
                "nft_id": t.nft_id,
                "from": format!("{:?}", t.from_address),
                "to": format!("{:?}", t.to_address),
                "quantity": t.quantity.to_string(),
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_transfers).unwrap_or_else(|_| "[]".to_string())
}

fn format_transfers_csv(transfers: &[Transfer]) -> String {
    write_csv(
        &[
            "block_number",
            "nft_id",
            "from",
            "to",
            "quantity",
            "transaction_hash",
            "log_index",
            "item_index",
        ],
        transfers
            .iter()
            .map(|t| {
                vec![
                    t.block_number.to_string(),
                    t.nft_id.clone(),
                    format!("{:?}", t.from_address),
                    format!("{:?}", t.to_address),
                    t.quantity.to_string(),
                    format!("{:?}", t.transaction_hash),
                    t.log_index.to_string(),
                    t.item_index.to_string(),
                ]
            })
            .collect(),
    )
}

pub fn format_stats(stats: &TransferStats, tokens: usize, format: &OutputFormat) -> String {
    let block = |b: Option<u64>| b.map_or("N/A".to_string(), |b| b.to_string());
    let rows = [
        ("total_transfers", "Total Transfers", stats.total_transfers.to_string()),
        ("indexed_tokens", "Indexed Tokens", tokens.to_string()),
        ("tokens_transferred", "Tokens Transferred", stats.unique_tokens.to_string()),
        ("unique_owners", "Unique Owners", stats.unique_owners.to_string()),
        ("earliest_block", "Earliest Block", block(stats.earliest_block)),
        ("latest_block", "Latest Block", block(stats.latest_block)),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Metric", "Value"]);
            for (_, label, value) in &rows {
                table.add_row(vec![Cell::new(label), Cell::new(value)]);
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "total_transfers": stats.total_transfers,
            "indexed_tokens": tokens,
            "tokens_transferred": stats.unique_tokens,
            "unique_owners": stats.unique_owners,
            "earliest_block": stats.earliest_block,
            "latest_block": stats.latest_block,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => write_csv(
            &["metric", "value"],
            rows.iter()
                .map(|(key, _, value)| vec![key.to_string(), value.clone()])
                .collect(),
        ),
    }
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 10 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ContractType;
    use alloy_primitives::{Address, B256, I256, U256};

    fn transfer() -> Transfer {
        Transfer {
            transaction_hash: B256::repeat_byte(0xab),
            log_index: 3,
            item_index: 0,
            nft_id: "0x0000000000000000000000000000000000000001-7".to_string(),
            from_address: Address::ZERO,
            to_address: Address::repeat_byte(2),
            quantity: U256::from(1),
            block_number: 100,
            timestamp: None,
        }
    }

    #[test]
    fn parses_output_format_case_insensitively() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Table);
    }

    #[test]
    fn transfers_csv_has_header_and_row() {
        let output = format_transfers(&[transfer()], &OutputFormat::Csv);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("block_number,nft_id"));
        assert!(lines[1].starts_with("100,0x0000000000000000000000000000000000000001-7"));
    }

    #[test]
    fn empty_tables_say_so() {
        assert_eq!(format_transfers(&[], &OutputFormat::Table), "No transfers found.");
        assert_eq!(format_ownerships(&[], &OutputFormat::Table), "No balances found.");
    }

    #[test]
    fn ownership_json_keeps_signed_quantity() {
        let ownership = Ownership {
            nft_id: "x-1".to_string(),
            owner: Address::ZERO,
            quantity: I256::from_dec_str("-2").unwrap(),
        };
        let output = format_ownerships(&[ownership], &OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["quantity"], "-2");
    }

    #[test]
    fn contracts_json_uses_standard_names() {
        let contract = Contract {
            address: Address::ZERO,
            name: Some("Kitties".to_string()),
            symbol: None,
            contract_type: ContractType::Erc721,
        };
        let output = format_contracts(&[contract], &OutputFormat::Json);
        assert!(output.contains("\"ERC721\""));
    }
}
