use crate::repository::{Contract, ContractType, Nft, nft_id};
use crate::rpc::ChainClient;
use alloy_primitives::{Address, FixedBytes, U256, fixed_bytes};
use tracing::info;

pub const ERC721_METADATA_INTERFACE: FixedBytes<4> = fixed_bytes!("5b5e139f");
pub const ERC1155_METADATA_URI_INTERFACE: FixedBytes<4> = fixed_bytes!("0e89341c");

fn metadata_interface(contract_type: ContractType) -> FixedBytes<4> {
    match contract_type {
        ContractType::Erc721 => ERC721_METADATA_INTERFACE,
        ContractType::Erc1155 => ERC1155_METADATA_URI_INTERFACE,
    }
}

/// Build the contract record for a newly seen NFT contract. Name and symbol
/// are only read from ERC721 contracts advertising the metadata extension.
pub async fn fetch_contract_metadata<C: ChainClient>(
    client: &C,
    address: Address,
    contract_type: ContractType,
) -> Contract {
    let has_metadata = contract_type == ContractType::Erc721
        && client
            .supports_interface(address, ERC721_METADATA_INTERFACE)
            .await;
    let (name, symbol) = if has_metadata {
        (client.name(address).await, client.symbol(address).await)
    } else {
        (None, None)
    };

    info!(
        contract = ?address,
        name = name.as_deref().unwrap_or("-"),
        symbol = symbol.as_deref().unwrap_or("-"),
        "Discovered {} contract",
        contract_type
    );

    Contract {
        address,
        name,
        symbol,
        contract_type,
    }
}

/// Build the token record for a newly seen token, reading its URI when the
/// contract advertises the matching metadata interface.
pub async fn fetch_token_metadata<C: ChainClient>(
    client: &C,
    contract: Address,
    token_id: U256,
    contract_type: ContractType,
) -> Nft {
    let token_uri = if client
        .supports_interface(contract, metadata_interface(contract_type))
        .await
    {
        match contract_type {
            ContractType::Erc721 => client.token_uri(contract, token_id).await,
            ContractType::Erc1155 => client.uri(contract, token_id).await,
        }
    } else {
        None
    };

    Nft {
        id: nft_id(&contract, &token_id),
        contract_address: contract,
        token_id,
        token_uri,
    }
}
