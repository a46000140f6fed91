pub mod contract_repository;
pub mod database;
pub mod event_repository;
pub mod models;
pub mod ownership_repository;
pub mod token_repository;
pub mod transfer_repository;

pub use contract_repository::ContractRepository;
pub use database::Database;
pub use event_repository::EventRepository;
pub use models::{
    Contract, ContractSource, ContractType, Leg, Nft, Ownership, OwnershipDelta, RawEvent,
    Transfer, address_key, nft_id,
};
pub use ownership_repository::OwnershipRepository;
pub use token_repository::TokenRepository;
pub use transfer_repository::{TransferFilter, TransferRepository, TransferStats};
