pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metadata;
pub mod pool;
pub mod query;
pub mod queue;
pub mod repository;
pub mod rpc;
pub mod task;
