//! File-backend gateway: maps container-scoped virtual paths onto a flat
//! blob store, with a stat cache in front of it.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use models::{FileStat, LocalFile, Lookup, VirtualPath};
pub use services::gateway::{GatewayConfig, GatewayError, GatewayResult, StorageGateway};
