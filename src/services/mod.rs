pub mod blob_client;
pub mod cache_store;
pub mod content_hash;
pub mod gateway;
pub mod listing;
pub mod name_mapper;
pub mod stat_cache;
