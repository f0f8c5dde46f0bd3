//! Core data models for the storage gateway.
//!
//! These types describe the caller-facing side of the gateway: logical
//! paths, the metadata reported for them, and materialized local copies.

pub mod file_stat;
pub mod local_file;
pub mod virtual_path;

pub use file_stat::{FileStat, Lookup, ObjectKey};
pub use local_file::LocalFile;
pub use virtual_path::{VirtualPath, VirtualPathError};
