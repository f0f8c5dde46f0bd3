//! Defines routes for file operations over the storage gateway.
//!
//! ## Structure
//! - **Container-level endpoints**
//!   - `GET    /files/{container}` — list file or directory names (dir, kind, top_only, max_keys)
//!
//! - **File-level endpoints**
//!   - `PUT    /files/{container}/{*path}` — store the body, or copy via `x-copy-source`
//!   - `GET    /files/{container}/{*path}` — redirect to a signed URL
//!   - `HEAD   /files/{container}/{*path}` — stat headers only
//!   - `DELETE /files/{container}/{*path}` — delete
//!
//! The wildcard `*path` allows nested paths like `a/ab/Example.png`.

use crate::{
    handlers::{
        file_handlers::{delete_file, get_file, head_file, list_files, put_file},
        health_handlers::{healthz, readyz},
    },
    services::gateway::StorageGateway,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`StorageGateway`) to all handlers.
pub fn routes() -> Router<StorageGateway> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File-level routes
        .route(
            "/files/{container}/{*path}",
            put(put_file)
                .get(get_file)
                .head(head_file)
                .delete(delete_file),
        )
        // Container-level routes
        .route("/files/{container}", get(list_files))
}
