//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the stat cache store and the blob store

use crate::services::{
    blob_client::BlobStoreClient, cache_store::CacheStore, gateway::StorageGateway,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, time::Duration};
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Writes, reads back and deletes a throwaway entry in the cache store.
/// 2. Asks the blob store for an object that does not exist; a not-found
///    answer proves the store is reachable.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(gateway): State<StorageGateway>) -> impl IntoResponse {
    let probe = format!(".readyz-{}", Uuid::new_v4());

    // 1) Cache store check
    let store = gateway.stat_cache().store();
    let cache_check = match store.set(&probe, "readyz".into(), Duration::from_secs(60)).await {
        Ok(()) => match store.get(&probe).await {
            Ok(Some(value)) if value == "readyz" => match store.delete(&probe).await {
                Ok(()) => (true, None::<String>),
                Err(e) => (true, Some(format!("could not remove probe entry: {}", e))),
            },
            Ok(_) => {
                let _ = store.delete(&probe).await;
                (false, Some("probe entry mismatch".to_string()))
            }
            Err(e) => (false, Some(format!("could not read probe entry: {}", e))),
        },
        Err(e) => (false, Some(format!("could not write probe entry: {}", e))),
    };

    // 2) Blob store check
    let blob_check = match gateway.client().info(&probe).await {
        Ok(_) => (true, None::<String>),
        Err(e) if e.is_not_found() => (true, None),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    let overall_ok = cache_check.0 && blob_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "cache",
        CheckStatus {
            ok: cache_check.0,
            error: cache_check.1,
        },
    );
    checks.insert(
        "blob_store",
        CheckStatus {
            ok: blob_check.0,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
