//! HTTP routes: `/deduct_stock`, `/stock`, `/stats`.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{HttpResponse, Responder, Scope, get, http::StatusCode, route, web};
use leaselock_core::{AcquireError, Guarded, LeaseLockManager, LeaseOptions, LockStats};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::StoreKind;
use crate::stock::{Deduction, StockError, StockLedger, deduct_one};

/// Shared by every worker.
pub struct AppState {
    pub manager: LeaseLockManager,
    pub ledger: Arc<dyn StockLedger>,
    pub store_kind: StoreKind,
    pub lock_key: String,
    pub stock_key: String,
    pub lease_options: LeaseOptions,
    pub work: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    fn response(status: StatusCode, code: &str, message: impl ToString) -> HttpResponse {
        HttpResponse::build(status).json(ErrorBody {
            code: code.to_string(),
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeductResponse {
    #[serde(flatten)]
    pub deduction: Deduction,
    /// Set when the deduction went through but the lease could not be released cleanly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockResponse {
    pub key: String,
    pub stock: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub store: String,
    pub client_id: String,
    pub lock: LockStats,
}

#[route("/deduct_stock", method = "GET", method = "POST")]
async fn deduct_stock(state: web::Data<AppState>) -> impl Responder {
    let options = &state.lease_options;
    let result = state
        .manager
        .with_lock(
            &state.lock_key,
            options.lease_duration,
            options.wait_timeout,
            async |guard| {
                deduct_one(state.ledger.as_ref(), &state.stock_key, guard, state.work).await
            },
        )
        .await;

    match result {
        Ok(Guarded {
            value: Ok(deduction),
            release,
        }) => {
            let release_error = release.err().map(|e| {
                warn!(key = %state.lock_key, error = %e, "Deduction done but release failed");
                e.to_string()
            });
            HttpResponse::Ok().json(DeductResponse {
                deduction,
                release_error,
            })
        }
        Ok(Guarded { value: Err(e), .. }) => match e {
            StockError::LeaseLost(lost) => {
                warn!(key = %state.lock_key, reason = %lost, "Lease lost during deduction");
                ErrorBody::response(StatusCode::CONFLICT, "lease_lost", lost)
            }
            other => {
                error!(key = %state.stock_key, error = %other, "Stock update failed");
                ErrorBody::response(StatusCode::INTERNAL_SERVER_ERROR, "stock_error", other)
            }
        },
        Err(e @ AcquireError::Timeout { .. }) => {
            ErrorBody::response(StatusCode::CONFLICT, "lock_not_acquired", e)
        }
        Err(e) => {
            error!(key = %state.lock_key, error = %e, "Lock request rejected");
            ErrorBody::response(StatusCode::INTERNAL_SERVER_ERROR, "invalid_lock", e)
        }
    }
}

#[get("/stock")]
async fn stock(state: web::Data<AppState>) -> impl Responder {
    match state.ledger.get(&state.stock_key).await {
        Ok(value) => HttpResponse::Ok().json(StockResponse {
            key: state.stock_key.clone(),
            stock: value.unwrap_or(0),
        }),
        Err(e) => {
            error!(key = %state.stock_key, error = %e, "Failed to read stock");
            ErrorBody::response(StatusCode::INTERNAL_SERVER_ERROR, "stock_error", e)
        }
    }
}

#[get("/stats")]
async fn stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(StatsResponse {
        store: state.store_kind.to_string(),
        client_id: state.manager.client_id().to_string(),
        lock: state.manager.stats(),
    })
}

pub fn routes() -> Scope {
    web::scope("")
        .service(deduct_stock)
        .service(stock)
        .service(stats)
}
