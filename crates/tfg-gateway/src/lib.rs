// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "TrustFabric gateway: HTTP boundary and the exchange pipeline."]
#![deny(unsafe_code)]

//! The synchronous exchange pipeline behind `POST /v1/exchange`, plus
//! the read-side endpoints (health, metrics, JWKS, chain read/export).
//!
//! All shared context lives in [`AppState`], built once at startup:
//! settings, store, signer, fallback provider, the compiled mapping set,
//! and the billing buffer. Handlers never reach for globals.

mod error;
mod exchange;
mod handlers;
mod mapping;

pub use error::{GatewayError, ReasonCode};
pub use mapping::{MappingSet, MappingSetError};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use tfg_billing::BillingBuffer;
use tfg_config::Settings;
use tfg_crypto::ExportSigner;
use tfg_repair::FallbackProvider;
use tfg_store::ReceiptStore;

/// Shared, immutable application context.
pub struct AppState {
    /// Process settings, loaded once from the environment.
    pub settings: Arc<Settings>,
    /// The transactional substrate.
    pub store: Arc<dyn ReceiptStore>,
    /// Export signer; `None` runs the gateway unsigned.
    pub signer: Option<Arc<ExportSigner>>,
    /// LLM repair provider (the null provider when unconfigured).
    pub fallback: Arc<dyn FallbackProvider>,
    /// Compiled schema pair + mapping document.
    pub mapping: Arc<MappingSet>,
    /// Billing buffer over the store and payment sink.
    pub billing: Arc<BillingBuffer>,
}

/// Build the gateway router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/v1/receipts/chain/{trace_id}", get(handlers::get_chain))
        .route("/v1/receipts/export/{trace_id}", get(handlers::export_chain))
        .route("/v1/exchange", post(exchange::exchange))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically drain the billing queue to the payment sink.
///
/// Runs until the process exits; sink failures are retried by the
/// buffer and never surface beyond a log line.
pub fn spawn_billing_flush(
    billing: Arc<BillingBuffer>,
    interval: Duration,
    batch_size: u32,
    max_retries: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = billing.flush(batch_size, max_retries).await;
            if report.flushed > 0 || report.retries > 0 {
                debug!(
                    flushed = report.flushed,
                    retries = report.retries,
                    "billing flush pass"
                );
            }
        }
    })
}
