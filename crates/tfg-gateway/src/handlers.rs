// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read-side endpoints: health, metrics, JWKS, chain read and export.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tfg_crypto::JwkSet;
use tfg_receipt::now_ts;
use tfg_store::ReceiptStore;

use crate::error::{GatewayError, ReasonCode};
use crate::AppState;

/// `GET /healthz`
pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "storage": state.store.backend_name(),
        "ts": now_ts(),
    }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics() -> Result<Response, GatewayError> {
    let text = tfg_metrics::gather_text().map_err(GatewayError::internal)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

/// `GET /.well-known/jwks.json`: empty key list when unsigned.
pub async fn jwks(State(state): State<Arc<AppState>>) -> Json<JwkSet> {
    let keys = state
        .signer
        .as_ref()
        .map(|signer| vec![signer.jwk()])
        .unwrap_or_default();
    Json(JwkSet { keys })
}

/// `GET /v1/receipts/chain/{trace_id}`: ordered receipts, empty for an
/// unknown trace.
pub async fn get_chain(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> Result<Response, GatewayError> {
    let chain = state
        .store
        .get_chain(&trace_id)
        .await
        .map_err(GatewayError::internal)?;
    Ok(Json(chain).into_response())
}

/// `GET /v1/receipts/export/{trace_id}`: signed export bundle.
pub async fn export_chain(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> Result<Response, GatewayError> {
    let chain = state
        .store
        .get_chain(&trace_id)
        .await
        .map_err(GatewayError::internal)?;
    if chain.is_empty() {
        return Err(GatewayError::new(
            StatusCode::NOT_FOUND,
            ReasonCode::NotFound,
            "trace not found",
        ));
    }

    let exported_at = now_ts();
    let bundle = json!({
        "trace_id": trace_id.as_str(),
        "chain": chain,
        "exported_at": exported_at.as_str(),
    });

    let mut resp = Json(&bundle).into_response();
    if let Some(signer) = &state.signer {
        let signed = signer
            .sign_export(&trace_id, &exported_at, &bundle)
            .map_err(GatewayError::internal)?;
        let headers = resp.headers_mut();
        headers.insert(
            "Response-CID",
            HeaderValue::from_str(&signed.bundle_cid).map_err(GatewayError::internal)?,
        );
        headers.insert(
            "Signature",
            HeaderValue::from_str(&signed.signature).map_err(GatewayError::internal)?,
        );
        headers.insert(
            "KID",
            HeaderValue::from_str(&signed.kid).map_err(GatewayError::internal)?,
        );
    }
    Ok(resp)
}
