// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-crate pipeline scenarios, driven through the public router:
//! verified exchange, idempotent replay, policy denial, and offline
//! verification of a signed export bundle.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use trustfabric::billing::BillingBuffer;
use trustfabric::config::Settings;
use trustfabric::crypto::{self, ExportSigner};
use trustfabric::gateway::{AppState, MappingSet, build_router};
use trustfabric::repair::NullProvider;
use trustfabric::store::{ReceiptStore, SqliteStore};

async fn gateway() -> (Router, Arc<AppState>) {
    let api_keys = r#"{
        "e2e-key": {
            "tenant": "acme",
            "allowlist": ["localhost"],
            "fallback_enabled": false
        }
    }"#;
    let settings = Settings::from_lookup(|name| match name {
        "API_KEYS" => Some(api_keys.to_string()),
        _ => None,
    })
    .unwrap();

    let store: Arc<dyn ReceiptStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let seed = crypto::b64url_encode(&[42u8; 32]);
    let state = Arc::new(AppState {
        settings: Arc::new(settings),
        store: store.clone(),
        signer: Some(Arc::new(
            ExportSigner::from_seed_b64(&seed, "e2e-kid").unwrap(),
        )),
        fallback: Arc::new(NullProvider),
        mapping: Arc::new(MappingSet::invoice_demo().unwrap()),
        billing: Arc::new(BillingBuffer::new(store, None, BTreeMap::new())),
    });
    (build_router(state.clone()), state)
}

fn exchange_request(trace: &str, idem: &str, forward_url: Option<&str>) -> Request<Body> {
    let mut body = json!({
        "trace_id": trace,
        "payload_type": "openai.tooluse.invoice.v1",
        "target_type": "invoice.iso20022.v1",
        "payload": {
            "tool_calls": [{
                "function": {
                    "name": "create_invoice",
                    "arguments": "{\"invoice_id\":\"INV-1\",\"amount\":123.45,\"currency\":\"USD\",\"customer_name\":\"Acme\",\"description\":\"Services\"}",
                },
            }],
        },
    });
    if let Some(url) = forward_url {
        body["forward_url"] = json!(url);
    }
    Request::post("/v1/exchange")
        .header(header::CONTENT_TYPE, "application/json")
        .header("API-Key", "e2e-key")
        .header("Idempotency-Key", idem)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn verified_exchange_end_to_end() {
    let (router, state) = gateway().await;

    let resp = router
        .clone()
        .oneshot(exchange_request("e2e-trace", "idem-1", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let out = json_body(resp).await;

    assert_eq!(out["normalized"]["amount"]["minor"], 12345);
    assert_eq!(out["normalized"]["amount"]["currency"], "USD");
    assert_eq!(out["receipt"]["hop"], 1);

    // The receipt's cid is the content identifier of the normalized
    // payload the caller got back.
    let recomputed = trustfabric::canon::cid(&out["normalized"]).unwrap();
    assert_eq!(out["receipt"]["cid"].as_str().unwrap(), recomputed);

    let chain = state.store.get_chain("e2e-trace").await.unwrap();
    trustfabric::receipt::verify_chain(&chain).unwrap();
}

#[tokio::test]
async fn replay_does_not_touch_storage() {
    let (router, state) = gateway().await;

    let first = router
        .clone()
        .oneshot(exchange_request("e2e-replay", "idem-r", None))
        .await
        .unwrap();
    let first = json_body(first).await;

    let second = router
        .clone()
        .oneshot(exchange_request("e2e-replay", "idem-r", None))
        .await
        .unwrap();
    assert_eq!(second.headers()["Idempotency-Hit"], "1");
    assert_eq!(json_body(second).await, first);

    assert_eq!(state.store.get_chain("e2e-replay").await.unwrap().len(), 1);
    let usage = state
        .store
        .monthly_usage("acme", &trustfabric::store::current_month_start())
        .await
        .unwrap();
    assert_eq!(usage.vex_used, 1, "replay records no extra usage");
}

#[tokio::test]
async fn ssrf_target_denies_before_any_side_effect() {
    let (router, state) = gateway().await;

    let resp = router
        .oneshot(exchange_request(
            "e2e-ssrf",
            "idem-s",
            Some("https://localhost/exfil"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let out = json_body(resp).await;
    assert_eq!(out["reason"], "HEL_RESOLVED_LOOPBACK");

    assert!(state.store.get_chain("e2e-ssrf").await.unwrap().is_empty());
    assert!(state.store.get_head("e2e-ssrf").await.unwrap().is_none());
}

#[tokio::test]
async fn export_bundle_verifies_offline() {
    let (router, _) = gateway().await;
    for idem in ["a", "b", "c"] {
        let resp = router
            .clone()
            .oneshot(exchange_request("e2e-export", idem, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = router
        .clone()
        .oneshot(
            Request::get("/v1/receipts/export/e2e-export")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let signed = crypto::SignedExport {
        bundle_cid: resp.headers()["Response-CID"].to_str().unwrap().to_string(),
        signature: resp.headers()["Signature"].to_str().unwrap().to_string(),
        kid: resp.headers()["KID"].to_str().unwrap().to_string(),
        exported_at: String::new(),
    };
    let bundle = json_body(resp).await;
    assert_eq!(bundle["chain"].as_array().unwrap().len(), 3);

    // An offline verifier re-derives everything from the bundle and the
    // published JWKS document alone.
    let jwks = json_body(
        router
            .oneshot(
                Request::get("/.well-known/jwks.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    let jwk: crypto::Jwk = serde_json::from_value(jwks["keys"][0].clone()).unwrap();

    let signed = crypto::SignedExport {
        exported_at: bundle["exported_at"].as_str().unwrap().to_string(),
        ..signed
    };
    assert_eq!(trustfabric::canon::cid(&bundle).unwrap(), signed.bundle_cid);
    crypto::verify_export(&jwk, "e2e-export", &signed).unwrap();
}
