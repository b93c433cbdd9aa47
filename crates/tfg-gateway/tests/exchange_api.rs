// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests of the exchange pipeline through the router.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use tfg_billing::BillingBuffer;
use tfg_config::Settings;
use tfg_crypto::ExportSigner;
use tfg_gateway::{AppState, MappingSet, build_router};
use tfg_repair::{FallbackProvider, NullProvider, RepairOutcome};
use tfg_store::{ReceiptStore, SqliteStore};

const SEED_KID: &str = "gw-key-1";

fn test_settings() -> Settings {
    let api_keys = r#"{
        "test-key": {
            "tenant": "acme",
            "allowlist": ["localhost"],
            "fallback_enabled": true,
            "stripe_item_vex": "si_vex",
            "stripe_item_fu": "si_fu"
        },
        "nofb-key": {
            "tenant": "basic",
            "allowlist": [],
            "fallback_enabled": false
        }
    }"#;
    Settings::from_lookup(|name| match name {
        "API_KEYS" => Some(api_keys.to_string()),
        "HEL_ALLOWLIST" => Some("hooks.example.com".to_string()),
        _ => None,
    })
    .expect("test settings parse")
}

fn test_signer() -> Arc<ExportSigner> {
    let seed = tfg_crypto::b64url_encode(&[9u8; 32]);
    Arc::new(ExportSigner::from_seed_b64(&seed, SEED_KID).expect("test signer"))
}

async fn app_with(fallback: Arc<dyn FallbackProvider>) -> (Router, Arc<AppState>) {
    let store: Arc<dyn ReceiptStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let state = Arc::new(AppState {
        settings: Arc::new(test_settings()),
        store: store.clone(),
        signer: Some(test_signer()),
        fallback,
        mapping: Arc::new(MappingSet::invoice_demo().unwrap()),
        billing: Arc::new(BillingBuffer::new(store, None, BTreeMap::new())),
    });
    (build_router(state.clone()), state)
}

async fn app() -> (Router, Arc<AppState>) {
    app_with(Arc::new(NullProvider)).await
}

fn invoice_args() -> String {
    json!({
        "invoice_id": "INV-1",
        "amount": 123.45,
        "currency": "USD",
        "customer_name": "Acme",
        "description": "Services",
    })
    .to_string()
}

fn exchange_body(trace_id: &str, args: &str) -> Value {
    json!({
        "trace_id": trace_id,
        "payload_type": "openai.tooluse.invoice.v1",
        "target_type": "invoice.iso20022.v1",
        "payload": {
            "tool_calls": [{
                "id": "call_1",
                "function": {"name": "create_invoice", "arguments": args},
            }],
        },
    })
}

fn post_exchange(body: &Value, api_key: Option<&str>, idem: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/exchange")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("API-Key", key);
    }
    if let Some(idem) = idem {
        builder = builder.header("Idempotency-Key", idem);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Plumbing endpoints ─────────────────────────────────────────────

#[tokio::test]
async fn healthz_reports_storage_backend() {
    let (router, _) = app().await;
    let resp = router
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["storage"], "sqlite");
    assert!(body["ts"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn metrics_exposition_is_text() {
    let (router, _) = app().await;
    let resp = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(ct.starts_with("text/plain"));
}

#[tokio::test]
async fn jwks_publishes_single_ed25519_key() {
    let (router, _) = app().await;
    let resp = router
        .oneshot(
            Request::get("/.well-known/jwks.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);
    assert_eq!(body["keys"][0]["kty"], "OKP");
    assert_eq!(body["keys"][0]["crv"], "Ed25519");
    assert_eq!(body["keys"][0]["kid"], SEED_KID);
}

// ── Auth and idempotency preconditions ─────────────────────────────

#[tokio::test]
async fn missing_api_key_is_401() {
    let (router, _) = app().await;
    let body = exchange_body("t1", &invoice_args());
    let resp = router
        .oneshot(post_exchange(&body, None, Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["reason"], "MISSING_KEY");
}

#[tokio::test]
async fn unknown_api_key_is_401() {
    let (router, _) = app().await;
    let body = exchange_body("t1", &invoice_args());
    let resp = router
        .oneshot(post_exchange(&body, Some("wrong"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["reason"], "INVALID_KEY");
}

#[tokio::test]
async fn missing_idempotency_key_is_400() {
    let (router, _) = app().await;
    let body = exchange_body("t1", &invoice_args());
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["reason"], "MISSING_IDEM");
}

// ── Happy path ─────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_normalizes_and_appends_receipt() {
    let (router, state) = app().await;
    let body = exchange_body("trace-s1", &invoice_args());
    let resp = router
        .clone()
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["Trace"], "trace-s1");

    let out = body_json(resp).await;
    assert_eq!(out["trace_id"], "trace-s1");
    assert_eq!(out["normalized"]["amount"]["minor"], 12345);
    assert_eq!(out["normalized"]["amount"]["currency"], "USD");
    assert_eq!(out["normalized"]["invoice_id"], "INV-1");
    assert_eq!(out["policy"]["engine"], "HEL");
    assert_eq!(out["policy"]["allowed"], true);
    assert_eq!(out["receipt"]["hop"], 1);
    assert!(out["receipt"]["prev_receipt_hash"].is_null());
    assert!(out.get("forwarded").is_none());

    let chain = state.store.get_chain("trace-s1").await.unwrap();
    assert_eq!(chain.len(), 1);
    tfg_receipt::verify_chain(&chain).unwrap();
    assert_eq!(
        chain[0].receipt_hash.as_deref().unwrap(),
        out["receipt"]["receipt_hash"].as_str().unwrap()
    );
}

#[tokio::test]
async fn second_hop_links_to_first() {
    let (router, state) = app().await;
    let body = exchange_body("trace-2hop", &invoice_args());
    let first = router
        .clone()
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-a")))
        .await
        .unwrap();
    let first = body_json(first).await;

    let second = router
        .clone()
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-b")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;
    assert_eq!(second["receipt"]["hop"], 2);
    assert_eq!(
        second["receipt"]["prev_receipt_hash"],
        first["receipt"]["receipt_hash"]
    );

    let chain = state.store.get_chain("trace-2hop").await.unwrap();
    assert_eq!(chain.len(), 2);
    tfg_receipt::verify_chain(&chain).unwrap();
}

#[tokio::test]
async fn heuristically_repairable_arguments_accepted() {
    let (router, _) = app().await;
    let broken = "{'invoice_id': 'INV-1', 'amount': 123.45, 'currency': 'USD', 'customer_name': 'Acme', 'description': 'Services'}";
    let body = exchange_body("trace-heur", broken);
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let out = body_json(resp).await;
    assert_eq!(out["normalized"]["amount"]["minor"], 12345);
}

// ── Idempotent replay ──────────────────────────────────────────────

#[tokio::test]
async fn replay_returns_identical_body_and_marks_hit() {
    let (router, state) = app().await;
    let body = exchange_body("trace-idem", &invoice_args());

    let first = router
        .clone()
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-x")))
        .await
        .unwrap();
    assert!(first.headers().get("Idempotency-Hit").is_none());
    let first = body_json(first).await;

    let second = router
        .clone()
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-x")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["Idempotency-Hit"], "1");
    let second = body_json(second).await;
    assert_eq!(first, second);

    // No second receipt was appended.
    let chain = state.store.get_chain("trace-idem").await.unwrap();
    assert_eq!(chain.len(), 1);
}

// ── Schema validation ──────────────────────────────────────────────

#[tokio::test]
async fn unsupported_mapping_is_422() {
    let (router, _) = app().await;
    let mut body = exchange_body("t", &invoice_args());
    body["target_type"] = json!("other.v9");
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["reason"], "INPUT_SCHEMA_INVALID");
}

#[tokio::test]
async fn invalid_source_payload_is_422() {
    let (router, _) = app().await;
    let mut body = exchange_body("t", &invoice_args());
    body["payload"] = json!({"tool_calls": []});
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let out = body_json(resp).await;
    assert_eq!(out["reason"], "INPUT_SCHEMA_INVALID");
    assert!(out["error"].as_str().unwrap().len() <= 200);
}

// ── Fallback path ──────────────────────────────────────────────────

struct ScriptedProvider {
    text: String,
    tokens: u64,
}

#[async_trait]
impl FallbackProvider for ScriptedProvider {
    async fn repair(&self, _raw: &str, _schema: &serde_json::Value) -> RepairOutcome {
        RepairOutcome::repaired(self.text.clone(), self.tokens)
    }
}

const HOPELESS_ARGS: &str =
    "invoice INV-1 \"amount\": 1000.00 \"currency\": \"USD\" \"customer_name\": \"Acme\" oops";

#[tokio::test]
async fn fallback_disabled_tenant_is_429() {
    let (router, _) = app().await;
    let body = exchange_body("t", HOPELESS_ARGS);
    let resp = router
        .oneshot(post_exchange(&body, Some("nofb-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(resp).await["reason"], "FALLBACK_DISABLED");
}

#[tokio::test]
async fn fallback_repair_amount_drift_is_denied() {
    let tampered = json!({
        "invoice_id": "INV-1",
        "amount": 10.00,
        "currency": "USD",
        "customer_name": "Acme",
        "description": "Services",
    });
    let provider = Arc::new(ScriptedProvider {
        text: tampered.to_string(),
        tokens: 64,
    });
    let (router, state) = app_with(provider).await;

    let body = exchange_body("trace-sem", HOPELESS_ARGS);
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let out = body_json(resp).await;
    assert!(
        out["reason"]
            .as_str()
            .unwrap()
            .starts_with("SEMANTIC_VIOLATION:")
    );
    assert!(out["error"].as_str().unwrap().to_lowercase().contains("amount"));

    // Denied exchanges leave no receipt behind.
    assert!(state.store.get_chain("trace-sem").await.unwrap().is_empty());
}

#[tokio::test]
async fn faithful_fallback_repair_is_accepted_and_metered() {
    let faithful = json!({
        "invoice_id": "INV-1",
        "amount": 1000.00,
        "currency": "USD",
        "customer_name": "Acme",
    });
    let provider = Arc::new(ScriptedProvider {
        text: faithful.to_string(),
        tokens: 88,
    });
    let (router, state) = app_with(provider).await;

    let body = exchange_body("trace-fb", HOPELESS_ARGS);
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let out = body_json(resp).await;
    assert_eq!(out["normalized"]["amount"]["minor"], 100_000);

    let chain = state.store.get_chain("trace-fb").await.unwrap();
    assert_eq!(chain[0].fallback_used, Some(true));
    assert_eq!(chain[0].fu_tokens, Some(88));
    tfg_receipt::verify_chain(&chain).unwrap();

    let usage = state
        .store
        .monthly_usage("acme", &tfg_store::current_month_start())
        .await
        .unwrap();
    assert_eq!(usage.vex_used, 1);
    assert_eq!(usage.fu_used, 88);
}

// ── Policy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn forward_host_off_allowlist_is_403() {
    let (router, state) = app().await;
    let mut body = exchange_body("trace-pol", &invoice_args());
    body["forward_url"] = json!("https://evil.example.net/post");
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["reason"], "HEL_HOST_NOT_ALLOWED");
    assert!(state.store.get_chain("trace-pol").await.unwrap().is_empty());
}

#[tokio::test]
async fn forward_host_resolving_to_loopback_is_403() {
    let (router, state) = app().await;
    let mut body = exchange_body("trace-loop", &invoice_args());
    // "localhost" is on the tenant allowlist, so this exercises the
    // resolver stage rather than the allowlist.
    body["forward_url"] = json!("https://localhost/post");
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["reason"], "HEL_RESOLVED_LOOPBACK");
    assert!(state.store.get_chain("trace-loop").await.unwrap().is_empty());

    // No receipt, no usage, no billing for denied exchanges.
    let usage = state
        .store
        .monthly_usage("acme", &tfg_store::current_month_start())
        .await
        .unwrap();
    assert_eq!(usage.vex_used, 0);
}

#[tokio::test]
async fn http_scheme_forward_is_403() {
    let (router, _) = app().await;
    let mut body = exchange_body("t", &invoice_args());
    body["forward_url"] = json!("http://hooks.example.com/post");
    let resp = router
        .oneshot(post_exchange(&body, Some("test-key"), Some("idem-1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["reason"], "HEL_SCHEME_NOT_HTTPS");
}

// ── Chain read + export ────────────────────────────────────────────

#[tokio::test]
async fn chain_endpoint_returns_ordered_receipts() {
    let (router, _) = app().await;
    let body = exchange_body("trace-read", &invoice_args());
    for idem in ["a", "b"] {
        router
            .clone()
            .oneshot(post_exchange(&body, Some("test-key"), Some(idem)))
            .await
            .unwrap();
    }
    let resp = router
        .oneshot(
            Request::get("/v1/receipts/chain/trace-read")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let chain = body_json(resp).await;
    let chain = chain.as_array().unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0]["hop"], 1);
    assert_eq!(chain[1]["hop"], 2);
    assert_eq!(chain[1]["prev_receipt_hash"], chain[0]["receipt_hash"]);
}

#[tokio::test]
async fn export_unknown_trace_is_404() {
    let (router, _) = app().await;
    let resp = router
        .oneshot(
            Request::get("/v1/receipts/export/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_export_verifies_against_jwks() {
    let (router, _) = app().await;
    let body = exchange_body("trace-exp", &invoice_args());
    for idem in ["a", "b"] {
        router
            .clone()
            .oneshot(post_exchange(&body, Some("test-key"), Some(idem)))
            .await
            .unwrap();
    }

    let resp = router
        .clone()
        .oneshot(
            Request::get("/v1/receipts/export/trace-exp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bundle_cid = resp.headers()["Response-CID"].to_str().unwrap().to_string();
    let signature = resp.headers()["Signature"].to_str().unwrap().to_string();
    let kid = resp.headers()["KID"].to_str().unwrap().to_string();
    assert_eq!(kid, SEED_KID);

    let bundle = body_json(resp).await;
    assert_eq!(bundle["trace_id"], "trace-exp");
    assert_eq!(bundle["chain"].as_array().unwrap().len(), 2);
    assert_eq!(tfg_canon::cid(&bundle).unwrap(), bundle_cid);

    // Offline verification: JWKS key + reconstructed payload.
    let jwks = body_json(
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
    let jwk: tfg_crypto::Jwk = serde_json::from_value(jwks["keys"][0].clone()).unwrap();
    let signed = tfg_crypto::SignedExport {
        bundle_cid,
        exported_at: bundle["exported_at"].as_str().unwrap().to_string(),
        signature,
        kid,
    };
    tfg_crypto::verify_export(&jwk, "trace-exp", &signed).unwrap();
}
