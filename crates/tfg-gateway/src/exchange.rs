// SPDX-License-Identifier: MIT OR Apache-2.0

//! The exchange pipeline behind `POST /v1/exchange`.
//!
//! Phase order: auth → idempotency lookup → sanitize → validate source →
//! parse/repair (heuristic, then metered fallback gated by the
//! invariant checker) → transform → validate target → policy →
//! optional forward → cid → chained append → usage → billing →
//! idempotency cache → respond. Every phase records its latency.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use tfg_hel::Decision;
use tfg_receipt::ReceiptBuilder;
use tfg_repair::{check_quota, estimate_tokens, repair_json_str, sanitize_value};
use tfg_store::{ReceiptStore, StoreError, UsageRow, current_month_start};

use crate::AppState;
use crate::error::{GatewayError, ReasonCode};

/// Records per-phase latency as the pipeline advances.
struct PhaseTimer {
    last: Instant,
}

impl PhaseTimer {
    fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    fn lap(&mut self, phase: &str) {
        tfg_metrics::observe_phase(phase, self.last.elapsed().as_secs_f64());
        self.last = Instant::now();
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /v1/exchange`
pub async fn exchange(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let mut phases = PhaseTimer::start();

    // ── AUTH ───────────────────────────────────────────────────────
    let api_key = header(&headers, "API-Key")
        .ok_or_else(|| {
            GatewayError::new(
                StatusCode::UNAUTHORIZED,
                ReasonCode::MissingKey,
                "missing api key header",
            )
        })?
        .to_string();
    let idem_key = header(&headers, "Idempotency-Key")
        .ok_or_else(|| {
            GatewayError::new(
                StatusCode::BAD_REQUEST,
                ReasonCode::MissingIdem,
                "missing idempotency header",
            )
        })?
        .to_string();
    let tenant_cfg = state
        .settings
        .tenant_for_key(&api_key)
        .ok_or_else(|| {
            GatewayError::new(
                StatusCode::UNAUTHORIZED,
                ReasonCode::InvalidKey,
                "invalid api key",
            )
        })?
        .clone();
    phases.lap("auth");

    // ── IDEM_LOOKUP ────────────────────────────────────────────────
    if let Some(cached) = state
        .store
        .get_idempotent(&api_key, &idem_key)
        .await
        .map_err(GatewayError::internal)?
    {
        tfg_metrics::IDEMPOTENT_HITS_TOTAL.inc();
        phases.lap("idem_lookup");
        debug!(tenant = %tenant_cfg.tenant, "idempotent replay");
        return Ok(replay(cached));
    }
    phases.lap("idem_lookup");

    // ── SANITIZE ───────────────────────────────────────────────────
    let body = sanitize_value(body);
    phases.lap("sanitize");

    let trace_id = body
        .get("trace_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let payload_type = body.get("payload_type").and_then(Value::as_str);
    let target_type = body.get("target_type").and_then(Value::as_str);
    let forward_url = body
        .get("forward_url")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut payload = match body.get("payload") {
        Some(p) if !p.is_null() => p.clone(),
        _ => {
            return Err(GatewayError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ReasonCode::InputSchemaInvalid,
                "missing payload_type/target_type/payload",
            ));
        }
    };
    let (Some(payload_type), Some(target_type)) = (payload_type, target_type) else {
        return Err(GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::InputSchemaInvalid,
            "missing payload_type/target_type/payload",
        ));
    };
    if !state.mapping.supports(payload_type, target_type) {
        return Err(GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::InputSchemaInvalid,
            format!("unsupported mapping {payload_type} -> {target_type}"),
        ));
    }

    // ── VALIDATE_SRC ───────────────────────────────────────────────
    state.mapping.validate_source(&payload).map_err(|e| {
        GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::InputSchemaInvalid,
            format!("input schema invalid: {e}"),
        )
    })?;
    phases.lap("validate_src");

    // ── PARSE_ARGS / REPAIR ────────────────────────────────────────
    tfg_metrics::REPAIR_ATTEMPTS_TOTAL.inc();
    let args_str = payload["tool_calls"][0]["function"]["arguments"]
        .as_str()
        .ok_or_else(|| {
            GatewayError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ReasonCode::ArgumentsUnparseable,
                "function.arguments is not a string",
            )
        })?
        .to_string();

    let mut fallback_used = false;
    let mut fu_tokens = 0u64;
    let args_obj = match repair_json_str(&args_str) {
        Some(v) => {
            tfg_metrics::REPAIR_SUCCESS_TOTAL.inc();
            phases.lap("repair_heuristic");
            v
        }
        None => {
            phases.lap("repair_heuristic");
            let repaired = fallback_repair(&state, &tenant_cfg, &args_str, &mut phases).await?;
            fallback_used = true;
            fu_tokens = repaired.fu_tokens;
            repaired.value
        }
    };
    payload["tool_calls"][0]["function"]["arguments"] = args_obj;

    // ── TRANSFORM ──────────────────────────────────────────────────
    let normalized = state.mapping.transform(&payload).map_err(|e| {
        GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::OutputSchemaInvalid,
            format!("transform failed: {e}"),
        )
    })?;
    phases.lap("transform");

    // ── VALIDATE_TGT ───────────────────────────────────────────────
    state.mapping.validate_target(&normalized).map_err(|e| {
        GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::OutputSchemaInvalid,
            format!("normalized schema invalid: {e}"),
        )
    })?;
    phases.lap("validate_tgt");

    // ── POLICY ─────────────────────────────────────────────────────
    let decision: Decision = tfg_hel::evaluate(
        &tenant_cfg.allowlist,
        &state.settings.hel_allowlist,
        forward_url.as_deref(),
    )
    .await;
    phases.lap("policy");
    if !decision.allowed {
        return Err(GatewayError::new(
            StatusCode::FORBIDDEN,
            ReasonCode::Policy(decision.reason.clone()),
            decision.reason,
        ));
    }

    // ── FORWARD (optional) ─────────────────────────────────────────
    let forwarded = match &forward_url {
        Some(url) => {
            let outcome = tfg_hel::forward(url, &normalized).await;
            if outcome.status_code < 600 {
                tfg_metrics::FORWARD_TOTAL
                    .with_label_values(&[outcome.host.as_str()])
                    .inc();
            }
            phases.lap("forward");
            Some(outcome)
        }
        None => None,
    };

    // ── CID ────────────────────────────────────────────────────────
    let cid = tfg_canon::cid(&normalized).map_err(GatewayError::internal)?;
    phases.lap("cid");

    // ── APPEND_RECEIPT ─────────────────────────────────────────────
    let head = state
        .store
        .get_head(&trace_id)
        .await
        .map_err(GatewayError::internal)?;
    let (hop, prev) = match &head {
        Some(h) => (h.last_hop + 1, Some(h.last_receipt_hash.clone())),
        None => (1, None),
    };

    let mut builder = ReceiptBuilder::new(trace_id.as_str(), tenant_cfg.tenant.as_str())
        .hop(hop)
        .cid(cid.as_str())
        .policy(decision.snapshot());
    if let Some(prev_hash) = &prev {
        builder = builder.prev_receipt_hash(prev_hash.as_str());
    }
    if fallback_used {
        builder = builder.fallback(fu_tokens);
    }
    let receipt = builder.with_hash().map_err(GatewayError::internal)?;

    match state.store.append_receipt(&receipt, prev.as_deref()).await {
        Ok(_) => {}
        Err(StoreError::ChainConflict) => {
            return Err(GatewayError::new(
                StatusCode::CONFLICT,
                ReasonCode::ChainConflict,
                "chain conflict",
            ));
        }
        Err(e) => return Err(GatewayError::internal(e)),
    }
    phases.lap("append_receipt");

    // ── RECORD_USAGE ───────────────────────────────────────────────
    state
        .store
        .record_usage(&UsageRow {
            api_key: api_key.clone(),
            tenant: tenant_cfg.tenant.clone(),
            trace_id: trace_id.clone(),
            hop,
            verified: true,
            vex_units: 1,
            fu_tokens,
            ts: receipt.ts.clone(),
        })
        .await
        .map_err(GatewayError::internal)?;
    tfg_metrics::VEX_UNITS_TOTAL.inc();
    if fu_tokens > 0 {
        tfg_metrics::FU_TOKENS_TOTAL.inc_by(fu_tokens as f64);
    }
    phases.lap("record_usage");

    // ── ENQUEUE_BILLING ────────────────────────────────────────────
    state
        .billing
        .enqueue_vex(
            &api_key,
            tenant_cfg.stripe_item_vex.as_deref(),
            1,
            &tenant_cfg.tenant,
        )
        .await;
    if fu_tokens > 0 {
        state
            .billing
            .enqueue_fu(
                &api_key,
                tenant_cfg.stripe_item_fu.as_deref(),
                fu_tokens,
                &tenant_cfg.tenant,
            )
            .await;
    }
    phases.lap("enqueue_billing");

    // ── RESPOND + CACHE_IDEM ───────────────────────────────────────
    let mut resp_body = json!({
        "trace_id": trace_id.as_str(),
        "normalized": normalized,
        "policy": decision.snapshot(),
        "receipt": {
            "ts": receipt.ts,
            "cid": cid,
            "receipt_hash": receipt.receipt_hash,
            "prev_receipt_hash": prev,
            "hop": hop,
        },
    });
    if let Some(outcome) = &forwarded {
        resp_body["forwarded"] = serde_json::to_value(outcome).map_err(GatewayError::internal)?;
    }

    state
        .store
        .cache_idempotent(&api_key, &idem_key, &resp_body)
        .await
        .map_err(GatewayError::internal)?;
    phases.lap("cache_idem");

    tfg_metrics::EXCHANGES_TOTAL.inc();
    tfg_metrics::EXCHANGE_LATENCY.observe(started.elapsed().as_secs_f64());
    info!(
        %trace_id,
        tenant = %tenant_cfg.tenant,
        hop,
        fallback_used,
        forwarded = forwarded.is_some(),
        "exchange verified"
    );

    let mut resp = Json(resp_body).into_response();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        resp.headers_mut().insert("Trace", value);
    }
    Ok(resp)
}

struct FallbackRepaired {
    value: Value,
    fu_tokens: u64,
}

/// Run the metered LLM fallback for arguments the heuristic ladder
/// could not fix, gating the result through the invariant checker.
async fn fallback_repair(
    state: &AppState,
    tenant_cfg: &tfg_config::TenantConfig,
    args_str: &str,
    phases: &mut PhaseTimer,
) -> Result<FallbackRepaired, GatewayError> {
    let estimated = estimate_tokens(args_str);
    let usage = state
        .store
        .monthly_usage(&tenant_cfg.tenant, &current_month_start())
        .await
        .map_err(GatewayError::internal)?;
    check_quota(tenant_cfg, usage.fu_used, estimated).map_err(|denial| {
        GatewayError::new(
            StatusCode::TOO_MANY_REQUESTS,
            ReasonCode::Quota(denial.code()),
            format!("fallback quota exceeded: {denial}"),
        )
    })?;

    let outcome = state
        .fallback
        .repair(args_str, &json!({"type": "object"}))
        .await;
    phases.lap("repair_fallback");

    let Some(repaired_text) = outcome.repaired_text else {
        return Err(GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::ArgumentsUnparseable,
            format!(
                "arguments parse/repair failed: {}",
                outcome.error.unwrap_or_default()
            ),
        ));
    };

    let report = tfg_invariants::validate_repair(args_str, &repaired_text);
    phases.lap("invariant_check");
    if !report.ok {
        tfg_metrics::SEMANTIC_VIOLATION_TOTAL.inc();
        let rule = report.violations[0].rule.as_str();
        let detail = report
            .messages()
            .into_iter()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::SemanticViolation(rule),
            format!("fallback repair violated semantic invariants: {detail}"),
        ));
    }

    let value: Value = serde_json::from_str(&repaired_text).map_err(|e| {
        GatewayError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            ReasonCode::ArgumentsUnparseable,
            format!("repaired arguments unparseable: {e}"),
        )
    })?;

    tfg_metrics::FALLBACK_USED_TOTAL.inc();
    Ok(FallbackRepaired {
        value,
        fu_tokens: outcome.fu_tokens,
    })
}

/// Return a cached response verbatim, marked as an idempotent hit.
fn replay(cached: Value) -> Response {
    let trace = cached
        .get("trace_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut resp = Json(cached).into_response();
    resp.headers_mut()
        .insert("Idempotency-Hit", HeaderValue::from_static("1"));
    if let Some(trace) = trace
        && let Ok(value) = HeaderValue::from_str(&trace)
    {
        resp.headers_mut().insert("Trace", value);
    }
    resp
}
