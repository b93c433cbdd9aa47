// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tfg_billing::{BillingBuffer, PaymentSink, StripeSink, load_reserved_configs};
use tfg_config::{Settings, StorageKind};
use tfg_crypto::ExportSigner;
use tfg_gateway::{AppState, MappingSet, build_router, spawn_billing_flush};
use tfg_repair::{FallbackProvider, NullProvider, OpenAiProvider};
use tfg_store::{PostgresStore, ReceiptStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "tfg-gateway", version, about = "TrustFabric exchange gateway")]
struct Args {
    /// Bind address; overrides PORT from the environment.
    #[arg(long)]
    bind: Option<String>,

    /// Seconds between billing flush passes.
    #[arg(long, default_value_t = 30)]
    flush_interval: u64,

    /// Billing items attempted per flush pass.
    #[arg(long, default_value_t = 100)]
    flush_batch: u32,

    /// Delivery attempts before a billing item is dropped.
    #[arg(long, default_value_t = 5)]
    flush_max_retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tfg=info,tfg_gateway=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Arc::new(Settings::from_env().context("load settings")?);

    let store: Arc<dyn ReceiptStore> = match settings.storage {
        StorageKind::Sqlite => {
            if let Some(parent) = std::path::Path::new(&settings.db_path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create data dir {}", parent.display()))?;
            }
            Arc::new(
                SqliteStore::connect(&settings.db_path)
                    .await
                    .with_context(|| format!("open sqlite db {}", settings.db_path))?,
            )
        }
        StorageKind::Postgres => {
            let url = settings
                .postgres_url
                .as_deref()
                .context("POSTGRES_URL is required for postgres storage")?;
            Arc::new(
                PostgresStore::connect(url)
                    .await
                    .context("connect to postgres")?,
            )
        }
    };

    let signer = match (&settings.private_key_b64, &settings.kid) {
        (Some(seed), Some(kid)) => Some(Arc::new(
            ExportSigner::from_seed_b64(seed, kid).context("load signing key")?,
        )),
        _ => None,
    };

    let fallback: Arc<dyn FallbackProvider> = match &settings.openai_api_key {
        Some(key) => Arc::new(OpenAiProvider::new(key)),
        None => Arc::new(NullProvider),
    };

    let reserved = match &settings.reserved_config_path {
        Some(path) => load_reserved_configs(path).context("load reserved-capacity config")?,
        None => Default::default(),
    };
    let sink: Option<Arc<dyn PaymentSink>> = settings
        .stripe_api_key
        .as_deref()
        .map(|key| Arc::new(StripeSink::new(key)) as Arc<dyn PaymentSink>);
    let billing = Arc::new(BillingBuffer::new(store.clone(), sink, reserved));

    let mapping = Arc::new(MappingSet::invoice_demo().context("compile mapping set")?);

    let state = Arc::new(AppState {
        settings: settings.clone(),
        store,
        signer,
        fallback,
        mapping,
        billing: billing.clone(),
    });

    let _flush_task = spawn_billing_flush(
        billing,
        Duration::from_secs(args.flush_interval),
        args.flush_batch,
        args.flush_max_retries,
    );

    let bind = args
        .bind
        .unwrap_or_else(|| format!("0.0.0.0:{}", settings.port));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        bind = %bind,
        storage = state.store.backend_name(),
        signed = state.signer.is_some(),
        tenants = settings.api_keys.len(),
        "tfg-gateway listening"
    );

    axum::serve(listener, build_router(state))
        .await
        .context("serve")
}
