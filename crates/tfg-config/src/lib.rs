// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Environment-driven configuration for the TrustFabric gateway."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`Settings`] are loaded once at startup from the process environment
//! and passed into handlers as shared context. Nothing in the hot path
//! re-reads the environment.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `API_KEYS` was present but not a valid JSON map.
    #[error("API_KEYS is not a valid JSON map: {reason}")]
    InvalidApiKeys {
        /// Parse error detail.
        reason: String,
    },

    /// A numeric variable failed to parse.
    #[error("{name} is not a valid number: {value}")]
    InvalidNumber {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// PostgreSQL storage was selected without a connection string.
    #[error("STORAGE=postgres requires POSTGRES_URL")]
    MissingPostgresUrl,

    /// A signing key was configured without a key id (or vice versa).
    #[error("PRIVATE_KEY_B64 and KID must be set together")]
    PartialSignerConfig,
}

/// Which transactional substrate backs the receipt store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Embedded SQLite database file.
    Sqlite,
    /// External PostgreSQL server.
    Postgres,
}

impl StorageKind {
    /// Stable label used in `/healthz` and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Per-tenant configuration, keyed by API key in [`Settings::api_keys`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TenantConfig {
    /// Tenant display name; also the billing subject.
    pub tenant: String,

    /// Downstream hosts this tenant may forward to.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Whether the LLM fallback repair may run for this tenant.
    #[serde(default)]
    pub fallback_enabled: bool,

    /// Monthly cap on fallback tokens; `None` means unmetered.
    #[serde(default)]
    pub fu_monthly_limit: Option<u64>,

    /// Payment-sink item id for Verified Exchange units.
    #[serde(default)]
    pub stripe_item_vex: Option<String>,

    /// Payment-sink item id for Fallback Unit tokens.
    #[serde(default)]
    pub stripe_item_fu: Option<String>,
}

/// Immutable process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Tenant configuration map, keyed by opaque API key.
    pub api_keys: BTreeMap<String, TenantConfig>,

    /// Global forward-host allowlist (union with per-tenant lists).
    pub hel_allowlist: Vec<String>,

    /// Selected storage backend.
    pub storage: StorageKind,

    /// SQLite database path (used when `storage` is [`StorageKind::Sqlite`]).
    pub db_path: String,

    /// PostgreSQL connection string (used when `storage` is
    /// [`StorageKind::Postgres`]).
    pub postgres_url: Option<String>,

    /// Ed25519 signing seed, base64url unpadded; absence disables signing.
    pub private_key_b64: Option<String>,

    /// Key id published in the JWKS document.
    pub kid: Option<String>,

    /// Payment-sink API key; absence disables billing delivery.
    pub stripe_api_key: Option<String>,

    /// Fallback-provider API key; absence selects the null provider.
    pub openai_api_key: Option<String>,

    /// Path to the per-tenant reserved-capacity JSON document.
    pub reserved_config_path: Option<String>,

    /// Listener port.
    pub port: u16,
}

/// Default listener port.
pub const DEFAULT_PORT: u16 = 8088;

/// Default SQLite database path.
pub const DEFAULT_DB_PATH: &str = "./data/trustfabric.db";

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Recognized variables: `API_KEYS`, `HEL_ALLOWLIST`, `STORAGE`,
    /// `DB_PATH`, `POSTGRES_URL`, `PRIVATE_KEY_B64`, `KID`,
    /// `STRIPE_API_KEY`, `OPENAI_API_KEY`, `RESERVED_CONFIG`, `PORT`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed values or inconsistent
    /// combinations (postgres without URL, seed without kid).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an injectable variable lookup (testable).
    ///
    /// # Errors
    ///
    /// Same failure conditions as [`Settings::from_env`].
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_keys = match get("API_KEYS") {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str::<BTreeMap<String, TenantConfig>>(&raw).map_err(|e| {
                    ConfigError::InvalidApiKeys {
                        reason: e.to_string(),
                    }
                })?
            }
            _ => BTreeMap::new(),
        };

        let hel_allowlist = get("HEL_ALLOWLIST")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        let storage = match get("STORAGE").as_deref().map(str::to_ascii_lowercase) {
            Some(ref s) if s == "postgres" => StorageKind::Postgres,
            _ => StorageKind::Sqlite,
        };

        let postgres_url = get("POSTGRES_URL").filter(|s| !s.is_empty());
        if storage == StorageKind::Postgres && postgres_url.is_none() {
            return Err(ConfigError::MissingPostgresUrl);
        }

        let private_key_b64 = get("PRIVATE_KEY_B64").filter(|s| !s.is_empty());
        let kid = get("KID").filter(|s| !s.is_empty());
        if private_key_b64.is_some() != kid.is_some() {
            return Err(ConfigError::PartialSignerConfig);
        }

        let port = match get("PORT") {
            Some(raw) if !raw.is_empty() => {
                raw.parse::<u16>().map_err(|_| ConfigError::InvalidNumber {
                    name: "PORT".to_string(),
                    value: raw,
                })?
            }
            _ => DEFAULT_PORT,
        };

        Ok(Self {
            api_keys,
            hel_allowlist,
            storage,
            db_path: get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            postgres_url,
            private_key_b64,
            kid,
            stripe_api_key: get("STRIPE_API_KEY").filter(|s| !s.is_empty()),
            openai_api_key: get("OPENAI_API_KEY").filter(|s| !s.is_empty()),
            reserved_config_path: get("RESERVED_CONFIG").filter(|s| !s.is_empty()),
            port,
        })
    }

    /// Look up a tenant by API key.
    #[must_use]
    pub fn tenant_for_key(&self, api_key: &str) -> Option<&TenantConfig> {
        self.api_keys.get(api_key)
    }
}
