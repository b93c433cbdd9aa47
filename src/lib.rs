// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "TrustFabric: a trust-fabric gateway for inter-agent tool calls."]
#![deny(unsafe_code)]

//! Umbrella crate re-exporting the workspace members under one roof.
//!
//! A client submits a model-produced tool call; the gateway validates it
//! against a source schema, normalizes it to a target schema, enforces
//! an egress policy on the optional downstream recipient, and appends a
//! hash-linked receipt to the trace's chain. Chains export as signed
//! bundles verifiable offline against the published JWKS.
//!
//! Depend on the individual `tfg-*` crates for narrow use; depend on
//! this crate for everything (integration tests and benches here do).

pub use tfg_billing as billing;
pub use tfg_canon as canon;
pub use tfg_config as config;
pub use tfg_crypto as crypto;
pub use tfg_gateway as gateway;
pub use tfg_hel as hel;
pub use tfg_invariants as invariants;
pub use tfg_metrics as metrics;
pub use tfg_receipt as receipt;
pub use tfg_repair as repair;
pub use tfg_store as store;
pub use tfg_transform as transform;
