// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Host Egress List: allowlist policy, public-IP resolution, IP-pinned forwarding."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! HEL decides whether an exchange may forward its normalized payload to
//! a downstream recipient, and performs that forward safely:
//!
//! - the URL must be `https` and its host on an allowlist;
//! - every resolved address must be public (loopback, RFC 1918, and
//!   link-local ranges deny the exchange);
//! - the actual connection is pinned to one resolved public IP while SNI
//!   and the Host header keep the original hostname, defeating DNS
//!   rebinding between check and use.
//!
//! Nothing here caches DNS answers; every evaluation re-resolves.

mod forward;
mod policy;
mod resolver;

pub use forward::{ForwardOutcome, MAX_RESPONSE_BYTES, forward};
pub use policy::{Decision, evaluate};
pub use resolver::{HelReason, classify_ip, resolve_public};
