// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Ed25519 export signing and JWKS publication."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Signing of exported receipt bundles and publication of the verifying
//! key as a JWK.
//!
//! The signed payload is the UTF-8 encoding of
//! `bundle_cid + "|" + trace_id + "|" + exported_at`, where `bundle_cid`
//! is the content identifier of the canonicalized bundle. A third party
//! holding the JWKS document can re-derive those bytes offline and verify
//! the signature without contacting the gateway.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from key loading, signing, or verification.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The configured seed was not valid base64url.
    #[error("signing seed is not valid base64url: {0}")]
    SeedEncoding(#[from] base64::DecodeError),

    /// The decoded seed was not exactly 32 bytes.
    #[error("signing seed must be a 32-byte Ed25519 seed, got {0} bytes")]
    SeedLength(usize),

    /// The JWK `x` coordinate did not decode to a valid public key.
    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,

    /// The signature did not decode or did not verify.
    #[error("signature verification failed")]
    VerificationFailed,

    /// The bundle could not be canonicalized for hashing.
    #[error(transparent)]
    Canon(#[from] tfg_canon::CanonError),
}

/// Decode unpadded base64url into bytes.
///
/// # Errors
///
/// Returns [`CryptoError::SeedEncoding`] when the input is not base64url.
pub fn b64url_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))?)
}

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A public JWK for an Ed25519 verifying key (`kty=OKP`, `alg=EdDSA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `"OKP"`.
    pub kty: String,
    /// Curve, always `"Ed25519"`.
    pub crv: String,
    /// Public key bytes, base64url unpadded.
    pub x: String,
    /// Key identifier.
    pub kid: String,
    /// Key use, always `"sig"`.
    #[serde(rename = "use")]
    pub use_: String,
    /// Signature algorithm, always `"EdDSA"`.
    pub alg: String,
}

/// The JWKS document served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    /// Published keys; empty when the gateway runs unsigned.
    pub keys: Vec<Jwk>,
}

/// Signed attestation over an export bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedExport {
    /// Content identifier of the canonicalized bundle.
    pub bundle_cid: String,
    /// Timestamp the bundle was exported at (same value as in the bundle).
    pub exported_at: String,
    /// Ed25519 signature, base64url unpadded.
    pub signature: String,
    /// Key identifier of the signing key.
    pub kid: String,
}

/// Holder of the gateway's Ed25519 signing key.
///
/// Constructed once at startup from configuration; absence of a seed in
/// the configuration simply means no `ExportSigner` exists and exports go
/// out unsigned.
pub struct ExportSigner {
    signing_key: SigningKey,
    kid: String,
}

impl std::fmt::Debug for ExportSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("ExportSigner")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl ExportSigner {
    /// Load a signer from an unpadded base64url 32-byte seed and a key id.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SeedEncoding`] or [`CryptoError::SeedLength`]
    /// when the seed is malformed.
    pub fn from_seed_b64(seed_b64: &str, kid: impl Into<String>) -> Result<Self, CryptoError> {
        let bytes = b64url_decode(seed_b64)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::SeedLength(bytes.len()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
            kid: kid.into(),
        })
    }

    /// The key identifier this signer publishes under.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The verifying key as a public JWK.
    #[must_use]
    pub fn jwk(&self) -> Jwk {
        let vk = self.signing_key.verifying_key();
        Jwk {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: b64url_encode(vk.as_bytes()),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
        }
    }

    /// Sign an export bundle.
    ///
    /// `bundle` must already contain `trace_id` and `exported_at`; the
    /// signature covers `bundle_cid|trace_id|exported_at` so the signed
    /// timestamp is exactly the one embedded in the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Canon`] if the bundle cannot be
    /// canonicalized (non-finite numbers).
    pub fn sign_export(
        &self,
        trace_id: &str,
        exported_at: &str,
        bundle: &Value,
    ) -> Result<SignedExport, CryptoError> {
        let bundle_cid = tfg_canon::cid(bundle)?;
        let payload = signing_payload(&bundle_cid, trace_id, exported_at);
        let sig = self.signing_key.sign(payload.as_bytes());
        Ok(SignedExport {
            bundle_cid,
            exported_at: exported_at.to_string(),
            signature: b64url_encode(&sig.to_bytes()),
            kid: self.kid.clone(),
        })
    }
}

/// The exact byte string covered by an export signature.
#[must_use]
pub fn signing_payload(bundle_cid: &str, trace_id: &str, exported_at: &str) -> String {
    format!("{bundle_cid}|{trace_id}|{exported_at}")
}

/// Verify a signed export against a published JWK.
///
/// Reconstructs the signing payload from the bundle and checks the
/// signature with the key in `jwk`. This is the same check an offline
/// verifier performs.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] for a malformed JWK and
/// [`CryptoError::VerificationFailed`] when the signature does not match.
pub fn verify_export(jwk: &Jwk, trace_id: &str, signed: &SignedExport) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = b64url_decode(&jwk.x)?
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let vk = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;

    let sig_bytes: [u8; 64] = b64url_decode(&signed.signature)?
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::VerificationFailed)?;
    let sig = Signature::from_bytes(&sig_bytes);

    let payload = signing_payload(&signed.bundle_cid, trace_id, &signed.exported_at);
    vk.verify(payload.as_bytes(), &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}
