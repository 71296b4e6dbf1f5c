//! Stateless session tokens.
//!
//! A token is `base64url(json claims)` and `base64url(hmac_sha256)` of that
//! first part, joined by a dot. Claims name the account only; roles are
//! looked up again on every request.

use anyhow::{bail, Context};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "sub")]
    pub account_id: String,
    #[serde(rename = "iat")]
    pub issued_at_ms: i64,
    #[serde(rename = "exp")]
    pub expires_at_ms: i64,
}

impl SessionClaims {
    /// A session for `account_id` that lasts `ttl_secs` from `now_ms`.
    /// Lifetimes past the end of `i64` milliseconds are capped there.
    pub fn new(account_id: &str, now_ms: i64, ttl_secs: i64) -> Self {
        let ttl_ms = ttl_secs.max(0).saturating_mul(1000);
        Self {
            account_id: account_id.to_string(),
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

fn keyed_mac(secret: &str, payload_b64: &str) -> anyhow::Result<HmacSha256> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("invalid session signing key")?;
    mac.update(payload_b64.as_bytes());
    Ok(mac)
}

pub fn sign_session_token(claims: &SessionClaims, secret: &str) -> anyhow::Result<String> {
    let json = serde_json::to_vec(claims).context("failed to encode session claims")?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(json);
    let signature = keyed_mac(secret, &payload_b64)?.finalize().into_bytes();
    Ok(format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Checks shape, then signature (constant time), then expiry. Claims are
/// only parsed once the signature holds.
pub fn verify_session_token(
    token: &str,
    secret: &str,
    now_ms: i64,
) -> anyhow::Result<SessionClaims> {
    let Some((payload_b64, signature_b64)) = token.split_once('.') else {
        bail!("session token must have exactly two parts");
    };
    if signature_b64.contains('.') {
        bail!("session token must have exactly two parts");
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .context("session token signature is not base64url")?;
    keyed_mac(secret, payload_b64)?
        .verify_slice(&signature)
        .map_err(|_| anyhow::anyhow!("session token signature mismatch"))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .context("session token payload is not base64url")?;
    let claims: SessionClaims =
        serde_json::from_slice(&payload).context("session token claims are malformed")?;
    if claims.is_expired_at(now_ms) {
        bail!("session token expired");
    }
    Ok(claims)
}
