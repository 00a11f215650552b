//! Bearer token verification.
//!
//! Tokens are `uid.signature`, the signature being hex HMAC-SHA256 over the
//! uid under the server secret. Verification fails closed: any missing,
//! malformed, or forged credential rejects the request before it reaches a
//! handler.
//!
//! The same authority resolves email-identified callers: their uid is the
//! HMAC of the normalized address, so granting admin by email and minting a
//! token for that address always agree on the uid.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{error::AppError, state::AppState};

type HmacSha256 = Hmac<Sha256>;

/// Verified caller identity, extracted from the `Authorization` header.
pub struct Identity {
    pub uid: String,
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}

fn signature(secret: &str, message: &str) -> Vec<u8> {
    let mut mac = mac(secret);
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Issue a token for `uid`. Exposed for provisioning and tests; the server
/// itself only verifies.
pub fn mint_token(secret: &str, uid: &str) -> String {
    format!("{uid}.{}", hex::encode(signature(secret, uid)))
}

/// Returns the uid carried by a valid token, `None` otherwise.
pub fn verify_token(secret: &str, token: &str) -> Option<String> {
    let (uid, sig_hex) = token.rsplit_once('.')?;
    if uid.is_empty() {
        return None;
    }
    let sig = hex::decode(sig_hex).ok()?;
    let mut mac = mac(secret);
    mac.update(uid.as_bytes());
    mac.verify_slice(&sig).ok()?;
    Some(uid.to_string())
}

/// Stable uid for an email-identified caller, or `None` when the address is
/// not resolvable.
pub fn uid_for_email(secret: &str, email: &str) -> Option<String> {
    let email = email.trim().to_ascii_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(hex::encode(signature(secret, &format!("email:{email}"))))
}

impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
        let uid = verify_token(&state.config.auth_secret, token).ok_or(AppError::Unauthorized)?;
        Ok(Identity { uid })
    }
}
