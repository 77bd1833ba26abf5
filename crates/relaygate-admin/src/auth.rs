//! Admin-key gate shared by every handler in this crate. Mirrors the
//! teacher's `require_admin`/`is_admin` header check, but compares a hash
//! instead of plaintext since `GlobalConfig::admin_key_hash` never holds the
//! raw key.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relaygate_common::hash_admin_key;

use crate::AdminState;

#[allow(clippy::result_large_err)]
pub fn require_admin(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    let admin_key_hash = state.admin_key_hash();
    if is_admin(headers, &admin_key_hash) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unauthorized").into_response())
    }
}

fn is_admin(headers: &HeaderMap, admin_key_hash: &str) -> bool {
    if let Some(value) = header_value(headers, "x-admin-key") {
        return hash_admin_key(&value) == admin_key_hash;
    }

    let Some(auth) = header_value(headers, "authorization") else {
        return false;
    };
    let auth = auth.trim();
    let token = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer "));
    match token {
        Some(token) => hash_admin_key(token.trim()) == admin_key_hash,
        None => false,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_bearer_hash() {
        let hash = hash_admin_key("super-secret");
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer super-secret".parse().unwrap());
        assert!(is_admin(&headers, &hash));
    }

    #[test]
    fn rejects_wrong_key() {
        let hash = hash_admin_key("super-secret");
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "wrong".parse().unwrap());
        assert!(!is_admin(&headers, &hash));
    }
}
