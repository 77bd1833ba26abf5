//! Bearer-token extraction for inbound requests (spec Component I).
//!
//! Different dialects' ecosystems carry the caller's key differently —
//! `Authorization: Bearer`, `x-api-key`, `x-goog-api-key`, or a `?key=`
//! query parameter — so every route accepts all four rather than picking
//! one per dialect. Priority order matches the teacher's
//! `extract_user_key`.

use axum::http::HeaderMap;

pub fn extract_bearer(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            let s = s.trim();
            let prefix = "Bearer ";
            if s.len() > prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
                let token = s[prefix.len()..].trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    if let Some(value) = headers.get("x-api-key") {
        if let Ok(s) = value.to_str() {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-goog-api-key") {
        if let Ok(s) = value.to_str() {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }

    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        if key == "key" && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn prefers_authorization_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-abc"));
        headers.insert("x-api-key", HeaderValue::from_static("sk-other"));
        assert_eq!(extract_bearer(&headers, None), Some("sk-abc".to_string()));
    }

    #[test]
    fn falls_back_to_query_key() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers, Some("key=sk-query")), Some("sk-query".to_string()));
    }

    #[test]
    fn missing_everywhere_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers, None), None);
    }
}
