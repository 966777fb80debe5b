//! Bearer credential check
//!
//! Credential issuance is owned by the platform's auth layer; the sync API
//! only verifies that every request carries the shared bearer token.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::error::AppError;

/// Pull the bearer token out of the `Authorization` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;
    let value = header
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("Authorization header must use the Bearer scheme"))?
        .trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }
    Ok(token)
}

/// Compare the presented token against the configured one without
/// short-circuiting on the first mismatched byte.
pub fn verify_token(presented: &str, expected: &str) -> Result<(), AppError> {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    let mut diff = presented.len() ^ expected.len();
    for (a, b) in presented.iter().zip(expected.iter()) {
        diff |= usize::from(a ^ b);
    }
    if diff == 0 {
        Ok(())
    } else {
        Err(AppError::unauthorized("Invalid bearer token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        let headers = headers_with("Bearer token-123");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "token-123");
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        assert!(extract_bearer_token(&HeaderMap::new()).is_err());
        assert!(extract_bearer_token(&headers_with("Basic abc")).is_err());
        assert!(extract_bearer_token(&headers_with("Bearer ")).is_err());
    }

    #[test]
    fn verifies_exact_token_only() {
        assert!(verify_token("secret", "secret").is_ok());
        assert!(verify_token("secret2", "secret").is_err());
        assert!(verify_token("", "secret").is_err());
    }
}
