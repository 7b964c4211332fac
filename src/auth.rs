use crate::config::AppConfig;
use crate::error::BridgeError;
use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashSet;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Compact key index used in hot-path authentication.
pub enum AllowedClientKeys {
    /// No keys configured: every request is accepted.
    Open,
    Single { raw: Box<str>, bearer: Box<str> },
    Multiple(FxHashSet<String>),
}

/// Extract the client key: `Authorization: Bearer <key>` first, then `x-api-key`.
///
/// # Errors
///
/// Returns `BridgeError::Auth` when no key header is present.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, BridgeError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get(X_API_KEY).and_then(|v| v.to_str().ok()))
        .ok_or_else(|| BridgeError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request against the pre-indexed `allowed_keys`.
///
/// # Errors
///
/// Returns `BridgeError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), BridgeError> {
    match allowed_keys {
        AllowedClientKeys::Open => Ok(()),
        AllowedClientKeys::Single { raw, bearer } => {
            authenticate_single_key(headers, raw.as_ref(), bearer.as_ref())
        }
        AllowedClientKeys::Multiple(allowed_set) => {
            let client_key = extract_api_key(headers)?;
            if allowed_set.contains(client_key) {
                Ok(())
            } else {
                Err(BridgeError::Auth("Invalid API key".to_string()))
            }
        }
    }
}

fn authenticate_single_key(
    headers: &http::HeaderMap,
    raw_key: &str,
    bearer_key: &str,
) -> Result<(), BridgeError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        return if value.as_bytes() == bearer_key.as_bytes() {
            Ok(())
        } else {
            Err(BridgeError::Auth("Invalid API key".to_string()))
        };
    }
    match headers.get(X_API_KEY) {
        Some(value) if value.as_bytes() == raw_key.as_bytes() => Ok(()),
        Some(_) => Err(BridgeError::Auth("Invalid API key".to_string())),
        None => Err(BridgeError::Auth("Missing API key".to_string())),
    }
}

/// Build a hash-set index for allowed client keys.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = config
        .client_authentication
        .allowed_keys
        .iter()
        .cloned()
        .collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Open,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single {
                bearer: format!("Bearer {single_key}").into_boxed_str(),
                raw: single_key.into_boxed_str(),
            },
            None => AllowedClientKeys::Open,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientAuthConfig;

    fn make_config(allowed_keys: Vec<String>) -> AppConfig {
        AppConfig {
            client_authentication: ClientAuthConfig { allowed_keys },
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test123".parse().unwrap());
        assert_eq!(extract_api_key(&headers).unwrap(), "sk-test123");
    }

    #[test]
    fn test_extract_x_api_key_fallback() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", "sk-alt".parse().unwrap());
        assert_eq!(extract_api_key(&headers).unwrap(), "sk-alt");
    }

    #[test]
    fn test_extract_missing_key() {
        let headers = http::HeaderMap::new();
        let err = extract_api_key(&headers).unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
    }

    #[test]
    fn test_authenticate_valid_key() {
        let key_index = build_allowed_key_set(&make_config(vec!["valid-key".to_string()]));
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer valid-key".parse().unwrap());
        assert!(authenticate(&headers, &key_index).is_ok());

        let mut headers = http::HeaderMap::new();
        headers.insert("x-api-key", "valid-key".parse().unwrap());
        assert!(authenticate(&headers, &key_index).is_ok());
    }

    #[test]
    fn test_authenticate_invalid_key() {
        let key_index = build_allowed_key_set(&make_config(vec!["valid-key".to_string()]));
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer wrong-key".parse().unwrap());
        let err = authenticate(&headers, &key_index).unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
        assert!(authenticate(&http::HeaderMap::new(), &key_index).is_err());
    }

    #[test]
    fn test_authenticate_multiple_keys() {
        let key_index = build_allowed_key_set(&make_config(vec!["a".to_string(), "b".to_string()]));
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer b".parse().unwrap());
        assert!(authenticate(&headers, &key_index).is_ok());
        headers.insert("authorization", "Bearer c".parse().unwrap());
        assert!(authenticate(&headers, &key_index).is_err());
    }

    #[test]
    fn test_build_allowed_key_set_single() {
        let index = build_allowed_key_set(&make_config(vec![
            "single".to_string(),
            "single".to_string(),
        ]));
        match index {
            AllowedClientKeys::Single { raw, bearer } => {
                assert_eq!(raw.as_ref(), "single");
                assert_eq!(bearer.as_ref(), "Bearer single");
            }
            _ => panic!("expected single-key index"),
        }
    }

    #[test]
    fn test_open_index_accepts_anything() {
        let index = build_allowed_key_set(&make_config(vec![]));
        assert!(matches!(index, AllowedClientKeys::Open));
        assert!(authenticate(&http::HeaderMap::new(), &index).is_ok());
    }
}
