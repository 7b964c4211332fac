use crate::auth::{authenticate, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        allowed_client_keys: AllowedClientKeys,
    ) -> Self {
        Self {
            config,
            transport,
            allowed_client_keys,
        }
    }

    /// Authenticate an ingress request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), BridgeError> {
        authenticate(headers, &self.allowed_client_keys)
    }
}
