//! Token bridge - routes raw tokens to the handler for their format

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trustbind_core::{BindingSet, IdentityToken};

use crate::error::{BridgeError, Result};
use crate::types::TokenFormat;

/// Trait for token handlers
///
/// Each handler verifies one token format and produces the decoded
/// [`IdentityToken`] the evaluator works on. Handlers resolve issuers
/// through the snapshot being evaluated, so a token is only ever verified
/// against keys of an issuer that snapshot trusts.
#[async_trait]
pub trait TokenHandler: Send + Sync {
    /// Get the token format this handler processes
    fn format(&self) -> TokenFormat;

    /// Verify a raw token and decode its claims
    ///
    /// # Arguments
    /// * `raw` - The raw token text
    /// * `snapshot` - The binding set whose issuers are trusted
    async fn decode(&self, raw: &str, snapshot: &BindingSet) -> Result<IdentityToken>;

    /// Get a description of this handler (for logging)
    fn description(&self) -> &str {
        "token handler"
    }

    /// Forget cached key material, e.g. after the trusted issuers changed
    fn invalidate_cache(&self) {}
}

/// Token bridge - routes tokens to handlers
pub struct TokenBridge {
    handlers: HashMap<TokenFormat, Arc<dyn TokenHandler>>,
}

impl TokenBridge {
    /// Create a new empty bridge
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a token handler
    pub fn register_handler<H: TokenHandler + 'static>(&mut self, handler: H) {
        let format = handler.format();
        info!(
            format = %format,
            description = handler.description(),
            "Registered token handler"
        );
        self.handlers.insert(format, Arc::new(handler));
    }

    /// Decode a token of a known format
    pub async fn decode(
        &self,
        raw: &str,
        format: TokenFormat,
        snapshot: &BindingSet,
    ) -> Result<IdentityToken> {
        let handler = self.handlers.get(&format).ok_or_else(|| {
            warn!(format = %format, "No handler for token format");
            BridgeError::NoHandler(format.to_string())
        })?;

        let result = handler.decode(raw, snapshot).await;

        match &result {
            Ok(token) => {
                debug!(format = %format, issuer = %token.issuer, "Token decoded");
            }
            Err(e) => {
                warn!(format = %format, error = %e, "Token verification failed");
            }
        }

        result
    }

    /// Drop every handler's cached key material
    pub fn invalidate_caches(&self) {
        for (format, handler) in &self.handlers {
            debug!(format = %format, "Invalidating handler cache");
            handler.invalidate_cache();
        }
    }
}

impl Default for TokenBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating a TokenBridge with handlers
pub struct TokenBridgeBuilder {
    bridge: TokenBridge,
}

impl TokenBridgeBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            bridge: TokenBridge::new(),
        }
    }

    /// Add a token handler
    pub fn with_handler<H: TokenHandler + 'static>(mut self, handler: H) -> Self {
        self.bridge.register_handler(handler);
        self
    }

    /// Build the bridge
    pub fn build(self) -> TokenBridge {
        self.bridge
    }
}

impl Default for TokenBridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
