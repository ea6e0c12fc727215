//! Token Bridge
//!
//! The bridge turns raw presented tokens into the decoded
//! [`trustbind_core::IdentityToken`] the evaluator works on.
//!
//! ## Architecture
//!
//! The bridge keeps one handler per token format:
//!
//! - **JWT/OIDC**: verifies signatures against the trust anchors of an issuer
//!   in the current snapshot (pinned JWKs, JWKS URIs, or OIDC discovery)
//! - **Sample**: unsigned JSON claim sets, for dry runs only
//!
//! ## Usage
//!
//! ```ignore
//! use trustbind_bridge::{TokenBridgeBuilder, TokenFormat, handlers::JwtHandler};
//!
//! let bridge = TokenBridgeBuilder::new()
//!     .with_handler(JwtHandler::new())
//!     .build();
//!
//! let token = bridge.decode("eyJ...", TokenFormat::Jwt, &snapshot).await?;
//! println!("Subject: {}", token.subject);
//! ```

pub mod bridge;
pub mod error;
pub mod handlers;
pub mod types;

pub use bridge::{TokenBridge, TokenBridgeBuilder, TokenHandler};
pub use error::{BridgeError, Result};
pub use types::TokenFormat;
