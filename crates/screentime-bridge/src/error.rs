//! # Bridge Error Types
//!
//! Error types for session, upstream and broker operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Bridge Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Session      │  │      Upstream           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Authentication │  │  UpstreamError          │ │
//! │  │  InvalidUrl     │  │  AuthFailed     │  │  TransportError         │ │
//! │  │  ConfigLoad     │  │  MissingSubject │  │  MissingCsrfToken       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Credentials   │  │     Broker      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StoreFailed    │  │  MqttError      │  │  ChannelError           │ │
//! │  │  InvalidBlob    │  │                 │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Session and upstream errors never escape the dispatcher or the sync loop;
//! they end there as a log line and, for toggles, a reverted state.

use screentime_core::CoreError;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Longest response excerpt carried in an [`BridgeError::UpstreamError`].
pub const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum BridgeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// No login method produced a usable session.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// A call was rejected with 401 again after a refresh.
    #[error("Authentication failed for {endpoint}")]
    AuthenticationFailed { endpoint: String },

    /// The managed subject has not been discovered for this session.
    #[error("Subject identifier not known. Log in again or set subject.id.")]
    MissingSubject,

    /// Advisory: a mutating call went out without a CSRF token.
    #[error("CSRF token cookie '{0}' not present")]
    MissingCsrfToken(String),

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    #[error("Upstream returned {status}: {body_excerpt}")]
    UpstreamError { status: u16, body_excerpt: String },

    /// Network failure or timeout.
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Credential Errors
    // =========================================================================
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Invalid credential blob: {0}")]
    InvalidCredential(String),

    // =========================================================================
    // Broker Errors
    // =========================================================================
    #[error("MQTT error: {0}")]
    MqttError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Bridge is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for BridgeError {
    fn from(err: CoreError) -> Self {
        BridgeError::InvalidResponse(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidResponse(err.to_string())
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        BridgeError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::TransportError(format!("request timed out: {}", err))
        } else {
            BridgeError::TransportError(err.to_string())
        }
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::MqttError(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for BridgeError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BridgeError::MqttError(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::CredentialStore(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for BridgeError {
    fn from(err: toml::ser::Error) -> Self {
        BridgeError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl BridgeError {
    /// Builds an upstream error, keeping only the head of the body.
    pub fn upstream(status: u16, body: &str) -> Self {
        let body_excerpt = body.chars().take(BODY_EXCERPT_LEN).collect();
        BridgeError::UpstreamError { status, body_excerpt }
    }

    /// Returns true if the operation may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::TransportError(_) | BridgeError::MqttError(_) => true,
            BridgeError::UpstreamError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error means the session is no longer usable.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            BridgeError::AuthenticationError(_) | BridgeError::AuthenticationFailed { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidConfig(_)
                | BridgeError::InvalidUrl(_)
                | BridgeError::ConfigLoadFailed(_)
                | BridgeError::ConfigSaveFailed(_)
        )
    }
}
