//! # Payment Error Types
//!
//! Typed error handling for the skill-pay settlement engine.
//! All payment operations return `Result<T, PaymentError>`.

use thiserror::Error;

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, malformed key material)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Skill missing from the catalog or not purchasable
    #[error("Skill not found: {skill_id}")]
    SkillNotFound { skill_id: String },

    /// Order missing (or not owned by the caller)
    #[error("Order not found: {reference}")]
    OrderNotFound { reference: String },

    /// The caller already holds a paid order for this skill
    #[error("Skill already purchased: {skill_id}")]
    AlreadyPurchased { skill_id: String },

    /// Malformed amount
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Currency not supported
    #[error("Unsupported currency: {currency}")]
    UnsupportedCurrency { currency: String },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider has no credentials and the mock gateway is disabled
    #[error("Payment provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Verified webhook for an event type the engine does not consume
    #[error("Unsupported event [{provider}]: {event_type}")]
    UnsupportedEvent { provider: String, event_type: String },

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError(_)
                | PaymentError::ProviderError { .. }
                | PaymentError::Storage(_)
        )
    }

    /// True for failures talking to a payment provider.
    pub fn is_gateway_error(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError(_) | PaymentError::ProviderError { .. }
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::InvalidRequest(_) => 400,
            PaymentError::Unauthorized(_) => 401,
            PaymentError::SkillNotFound { .. } => 404,
            PaymentError::OrderNotFound { .. } => 404,
            PaymentError::AlreadyPurchased { .. } => 400,
            PaymentError::InvalidAmount { .. } => 400,
            PaymentError::UnsupportedCurrency { .. } => 400,
            PaymentError::ProviderError { .. } => 500,
            PaymentError::NetworkError(_) => 500,
            PaymentError::ProviderNotConfigured { .. } => 503,
            PaymentError::WebhookVerificationFailed(_) => 400,
            PaymentError::WebhookParseError(_) => 400,
            PaymentError::UnsupportedEvent { .. } => 200,
            PaymentError::Storage(_) => 500,
            PaymentError::Internal(_) => 500,
            PaymentError::Serialization(_) => 500,
        }
    }

    /// Stable machine-readable code for error bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentError::Configuration(_) => "configuration_error",
            PaymentError::InvalidRequest(_) => "invalid_request",
            PaymentError::Unauthorized(_) => "unauthorized",
            PaymentError::SkillNotFound { .. } => "skill_not_found",
            PaymentError::OrderNotFound { .. } => "order_not_found",
            PaymentError::AlreadyPurchased { .. } => "already_purchased",
            PaymentError::InvalidAmount { .. } => "invalid_amount",
            PaymentError::UnsupportedCurrency { .. } => "unsupported_currency",
            PaymentError::ProviderError { .. } | PaymentError::NetworkError(_) => "gateway_error",
            PaymentError::ProviderNotConfigured { .. } => "provider_not_configured",
            PaymentError::WebhookVerificationFailed(_) => "verification_failed",
            PaymentError::WebhookParseError(_) => "malformed_callback",
            PaymentError::UnsupportedEvent { .. } => "unsupported_event",
            PaymentError::Storage(_) => "storage_error",
            PaymentError::Internal(_) => "internal_error",
            PaymentError::Serialization(_) => "serialization_error",
        }
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PaymentError::NetworkError("timeout".into()).is_retryable());
        assert!(PaymentError::Storage("pool timed out".into()).is_retryable());
        assert!(!PaymentError::InvalidRequest("bad data".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PaymentError::WebhookVerificationFailed("bad sig".into()).status_code(),
            400
        );
        assert_eq!(
            PaymentError::OrderNotFound {
                reference: "ORD1".into()
            }
            .status_code(),
            404
        );
        assert_eq!(
            PaymentError::ProviderError {
                provider: "alipay".into(),
                message: "boom".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_gateway_errors_share_code() {
        let network = PaymentError::NetworkError("timeout".into());
        let provider = PaymentError::ProviderError {
            provider: "stripe".into(),
            message: "card_declined".into(),
        };
        assert!(network.is_gateway_error());
        assert_eq!(network.error_code(), "gateway_error");
        assert_eq!(provider.error_code(), "gateway_error");
        assert_ne!(
            PaymentError::Internal("x".into()).error_code(),
            "gateway_error"
        );
    }
}
