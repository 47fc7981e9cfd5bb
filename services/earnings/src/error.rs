use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::domain::types::PayoutStatus;

/// Earnings service error variants.
#[derive(Debug, thiserror::Error)]
pub enum EarningsServiceError {
    #[error("payout {0} not found")]
    PayoutNotFound(Uuid),
    /// A guarded transition was attempted from a status that does not allow it.
    #[error("payout {id} cannot transition from {status}")]
    InvalidTransition { id: Uuid, status: PayoutStatus },
    /// A failure report for an external payout other than the one on record.
    #[error("stale event for payout {0}")]
    StaleEvent(Uuid),
    /// Optimistic-concurrency retries were exhausted.
    #[error("payout {0} was modified concurrently")]
    Contention(Uuid),
    #[error("missing webhook signature")]
    MissingSignature,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("invalid webhook payload")]
    InvalidPayload,
    #[error("webhook check not found")]
    WebhookCheckNotFound,
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl EarningsServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PayoutNotFound(_) => "PAYOUT_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::StaleEvent(_) => "STALE_EVENT",
            Self::Contention(_) => "CONTENTION",
            Self::MissingSignature => "MISSING_SIGNATURE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::WebhookCheckNotFound => "WEBHOOK_CHECK_NOT_FOUND",
            Self::Processor(_) => "PROCESSOR_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for EarningsServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::PayoutNotFound(_) | Self::WebhookCheckNotFound => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::StaleEvent(_) | Self::Contention(_) => {
                StatusCode::CONFLICT
            }
            Self::MissingSignature | Self::InvalidSignature | Self::InvalidPayload => {
                StatusCode::BAD_REQUEST
            }
            Self::Processor(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // TraceLayer records every request; only server-side failures need the error chain.
        match &self {
            Self::Internal(e) => tracing::error!(error = ?e, kind = "INTERNAL", "internal error"),
            Self::Processor(e) => {
                tracing::error!(error = %e, kind = "PROCESSOR_ERROR", "payment processor error")
            }
            _ => {}
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Failure talking to the payment processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The processor answered with an error object.
    #[error("payment processor rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// No usable answer: connection, timeout or undecodable body.
    #[error("payment processor unreachable: {0}")]
    Transport(#[source] anyhow::Error),
}

impl ProcessorError {
    /// The processor's machine-readable error code, when it sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            Self::Transport(_) => None,
        }
    }
}
