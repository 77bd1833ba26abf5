use serde::{Deserialize, Serialize};

/// Coarse classification used by the worker pool (retry/backoff), the
/// fallback driver (advance-to-next-target), and the governance gate to
/// decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthFailed,
    RateLimited,
    QuotaExceeded,
    InvalidRequest,
    UpstreamTimeout,
    UpstreamServerError,
    UpstreamNetwork,
    ContentFiltered,
    BudgetExceeded,
    VirtualKeyInvalid,
    Cancelled,
    Internal,
    /// Not part of the spec's neutral error-kind set, but needed to
    /// distinguish "no such provider/route" from a generic `InvalidRequest`.
    NotFound,
    /// Every worker in a provider's pool is unavailable.
    Overloaded,
}

impl ErrorKind {
    /// Whether the worker pool scheduler (§4.C) should retry the same
    /// target with backoff rather than surface the error immediately.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::UpstreamTimeout
                | ErrorKind::UpstreamNetwork
                | ErrorKind::UpstreamServerError
                | ErrorKind::Overloaded
        )
    }

    pub fn default_http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::AuthFailed => 401,
            ErrorKind::VirtualKeyInvalid => 401,
            ErrorKind::ContentFiltered => 422,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimited => 429,
            ErrorKind::QuotaExceeded => 402,
            ErrorKind::BudgetExceeded => 402,
            ErrorKind::Overloaded => 503,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::UpstreamServerError => 502,
            ErrorKind::UpstreamNetwork => 502,
            ErrorKind::Internal => 500,
            ErrorKind::Cancelled => 499,
        }
    }
}

/// The gateway's single neutral error type. Dialect encoders (§4.I) map
/// this to the native error envelope of whichever ingress adapter decoded
/// the original request.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
    pub http_status: u16,
    /// Whether the fallback driver (§4.F) is allowed to try the next
    /// target after this error, set false for e.g. governance denials.
    pub allow_fallbacks: bool,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let http_status = kind.default_http_status();
        Self {
            kind,
            message: message.into(),
            provider_code: None,
            http_status,
            allow_fallbacks: true,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn no_fallback(mut self) -> Self {
        self.allow_fallbacks = false;
        self
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}
