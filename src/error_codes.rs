use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const INVALID_VIEWPORT: &str = "INVALID_VIEWPORT";
pub const FRAME_SIZE_MISMATCH: &str = "FRAME_SIZE_MISMATCH";
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const INVALID_SOURCE: &str = "INVALID_SOURCE";
pub const RENDER_TARGET: &str = "RENDER_TARGET";
pub const SEQUENCE_HASH_MISMATCH: &str = "SEQUENCE_HASH_MISMATCH";
pub const INTERNAL: &str = "INTERNAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodedErrorKind {
    /// Bad input from the caller: flags, config files, frame geometry.
    Usage,
    /// A render target refused a draw call.
    Render,
    /// The run finished but its output did not match what was expected.
    Verification,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self {
            code: RENDER_TARGET,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Render,
        }
    }

    pub fn verification(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Verification,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for errors that never picked up a code along the way.
pub fn uncoded_envelope(error: &Error) -> ErrorEnvelope {
    ErrorEnvelope {
        ok: false,
        error: ErrorEnvelopeBody {
            code: INTERNAL.to_owned(),
            kind: CodedErrorKind::Internal,
            message: format!("{error:#}"),
            details: None,
        },
    }
}
