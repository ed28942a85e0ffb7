//! Error taxonomy for conversation runs

use crate::convo::Transcript;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Script authoring defects, surfaced before or upon reaching the offending step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("{step_tag}: unknown sender \"{sender}\"")]
    UnknownSender { step_tag: String, sender: String },

    #[error(
        "{step_tag}: cannot find partial conversation \"{name}\" (available: {})",
        .available.join(", ")
    )]
    PartialNotFound {
        step_tag: String,
        name: String,
        available: Vec<String>,
    },

    #[error("{step_tag}: partial conversations are included circularly, \"{name}\" is referenced by \"/{chain}\"")]
    CircularInclude {
        step_tag: String,
        name: String,
        chain: String,
    },

    #[error("{name}: {message}")]
    BadArgs { name: String, message: String },

    #[error("unknown {kind} \"{name}\"")]
    UnknownExtension { kind: ExtensionKind, name: String },

    #[error("invalid pattern \"{pattern}\": {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl ScriptError {
    pub fn bad_args(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadArgs {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Extension catalogue an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Asserter,
    LogicHook,
    UserInput,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asserter => "asserter",
            Self::LogicHook => "logic hook",
            Self::UserInput => "user input",
        })
    }
}

/// Failed expectation on a bot response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssertionError {
    #[error("{step_tag}: {message}{}", .diff.as_deref().map(|d| format!("\n{d}")).unwrap_or_default())]
    Failed {
        step_tag: String,
        message: String,
        /// Name of the asserter that raised it, if any
        source_name: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
        /// Unified line diff for multi-line comparisons
        diff: Option<String>,
    },

    #[error("{step_tag}: expected {path} to have {expected} element(s), bot response has {actual}")]
    LengthMismatch {
        step_tag: String,
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("{step_tag}: expected key {path} not found in bot response")]
    MissingKey { step_tag: String, path: String },

    #[error("{step_tag}: bot response is empty")]
    EmptyResponse { step_tag: String },

    #[error("{step_tag}: {} assertion(s) failed:\n{}", .errors.len(), list_errors(.errors))]
    Multiple {
        step_tag: String,
        errors: Vec<AssertionError>,
    },
}

impl AssertionError {
    pub fn failed(step_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            step_tag: step_tag.into(),
            message: message.into(),
            source_name: None,
            expected: None,
            actual: None,
            diff: None,
        }
    }

    /// Mismatch between an expected and an actual text
    pub fn mismatch(
        step_tag: impl Into<String>,
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let expected = expected.into();
        let actual = actual.into();
        let diff = (expected.contains('\n') || actual.contains('\n')).then(|| {
            similar::TextDiff::from_lines(expected.as_str(), actual.as_str())
                .unified_diff()
                .header("expected", "actual")
                .to_string()
        });
        Self::Failed {
            step_tag: step_tag.into(),
            message: message.into(),
            source_name: None,
            expected: Some(expected),
            actual: Some(actual),
            diff,
        }
    }

    /// Tag the error with the asserter that produced it
    #[must_use]
    pub fn from_source(mut self, name: &str) -> Self {
        if let Self::Failed { source_name, .. } = &mut self {
            if source_name.is_none() {
                *source_name = Some(name.to_string());
            }
        }
        self
    }

    pub fn step_tag(&self) -> &str {
        match self {
            Self::Failed { step_tag, .. }
            | Self::LengthMismatch { step_tag, .. }
            | Self::MissingKey { step_tag, .. }
            | Self::EmptyResponse { step_tag }
            | Self::Multiple { step_tag, .. } => step_tag,
        }
    }

    /// Number of leaf assertion failures
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple { errors, .. } => errors.iter().map(AssertionError::count).sum(),
            _ => 1,
        }
    }
}

fn list_errors(errors: &[AssertionError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transport failure with classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Bot did not answer within the wait timeout
    Timeout,
    /// Connection to the bot is gone
    Closed,
    Other,
}

/// Unsafe feature used without `allow_unsafe`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("security error: {feature} is disabled, set allow_unsafe to enable it")]
pub struct SecurityError {
    pub feature: String,
}

impl SecurityError {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
        }
    }
}

/// Any error a conversation run can end with
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvoError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Assertion(#[from] AssertionError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Security(#[from] SecurityError),
}

impl ConvoError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Assertion(_) => "assertion",
            Self::Transport(_) => "transport",
            Self::Security(_) => "security",
        }
    }

    pub fn as_assertion(&self) -> Option<&AssertionError> {
        match self {
            Self::Assertion(e) => Some(e),
            _ => None,
        }
    }
}

impl Serialize for ConvoError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ConvoError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

/// A failed run: the terminal error plus the transcript built so far
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ConvoFailure {
    #[source]
    pub error: ConvoError,
    pub transcript: Box<Transcript>,
}
