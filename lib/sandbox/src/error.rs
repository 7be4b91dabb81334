//! Sandbox-layer errors.

use forgeline_workflow::ErrorKind;
use std::fmt;

/// Errors from sandbox operations.
///
/// Every variant classifies as [`ErrorKind::SandboxViolation`] or
/// [`ErrorKind::Infrastructure`] (§7): nothing here is retried as
/// `transient`, since a body that violated its caps once will violate them
/// again with the same input.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Static analysis rejected the body before it ever ran.
    BlocklistViolation { language: String, symbol: String, capability: String },
    /// A resource cap was exceeded during evaluation.
    CapExceeded { cap: String, detail: String },
    /// An egress attempt was rejected by the egress filter.
    EgressDenied { host: String, reason: String },
    /// The evaluator pool could not hand out an instance before its own
    /// acquisition timeout.
    PoolExhausted,
    /// The out-of-process harness failed to start, crashed, or produced a
    /// result envelope that didn't parse.
    HarnessFailure { detail: String },
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlocklistViolation { language, symbol, capability } => {
                write!(
                    f,
                    "blocklist violation in {language} body: forbidden symbol '{symbol}' grants {capability}"
                )
            }
            Self::CapExceeded { cap, detail } => {
                write!(f, "sandbox cap '{cap}' exceeded: {detail}")
            }
            Self::EgressDenied { host, reason } => {
                write!(f, "egress to '{host}' denied: {reason}")
            }
            Self::PoolExhausted => write!(f, "evaluator pool exhausted"),
            Self::HarnessFailure { detail } => write!(f, "sandbox harness failure: {detail}"),
        }
    }
}

impl std::error::Error for SandboxError {}

impl SandboxError {
    /// Classifies this error per §7.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlocklistViolation { .. } | Self::CapExceeded { .. } | Self::EgressDenied { .. } => {
                ErrorKind::SandboxViolation
            }
            Self::PoolExhausted | Self::HarnessFailure { .. } => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_violation_is_sandbox_violation() {
        let err = SandboxError::BlocklistViolation {
            language: "javascript".to_string(),
            symbol: "eval(".to_string(),
            capability: "runtime eval".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);
        assert!(err.to_string().contains("eval("));
    }

    #[test]
    fn pool_exhausted_is_infrastructure() {
        assert_eq!(SandboxError::PoolExhausted.kind(), ErrorKind::Infrastructure);
    }
}
