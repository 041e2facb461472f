//! Failure classification and recovery decisions
//!
//! Every failure in the loop gets a single classification which fully
//! determines what happens next: transient failures retry with backoff up to
//! a budget, permission denials surface without retry, environment problems
//! go back to the oracle as new information, fatal problems abort the task.

use std::time::Duration;

use relay_oracle::OracleError;
use relay_store::{ErrorKind, RecoveryAction};

/// Classify a failed tool invocation from its error detail.
///
/// Tool failures arrive as text, so classification is by marker. Unmatched
/// failures default to `Environment`: the oracle sees the error and decides,
/// which is the safe direction for an unknown failure.
pub fn classify_tool_failure(detail: &str) -> ErrorKind {
    let lower = detail.to_lowercase();

    if lower.contains("permission denied") || lower.contains("access denied") {
        return ErrorKind::Permission;
    }

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("temporarily unavailable")
        || lower.contains("network")
    {
        return ErrorKind::Transient;
    }

    if lower.contains("corrupt") || lower.contains("poisoned") {
        return ErrorKind::Fatal;
    }

    ErrorKind::Environment
}

/// Classify an oracle failure
pub fn classify_oracle_error(error: &OracleError) -> ErrorKind {
    if error.is_transient() {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}

/// Maps a classified failure and its attempt count to a recovery action
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    max_retries: u32,
    backoff_base: Duration,
}

impl RecoveryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Decide what to do about a failure. `attempts` counts retries already
    /// spent on this same operation.
    pub fn decide(&self, kind: ErrorKind, attempts: u32) -> RecoveryAction {
        match kind {
            ErrorKind::Transient => {
                if attempts < self.max_retries {
                    RecoveryAction::Retry {
                        attempt: attempts + 1,
                    }
                } else {
                    RecoveryAction::Escalate
                }
            }
            ErrorKind::Permission => RecoveryAction::Escalate,
            ErrorKind::Environment => RecoveryAction::Escalate,
            ErrorKind::Fatal => RecoveryAction::Abort,
        }
    }

    /// Delay before retry `attempt` (1-based), doubling per attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permission_markers() {
        assert_eq!(
            classify_tool_failure("permission denied: 'exec' requires elevated"),
            ErrorKind::Permission
        );
    }

    #[test]
    fn test_classify_transient_markers() {
        assert_eq!(
            classify_tool_failure("tool 'exec' timed out after 60 seconds"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_tool_failure("connection refused"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_unknown_failures_default_to_environment() {
        assert_eq!(
            classify_tool_failure("no such file: notes.txt"),
            ErrorKind::Environment
        );
        assert_eq!(
            classify_tool_failure("old_text not found in file"),
            ErrorKind::Environment
        );
    }

    #[test]
    fn test_classify_oracle_errors() {
        assert_eq!(
            classify_oracle_error(&OracleError::Unavailable("503".to_string())),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_oracle_error(&OracleError::RateLimited),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_oracle_error(&OracleError::NoApiKey),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_transient_retries_then_escalates() {
        let policy = RecoveryPolicy::new(2, Duration::from_millis(100));

        assert_eq!(
            policy.decide(ErrorKind::Transient, 0),
            RecoveryAction::Retry { attempt: 1 }
        );
        assert_eq!(
            policy.decide(ErrorKind::Transient, 1),
            RecoveryAction::Retry { attempt: 2 }
        );
        assert_eq!(
            policy.decide(ErrorKind::Transient, 2),
            RecoveryAction::Escalate
        );
    }

    #[test]
    fn test_permission_never_retries() {
        let policy = RecoveryPolicy::default();
        assert_eq!(
            policy.decide(ErrorKind::Permission, 0),
            RecoveryAction::Escalate
        );
    }

    #[test]
    fn test_fatal_aborts() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.decide(ErrorKind::Fatal, 0), RecoveryAction::Abort);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RecoveryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }
}
