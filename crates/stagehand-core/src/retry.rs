use crate::error::{Result, StagehandError};
use std::time::Duration;

/// Retry policy for transport-level calls out to the cloud CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// No retries, no sleeping. Used by tests and in-process backends.
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            base_delay_ms: 0,
        }
    }
}

/// Run `op` up to `policy.attempts` times with a doubling delay between
/// attempts. Only transport-shaped errors are retried; anything else
/// surfaces immediately (a missing table is not going to appear because
/// we asked again).
pub fn retry_blocking<T>(
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = policy.attempts.max(1);
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let mut last_reason = String::new();
    for attempt in 1..=attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) => {
                tracing::debug!(attempt, error = %e, "transient failure, retrying");
                last_reason = e.to_string();
                if attempt < attempts && !delay.is_zero() {
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(StagehandError::Transport {
        attempts,
        reason: last_reason,
    })
}

fn is_transient(e: &StagehandError) -> bool {
    matches!(
        e,
        StagehandError::SpawnFailed { .. }
            | StagehandError::CloudCliFailed { .. }
            | StagehandError::Transport { .. }
            | StagehandError::Io(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_first_try() {
        let mut calls = 0;
        let out = retry_blocking(RetryPolicy::none(), || {
            calls += 1;
            Ok::<_, StagehandError>(42)
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_transient_then_succeeds() {
        let mut calls = 0;
        let policy = RetryPolicy {
            attempts: 3,
            base_delay_ms: 0,
        };
        let out = retry_blocking(policy, || {
            calls += 1;
            if calls < 3 {
                Err(StagehandError::CloudCliFailed {
                    command: "aws".into(),
                    code: 255,
                    stderr: "throttled".into(),
                })
            } else {
                Ok("done")
            }
        })
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausted_retries_surface_as_transport() {
        let policy = RetryPolicy {
            attempts: 2,
            base_delay_ms: 0,
        };
        let err = retry_blocking(policy, || {
            Err::<(), _>(StagehandError::CloudCliFailed {
                command: "aws".into(),
                code: 255,
                stderr: "connection reset".into(),
            })
        })
        .unwrap_err();
        match err {
            StagehandError::Transport { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("expected Transport, got {other}"),
        }
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let mut calls = 0;
        let policy = RetryPolicy {
            attempts: 3,
            base_delay_ms: 0,
        };
        let err = retry_blocking(policy, || {
            calls += 1;
            Err::<(), _>(StagehandError::UnitNotFound("ghost".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, StagehandError::UnitNotFound(_)));
    }
}
