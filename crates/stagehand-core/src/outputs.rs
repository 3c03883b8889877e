//! Read-only introspection of deployed stack outputs.
//!
//! CloudFormation `describe-stacks` is the single source of truth for
//! cross-stack outputs. The export list is never consulted, so every
//! entity type resolves through the same query path.

use crate::error::{Result, StagehandError};
use crate::retry::{retry_blocking, RetryPolicy};
use std::collections::HashMap;
use std::process::Command;

pub trait StackOutputs {
    /// Value of `output_key` on `stack_name`, or `None` when the stack or
    /// the key does not exist. `Err` means the provider was unreachable.
    fn output(&self, stack_name: &str, output_key: &str) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// CloudFormationCli
// ---------------------------------------------------------------------------

/// Shells out to `aws cloudformation describe-stacks` and parses the JSON
/// output block.
pub struct CloudFormationCli {
    region: String,
    retry: RetryPolicy,
}

impl CloudFormationCli {
    pub fn new(region: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        which::which("aws").map_err(|_| StagehandError::CloudCliMissing("aws".into()))?;
        Ok(CloudFormationCli {
            region: region.into(),
            retry,
        })
    }

    fn describe(&self, stack_name: &str) -> Result<Option<serde_json::Value>> {
        let output = Command::new("aws")
            .args([
                "cloudformation",
                "describe-stacks",
                "--stack-name",
                stack_name,
                "--region",
                self.region.as_str(),
                "--output",
                "json",
            ])
            .output()
            .map_err(|e| StagehandError::SpawnFailed {
                command: "aws cloudformation describe-stacks".into(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // An absent stack is an answer, not a fault.
            if stderr.contains("does not exist") {
                return Ok(None);
            }
            return Err(StagehandError::CloudCliFailed {
                command: "aws cloudformation describe-stacks".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(Some(parsed))
    }
}

impl StackOutputs for CloudFormationCli {
    fn output(&self, stack_name: &str, output_key: &str) -> Result<Option<String>> {
        let Some(doc) = retry_blocking(self.retry, || self.describe(stack_name))? else {
            return Ok(None);
        };
        // A stack with no outputs at all omits the array.
        let outputs = doc
            .pointer("/Stacks/0/Outputs")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in &outputs {
            if entry.get("OutputKey").and_then(|k| k.as_str()) == Some(output_key) {
                return Ok(entry
                    .get("OutputValue")
                    .and_then(|v| v.as_str())
                    .map(str::to_string));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// StaticOutputs
// ---------------------------------------------------------------------------

/// In-memory fixture keyed by (stack name, output key). Test double and
/// dry-run backend.
#[derive(Debug, Default, Clone)]
pub struct StaticOutputs {
    values: HashMap<(String, String), String>,
}

impl StaticOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stack: &str, key: &str, value: &str) -> Self {
        self.values
            .insert((stack.to_string(), key.to_string()), value.to_string());
        self
    }
}

impl StackOutputs for StaticOutputs {
    fn output(&self, stack_name: &str, output_key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .get(&(stack_name.to_string(), output_key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_outputs_hit_and_miss() {
        let outputs = StaticOutputs::new().with("tsa-coach-backend-dev", "CoachApiUrl", "https://a.example.com");
        assert_eq!(
            outputs
                .output("tsa-coach-backend-dev", "CoachApiUrl")
                .unwrap()
                .as_deref(),
            Some("https://a.example.com")
        );
        assert_eq!(
            outputs.output("tsa-coach-backend-dev", "Missing").unwrap(),
            None
        );
        assert_eq!(outputs.output("other-stack", "CoachApiUrl").unwrap(), None);
    }
}
