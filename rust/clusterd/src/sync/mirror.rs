//! Local configuration mirror: the node-local key/value store the
//! synchronizer writes gates into.
//!
//! The production mirror shells out to the snap configuration tool
//! (`snapctl set key=value` / `snapctl unset key`). Its own hook pushes local
//! edits back into the cluster; that direction is not handled here.

use std::borrow::Cow;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Namespace every gate carries in the local mirror.
pub const FEATURE_PREFIX: &str = "feature.";

/// Mirror key for a gate, adding [`FEATURE_PREFIX`] exactly once.
pub fn mirror_key(gate_key: &str) -> Cow<'_, str> {
    if gate_key.starts_with(FEATURE_PREFIX) {
        Cow::Borrowed(gate_key)
    } else {
        Cow::Owned(format!("{}{}", FEATURE_PREFIX, gate_key))
    }
}

/// Mirror string value for a gate state.
pub fn mirror_value(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

/// Failure of a single mirror call.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("mirror call timed out after {0:?}")]
    Timeout(Duration),
}

/// Node-local configuration the synchronizer writes to.
///
/// Calls are independent: one failing key says nothing about the next.
#[async_trait]
pub trait ConfigMirror: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), MirrorError>;

    async fn unset(&self, key: &str) -> Result<(), MirrorError>;
}

/// Mirror backed by the snap configuration command.
#[derive(Debug, Clone)]
pub struct SnapctlMirror {
    program: String,
}

impl Default for SnapctlMirror {
    fn default() -> Self {
        Self::new("snapctl")
    }
}

impl SnapctlMirror {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), MirrorError> {
        let command = format!("{} {}", self.program, args.join(" "));
        // kill_on_drop: a call abandoned by the caller's timeout must not
        // leave the child behind.
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| MirrorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MirrorError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigMirror for SnapctlMirror {
    async fn set(&self, key: &str, value: &str) -> Result<(), MirrorError> {
        let assignment = format!("{}={}", key, value);
        self.run(&["set", &assignment]).await
    }

    async fn unset(&self, key: &str) -> Result<(), MirrorError> {
        self.run(&["unset", key]).await
    }
}
