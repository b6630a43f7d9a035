//! Post-build image verification via `lpdump`.
//!
//! The dump tool is run once against the finished image. A non-empty stdout is
//! a parsed metadata dump and counts as a pass; stderr-only output is a
//! failure; no output at all is an unknown state and is logged separately from
//! a failure. Verification never changes the build outcome.

use crate::error::VerificationError;
use crate::system::paths::{Tool, ToolLocator};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on a single `lpdump` run.
pub const VERIFY_TIMEOUT_SECS: u64 = 10;

// Partition table entries in lpdump output look like "  Name: system_a"
static PARTITION_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Name:\s*(\S+)\s*$").expect("Invalid Name: regex"));

/// Classified result of a dump run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    /// lpdump produced a metadata dump
    Passed {
        dump: String,
        /// Partition names listed in the dump, in order
        partitions: Vec<String>,
    },
    /// lpdump wrote only to stderr
    Failed { stderr: String },
    /// lpdump produced no output at all
    Unknown { exit_code: Option<i32> },
}

impl VerificationStatus {
    pub fn passed(&self) -> bool {
        matches!(self, VerificationStatus::Passed { .. })
    }

    /// One-line description for logs and warnings.
    pub fn summary(&self) -> String {
        match self {
            VerificationStatus::Passed { partitions, .. } => {
                format!("Image verified ({} partitions in metadata)", partitions.len())
            }
            VerificationStatus::Failed { stderr } => {
                format!("Image verification failed: {}", stderr.trim())
            }
            VerificationStatus::Unknown { exit_code } => match exit_code {
                Some(code) => format!("lpdump produced no output (exit code {})", code),
                None => "lpdump produced no output".to_string(),
            },
        }
    }
}

/// Runs `lpdump` against built images.
#[derive(Clone)]
pub struct Verifier {
    locator: Arc<dyn ToolLocator>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(locator: Arc<dyn ToolLocator>) -> Self {
        Self {
            locator,
            timeout: Duration::from_secs(VERIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn verify(&self, image: &Path) -> Result<VerificationStatus, VerificationError> {
        if !image.is_file() {
            return Err(VerificationError::ImageNotFound(image.to_path_buf()));
        }

        let program = self.locator.locate(Tool::Lpdump);
        log::info!(target: "parsed", "[Verify] Running {} {}", program.display(), image.display());

        let mut command = Command::new(&program);
        command.arg(image).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                log::warn!("[Verify] lpdump timed out after {:?}", self.timeout);
                return Err(VerificationError::TimedOut(self.timeout.as_secs()));
            }
            Ok(Err(e)) => {
                return Err(VerificationError::DumpToolNotFound {
                    program: program.display().to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status = classify(stdout, stderr, output.status.code());

        match &status {
            VerificationStatus::Passed { .. } => log::info!(target: "parsed", "[Verify] {}", status.summary()),
            VerificationStatus::Failed { .. } => log::warn!("[Verify] {}", status.summary()),
            VerificationStatus::Unknown { .. } => {
                log::warn!("[Verify] Unknown verification state: {}", status.summary())
            }
        }

        Ok(status)
    }
}

/// Classify captured dump output. stdout wins over stderr.
pub fn classify(stdout: String, stderr: String, exit_code: Option<i32>) -> VerificationStatus {
    if !stdout.trim().is_empty() {
        let partitions = partition_names(&stdout);
        VerificationStatus::Passed {
            dump: stdout,
            partitions,
        }
    } else if !stderr.trim().is_empty() {
        VerificationStatus::Failed { stderr }
    } else {
        VerificationStatus::Unknown { exit_code }
    }
}

/// Partition names listed in an lpdump metadata dump.
pub fn partition_names(dump: &str) -> Vec<String> {
    PARTITION_NAME_REGEX
        .captures_iter(dump)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::paths::FixedToolLocator;

    const DUMP: &str = "\
Metadata version: 10.2
Metadata size: 784 bytes
Metadata max size: 65536 bytes
Metadata slot count: 3
Partition table:
------------------------
  Name: system_a
  Group: main_a
  Attributes: readonly
------------------------
  Name: system_b
  Group: main_b
  Attributes: readonly
------------------------
Block device table:
------------------------
  Partition name: super
";

    #[test]
    fn test_partition_names_from_dump() {
        assert_eq!(partition_names(DUMP), vec!["system_a", "system_b"]);
    }

    #[test]
    fn test_classify_prefers_stdout() {
        let status = classify(DUMP.to_string(), "noise".to_string(), Some(0));
        assert!(status.passed());
    }

    #[test]
    fn test_classify_stderr_only_fails() {
        let status = classify(String::new(), "bad magic\n".to_string(), Some(1));
        assert_eq!(
            status,
            VerificationStatus::Failed {
                stderr: "bad magic\n".to_string()
            }
        );
        assert_eq!(status.summary(), "Image verification failed: bad magic");
    }

    #[test]
    fn test_classify_no_output_is_unknown() {
        let status = classify("  \n".to_string(), String::new(), Some(0));
        assert_eq!(status, VerificationStatus::Unknown { exit_code: Some(0) });
    }

    #[tokio::test]
    async fn test_missing_image() {
        let verifier = Verifier::new(Arc::new(FixedToolLocator::new("lpmake", "lpdump")));
        let err = verifier
            .verify(Path::new("/definitely/not/here/super.img"))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_unspawnable_dump_tool() {
        let temp = tempfile::tempdir().unwrap();
        let image = temp.path().join("super.img");
        std::fs::write(&image, b"img").unwrap();

        let verifier = Verifier::new(Arc::new(FixedToolLocator::new(
            "lpmake",
            temp.path().join("no-such-lpdump"),
        )));
        let err = verifier.verify(&image).await.unwrap_err();
        assert!(matches!(err, VerificationError::DumpToolNotFound { .. }));
    }
}
