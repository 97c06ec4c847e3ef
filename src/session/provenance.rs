//! Provenance records
//!
//! Every rotation writes `<artifact>.md` next to the persisted data. It
//! names the host, the logger version and the robot, then lists the output
//! of the software status commands. With `code_status_cmd_prefixes`
//! configured, the commands are run once per prefix (e.g. through `ssh` on
//! each machine of the robot). Commands that fail are left out.

use crate::error::{Result, ResultExt};
use crate::storage::Artifact;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

/// Status of the robotology superbuild sources
pub const GIT_STATUS_CMD: &str =
    "bash ${ROBOTOLOGY_SUPERBUILD_SOURCE_DIR}/scripts/robotologyGitStatus.sh";

/// Installed system packages
pub const APT_CMD: &str = "apt list --installed";

/// Runs a shell command and captures its output
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Stdout of `command`, `None` if it could not run or exited non-zero
    fn run(&self, command: &str) -> Option<String>;
}

/// Runs commands through `sh -c`
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Option<String> {
        let output = Command::new("sh").arg("-c").arg(command).output().ok()?;
        if !output.status.success() {
            tracing::debug!("Status command `{}` exited with {}", command, output.status);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Writes one provenance file per rotation
pub struct ProvenanceWriter {
    robot_name: String,
    prefixes: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ProvenanceWriter {
    pub fn new(robot_name: impl Into<String>, prefixes: Vec<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            robot_name: robot_name.into(),
            prefixes,
            runner,
        }
    }

    fn section(&self, command: &str, heading: &str) -> String {
        match self.runner.run(command) {
            Some(output) => format!("### {}\n```\n{}\n```\n", heading, output.trim_end()),
            None => String::new(),
        }
    }

    /// Markdown body for `artifact`
    pub fn render(&self, artifact: &Artifact) -> String {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        let mut out = String::new();
        let _ = writeln!(out, "# {}", artifact.name);
        let _ = writeln!(
            out,
            "File containing all the installed software required to replicate the experiment.\n"
        );
        let _ = writeln!(out, "- Hostname: `{}`", host);
        let _ = writeln!(out, "- {} version: `{}`", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "- Robot: `{}`\n", self.robot_name);

        if self.prefixes.is_empty() {
            out.push_str(&self.section(GIT_STATUS_CMD, "ROBOTOLOGY"));
            out.push_str(&self.section(APT_CMD, "APT"));
        } else {
            for prefix in &self.prefixes {
                let _ = writeln!(out, "## `{}`", prefix);
                out.push_str(&self.section(&format!("{} \"{}\"", prefix, GIT_STATUS_CMD), "ROBOTOLOGY"));
                out.push_str(&self.section(&format!("{} \"{}\"", prefix, APT_CMD), "APT"));
            }
        }
        out
    }

    /// Write `<artifact>.md`
    pub fn write(&self, artifact: &Artifact) -> Result<PathBuf> {
        let path = artifact.path_with_suffix(".md");
        std::fs::write(&path, self.render(artifact))
            .with_context(|| format!("Failed to write provenance record {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_commands() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(GIT_STATUS_CMD))
            .times(1)
            .returning(|_| Some("robotology: clean\n".to_string()));
        runner.expect_run().with(eq(APT_CMD)).times(1).returning(|_| None);

        let writer = ProvenanceWriter::new("ergoCubSN000", Vec::new(), Arc::new(runner));
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(dir.path(), "robot_logger_device_2024_01_01");
        let body = writer.render(&artifact);

        assert!(body.starts_with("# robot_logger_device_2024_01_01\n"));
        assert!(body.contains("- Robot: `ergoCubSN000`"));
        assert!(body.contains("### ROBOTOLOGY\n```\nrobotology: clean\n```"));
        // Failed commands are omitted
        assert!(!body.contains("### APT"));
    }

    #[test]
    fn test_prefixed_commands() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.starts_with("ssh head ") || cmd.starts_with("ssh torso "))
            .times(4)
            .returning(|cmd| Some(format!("ran {}", cmd.len())));

        let writer = ProvenanceWriter::new(
            "",
            vec!["ssh head".to_string(), "ssh torso".to_string()],
            Arc::new(runner),
        );
        let body = writer.render(&Artifact::new("/tmp", "a"));
        assert!(body.contains("## `ssh head`"));
        assert!(body.contains("## `ssh torso`"));
        assert_eq!(body.matches("### APT").count(), 2);
    }

    #[test]
    fn test_write_file() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| None);
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(dir.path(), "run_1");

        let path = ProvenanceWriter::new("r", Vec::new(), Arc::new(runner))
            .write(&artifact)
            .unwrap();
        assert_eq!(path, dir.path().join("run_1.md"));
        assert!(std::fs::read_to_string(path).unwrap().contains("# run_1"));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| None);
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(dir.path().join("missing"), "run_1");
        assert!(ProvenanceWriter::new("r", Vec::new(), Arc::new(runner))
            .write(&artifact)
            .is_err());
    }

    #[test]
    fn test_shell_runner() {
        assert_eq!(ShellRunner.run("echo hello").as_deref(), Some("hello\n"));
        assert!(ShellRunner.run("exit 3").is_none());
    }
}
