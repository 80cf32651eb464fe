//! Package manager subprocesses.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::PluginResult;
use crate::core::PackageManagerKind;

/// Runs external programs to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` in `cwd`, returning its exit code.
    ///
    /// Output is streamed to the log line by line while the process runs. A
    /// process killed by a signal has no exit code.
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> PluginResult<Option<i32>>;
}

/// [`ProcessRunner`] on `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

async fn forward<R: AsyncRead + Unpin>(stream: Option<R>, is_error: bool) {
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        }

        if is_error {
            tracing::error!("{line}");
        } else {
            tracing::info!("{line}");
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> PluginResult<Option<i32>> {
        tracing::debug!(program, ?args, cwd = %cwd.display(), "Spawning");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        tokio::join!(forward(child.stdout.take(), false), forward(child.stderr.take(), true));

        let status = child.wait().await?;
        tracing::debug!(program, code = ?status.code(), "Process exited");

        Ok(status.code())
    }
}

/// Command lines for the supported package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
}

impl From<PackageManagerKind> for PackageManager {
    fn from(kind: PackageManagerKind) -> Self {
        match kind {
            PackageManagerKind::Npm => Self::Npm,
            PackageManagerKind::Yarn => Self::Yarn,
        }
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl PackageManager {
    /// Executable name.
    pub fn program(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
        }
    }

    /// Arguments installing `id` at `tag`.
    pub fn install_args(self, id: &str, tag: &str) -> Vec<String> {
        let package = format!("{id}@{tag}");

        match self {
            Self::Npm => args(&[
                "install",
                "--prefer-offline",
                "--no-audit",
                "--unsafe-perm",
                "--progress=true",
                &package,
            ]),
            Self::Yarn => args(&["add", "--unsafe-perm", "--ignore-engines", &package]),
        }
    }

    /// Arguments removing `id`.
    pub fn uninstall_args(self, id: &str) -> Vec<String> {
        match self {
            Self::Npm => args(&["uninstall", "--unsafe-perm", "--progress=true", id]),
            Self::Yarn => args(&["remove", id]),
        }
    }

    /// Arguments upgrading `id` to `tag`.
    pub fn update_args(self, id: &str, tag: &str) -> Vec<String> {
        let package = format!("{id}@{tag}");

        match self {
            Self::Npm => args(&["install", "--unsafe-perm", "--no-audit", "--progress=true", &package]),
            Self::Yarn => args(&["upgrade", "--ignore-engines", &package]),
        }
    }

    /// Arguments removing a package superseded by its certified replacement.
    pub fn remove_superseded_args(self, name: &str) -> Vec<String> {
        match self {
            Self::Npm => args(&["uninstall", "--unsafe-perm", name]),
            Self::Yarn => args(&["remove", name]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npm_arguments() {
        let npm = PackageManager::from(PackageManagerKind::Npm);
        assert_eq!(npm.program(), "npm");
        assert_eq!(
            npm.install_args("acme-lights", "latest"),
            vec!["install", "--prefer-offline", "--no-audit", "--unsafe-perm", "--progress=true", "acme-lights@latest"]
        );
        assert_eq!(npm.uninstall_args("acme-lights"), vec!["uninstall", "--unsafe-perm", "--progress=true", "acme-lights"]);
        assert_eq!(
            npm.update_args("@hoobs/ring", "2.0.0"),
            vec!["install", "--unsafe-perm", "--no-audit", "--progress=true", "@hoobs/ring@2.0.0"]
        );
        assert_eq!(npm.remove_superseded_args("homebridge-ring"), vec!["uninstall", "--unsafe-perm", "homebridge-ring"]);
    }

    #[test]
    fn test_yarn_arguments() {
        let yarn = PackageManager::from(PackageManagerKind::Yarn);
        assert_eq!(yarn.program(), "yarn");
        assert_eq!(yarn.install_args("acme", "beta"), vec!["add", "--unsafe-perm", "--ignore-engines", "acme@beta"]);
        assert_eq!(yarn.uninstall_args("acme"), vec!["remove", "acme"]);
        assert_eq!(yarn.update_args("acme", "latest"), vec!["upgrade", "--ignore-engines", "acme@latest"]);
        assert_eq!(yarn.remove_superseded_args("acme"), vec!["remove", "acme"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = TokioProcessRunner;

        let code = runner
            .run("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()], dir.path())
            .await
            .unwrap();

        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_runner_missing_program() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = TokioProcessRunner.run("hbpm-no-such-program", &[], dir.path()).await;
        assert!(result.is_err());
    }
}
