//! Bounded external process execution.
//!
//! Tools never go through a shell: the executable is resolved through the
//! [`ToolRegistry`] and receives its arguments verbatim. stdout and stderr are
//! written to `<cwd>/<exe-basename>.stdout.log` / `.stderr.log`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mito_types::{round_to, MitoError, Result};
use tokio::io::AsyncWriteExt;

use crate::cancel::CancelToken;
use crate::registry::ToolRegistry;

/// Exit code reported when the executable cannot be resolved.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the process was stopped at its deadline.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when the executable was found but could not be started.
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

const DEFAULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(exe: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Basename of the executable, used to name log files.
    pub fn basename(&self) -> String {
        Path::new(&self.exe)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.exe.clone())
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.cwd.join(format!("{}.stdout.log", self.basename()))
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.cwd.join(format!("{}.stderr.log", self.basename()))
    }

    /// Human-readable command line for logs and reports.
    pub fn display(&self) -> String {
        std::iter::once(self.exe.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRun {
    pub exe: String,
    pub exit_code: i32,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub elapsed_sec: f64,
    pub timed_out: bool,
    /// No real process ran (dry-run or simulation).
    pub synthetic: bool,
}

impl ToolRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn not_found(&self) -> bool {
        self.exit_code == EXIT_NOT_FOUND
    }

    /// Result for a command that could not be started. The reason goes to the stderr log.
    pub async fn start_failed(command: &ToolCommand, reason: &str) -> Self {
        let run = Self {
            exe: command.exe.clone(),
            exit_code: EXIT_CANNOT_EXECUTE,
            stdout_path: command.stdout_path(),
            stderr_path: command.stderr_path(),
            elapsed_sec: 0.0,
            timed_out: false,
            synthetic: false,
        };
        let note = format!("[mito] cannot execute '{}': {reason}\n", command.exe);
        if let Err(e) = tokio::fs::create_dir_all(&command.cwd).await {
            tracing::warn!(cwd = %command.cwd.display(), error = %e, "Cannot create tool directory");
        }
        if let Err(e) = tokio::fs::write(&run.stderr_path, note).await {
            tracing::warn!(path = %run.stderr_path.display(), error = %e, "Cannot write tool log");
        }
        if !run.stdout_path.exists() {
            let _ = tokio::fs::write(&run.stdout_path, "").await;
        }
        run
    }

    /// Result for an executable that could not be resolved; no logs are written.
    pub fn unresolved(command: &ToolCommand) -> Self {
        Self {
            exe: command.exe.clone(),
            exit_code: EXIT_NOT_FOUND,
            stdout_path: command.stdout_path(),
            stderr_path: command.stderr_path(),
            elapsed_sec: 0.0,
            timed_out: false,
            synthetic: false,
        }
    }

    /// Contents of the stderr log, empty when it was never written.
    pub async fn read_stderr(&self) -> String {
        tokio::fs::read_to_string(&self.stderr_path)
            .await
            .unwrap_or_default()
    }

    pub async fn read_stdout(&self) -> String {
        tokio::fs::read_to_string(&self.stdout_path)
            .await
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// ToolRunner
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one command to completion, deadline, or cancellation.
    ///
    /// Returns `Err(MitoError::Cancelled)` when `cancel` fires; every other
    /// outcome, including a missing executable and a timeout, is a `ToolRun`.
    async fn run(&self, command: &ToolCommand, cancel: &CancelToken) -> Result<ToolRun>;
}

/// Write a synthetic run: marker line on stdout, empty stderr, exit 0.
pub async fn write_synthetic_run(command: &ToolCommand, marker: &str) -> Result<ToolRun> {
    tokio::fs::create_dir_all(&command.cwd).await?;
    let stdout_path = command.stdout_path();
    let stderr_path = command.stderr_path();
    tokio::fs::write(&stdout_path, format!("[{marker}] {}\n", command.display())).await?;
    tokio::fs::write(&stderr_path, "").await?;
    Ok(ToolRun {
        exe: command.exe.clone(),
        exit_code: 0,
        stdout_path,
        stderr_path,
        elapsed_sec: 0.0,
        timed_out: false,
        synthetic: true,
    })
}

/// Runs real processes, or writes dry-run markers when `dry_run` is set.
pub struct ProcessRunner {
    registry: Arc<ToolRegistry>,
    dry_run: bool,
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            dry_run: false,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand, cancel: &CancelToken) -> Result<ToolRun> {
        if cancel.is_cancelled() {
            return Err(MitoError::Cancelled);
        }
        if self.dry_run {
            tracing::info!(tool = %command.exe, "Dry run, skipping execution");
            return write_synthetic_run(command, "dry-run").await;
        }

        let Some(resolved) = self.registry.resolve(&command.exe) else {
            tracing::warn!(tool = %command.exe, "Executable not found");
            return Ok(ToolRun::unresolved(command));
        };

        tokio::fs::create_dir_all(&command.cwd).await?;
        let stdout_path = command.stdout_path();
        let stderr_path = command.stderr_path();
        let stdout_file = std::fs::File::create(&stdout_path)?;
        let stderr_file = std::fs::File::create(&stderr_path)?;

        let mut cmd = tokio::process::Command::new(&resolved);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        // On Unix, use process_group for clean kill
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        tracing::info!(tool = %command.exe, cwd = %command.cwd.display(), command = %command.display(), "Running tool");
        let start = tokio::time::Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(tool = %command.exe, path = %resolved.display(), error = %e, "Tool failed to start");
                return Ok(ToolRun::start_failed(command, &e.to_string()).await);
            }
        };

        let deadline = async {
            match command.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut run = ToolRun {
            exe: command.exe.clone(),
            exit_code: 0,
            stdout_path,
            stderr_path,
            elapsed_sec: 0.0,
            timed_out: false,
            synthetic: false,
        };

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                run.exit_code = status.code().unwrap_or(-1);
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(signal) = status.signal() {
                        run.exit_code = 128 + signal;
                        let note = if signal == libc::SIGKILL {
                            format!("[mito] process killed by signal {signal} (possible out of memory)")
                        } else {
                            format!("[mito] process terminated by signal {signal}")
                        };
                        append_line(&run.stderr_path, &note).await;
                    }
                }
            }
            _ = deadline => {
                terminate(&mut child, self.grace).await;
                run.exit_code = EXIT_TIMEOUT;
                run.timed_out = true;
                let secs = command.timeout.map(|t| t.as_secs()).unwrap_or_default();
                append_line(&run.stderr_path, &format!("[mito] command timed out after {secs}s")).await;
            }
            _ = cancel.cancelled() => {
                terminate(&mut child, self.grace).await;
                tracing::warn!(tool = %command.exe, "Tool cancelled");
                return Err(MitoError::Cancelled);
            }
        }

        run.elapsed_sec = round_to(start.elapsed().as_secs_f64(), 3);
        tracing::info!(
            tool = %command.exe,
            exit_code = run.exit_code,
            timed_out = run.timed_out,
            elapsed_sec = run.elapsed_sec,
            "Tool finished"
        );
        Ok(run)
    }
}

/// SIGTERM the process group, wait out the grace period, then kill.
async fn terminate(child: &mut tokio::process::Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Send SIGTERM to the process group
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
        }
        tokio::select! {
            _ = child.wait() => {}
            _ = tokio::time::sleep(grace) => {
                let _ = child.kill().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
        let _ = child.kill().await;
    }
}

async fn append_line(path: &Path, line: &str) {
    let file = tokio::fs::OpenOptions::new().append(true).open(path).await;
    if let Ok(mut file) = file {
        let _ = file.write_all(format!("{line}\n").as_bytes()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Arc::new(ToolRegistry::new())).with_grace(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn runs_process_and_writes_logs() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("echo", dir.path()).args(["hello", "world"]);

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(run.stdout_path, dir.path().join("echo.stdout.log"));
        assert_eq!(run.read_stdout().await.trim(), "hello world");
        assert!(run.stderr_path.exists());
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("echo", dir.path()).args(["$HOME", "&&", "false"]);

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert_eq!(run.read_stdout().await.trim(), "$HOME && false");
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("false", dir.path());

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert_eq!(run.exit_code, 1);
        assert!(!run.succeeded());
        assert!(run.stdout_path.exists() && run.stderr_path.exists());
    }

    #[tokio::test]
    async fn missing_executable_returns_127_without_logs() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("mito-definitely-missing-tool", dir.path());

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert!(run.not_found());
        assert!(!run.stdout_path.exists());
        assert!(!run.stderr_path.exists());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_failed_run_with_logs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("mito-broken-tool");
        std::fs::write(&script, "#!/nonexistent/mito-interpreter\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        // resolvable and executable, but exec fails on the missing interpreter
        let command = ToolCommand::new(script.to_str().unwrap(), dir.path().join("run"));

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert!(!run.succeeded());
        assert_eq!(run.exit_code, EXIT_CANNOT_EXECUTE);
        assert!(run.read_stderr().await.contains("cannot execute"));
        assert!(run.stdout_path.exists());
    }

    #[tokio::test]
    async fn timeout_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("sleep", dir.path())
            .args(["30"])
            .timeout(Duration::from_millis(100));

        let run = runner().run(&command, &CancelToken::new()).await.unwrap();
        assert!(run.timed_out);
        assert_eq!(run.exit_code, EXIT_TIMEOUT);
        assert!(run.read_stderr().await.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("sleep", dir.path()).args(["30"]);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = runner().run(&command, &cancel).await;
        assert!(matches!(result, Err(MitoError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn dry_run_writes_marker_and_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let command = ToolCommand::new("mito-definitely-missing-tool", dir.path()).args(["-t", "4"]);

        let run = runner()
            .dry_run(true)
            .run(&command, &CancelToken::new())
            .await
            .unwrap();
        assert!(run.succeeded());
        assert!(run.synthetic);
        assert!(run
            .read_stdout()
            .await
            .starts_with("[dry-run] mito-definitely-missing-tool -t 4"));
        assert_eq!(run.read_stderr().await, "");
    }

    #[test]
    fn log_paths_use_basename() {
        let command = ToolCommand::new("/opt/spades/bin/spades.py", "/work/02_assembly");
        assert_eq!(
            command.stderr_path(),
            PathBuf::from("/work/02_assembly/spades.py.stderr.log")
        );
    }
}
