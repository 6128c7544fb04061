//! Guarded process builders.
//!
//! Spawning needs `x` at the command's working directory: there is no finer
//! grained path for "run a command". Commands default to the facade root as
//! their working directory so that the directory checked is the directory
//! the process actually starts in.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Output, Stdio};

use super::host_path;
use crate::error::GuardResult;
use crate::interceptor::{Interceptor, Operation};

fn shell_invocation() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// A `std::process::Command` that checks `x` before starting.
#[derive(Debug)]
pub struct GuardedCommand {
    interceptor: Interceptor,
    working_dir: PathBuf,
    inner: std::process::Command,
}

impl GuardedCommand {
    pub(crate) fn new(interceptor: Interceptor, program: impl AsRef<OsStr>) -> Self {
        let working_dir = interceptor.root().to_path_buf();
        let mut inner = std::process::Command::new(program);
        inner.current_dir(&working_dir);
        Self {
            interceptor,
            working_dir,
            inner,
        }
    }

    pub(crate) fn shell(interceptor: Interceptor, script: impl AsRef<OsStr>) -> Self {
        let (program, flag) = shell_invocation();
        let mut command = Self::new(interceptor, program);
        command.arg(flag).arg(script);
        command
    }

    /// Add an argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.inner.arg(arg);
        self
    }

    /// Add several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    /// Set an environment variable.
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.inner.env(key, value);
        self
    }

    /// Run in `dir` (relative to the facade root) instead of the root.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.working_dir = host_path(self.interceptor.root(), dir.as_ref());
        self.inner.current_dir(&self.working_dir);
        self
    }

    /// Configure stdin.
    pub fn stdin(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdin(cfg);
        self
    }

    /// Configure stdout.
    pub fn stdout(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdout(cfg);
        self
    }

    /// Configure stderr.
    pub fn stderr(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stderr(cfg);
        self
    }

    /// The directory the `x` check is made against.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn check(&self) -> GuardResult<()> {
        self.interceptor.check(Operation::Execute, &self.working_dir)?;
        Ok(())
    }

    /// Check `x` and spawn.
    pub fn spawn(&mut self) -> GuardResult<Child> {
        self.check()?;
        Ok(self.inner.spawn()?)
    }

    /// Check `x`, run to completion and collect output.
    pub fn output(&mut self) -> GuardResult<Output> {
        self.check()?;
        Ok(self.inner.output()?)
    }

    /// Check `x`, run to completion and return the exit status.
    pub fn status(&mut self) -> GuardResult<ExitStatus> {
        self.check()?;
        Ok(self.inner.status()?)
    }
}

/// A `tokio::process::Command` that checks `x` before starting.
#[derive(Debug)]
pub struct AsyncGuardedCommand {
    interceptor: Interceptor,
    working_dir: PathBuf,
    inner: tokio::process::Command,
}

impl AsyncGuardedCommand {
    pub(crate) fn new(interceptor: Interceptor, program: impl AsRef<OsStr>) -> Self {
        let working_dir = interceptor.root().to_path_buf();
        let mut inner = tokio::process::Command::new(program);
        inner.current_dir(&working_dir).kill_on_drop(true);
        Self {
            interceptor,
            working_dir,
            inner,
        }
    }

    pub(crate) fn shell(interceptor: Interceptor, script: impl AsRef<OsStr>) -> Self {
        let (program, flag) = shell_invocation();
        let mut command = Self::new(interceptor, program);
        command.arg(flag).arg(script);
        command
    }

    /// Add an argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.inner.arg(arg);
        self
    }

    /// Add several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    /// Set an environment variable.
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.inner.env(key, value);
        self
    }

    /// Run in `dir` (relative to the facade root) instead of the root.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.working_dir = host_path(self.interceptor.root(), dir.as_ref());
        self.inner.current_dir(&self.working_dir);
        self
    }

    /// Configure stdin.
    pub fn stdin(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdin(cfg);
        self
    }

    /// Configure stdout.
    pub fn stdout(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stdout(cfg);
        self
    }

    /// Configure stderr.
    pub fn stderr(&mut self, cfg: impl Into<Stdio>) -> &mut Self {
        self.inner.stderr(cfg);
        self
    }

    /// The directory the `x` check is made against.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn check(&self) -> GuardResult<()> {
        self.interceptor.check(Operation::Execute, &self.working_dir)?;
        Ok(())
    }

    /// Check `x` and spawn.
    ///
    /// The child is killed if its handle is dropped, so cancelling the
    /// surrounding unit of work also stops the process.
    pub fn spawn(&mut self) -> GuardResult<tokio::process::Child> {
        self.check()?;
        Ok(self.inner.spawn()?)
    }

    /// Check `x`, run to completion and collect output.
    pub async fn output(&mut self) -> GuardResult<Output> {
        self.check()?;
        Ok(self.inner.output().await?)
    }

    /// Check `x`, run to completion and return the exit status.
    pub async fn status(&mut self) -> GuardResult<ExitStatus> {
        self.check()?;
        Ok(self.inner.status().await?)
    }
}
