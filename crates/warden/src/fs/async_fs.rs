//! Async facade over `tokio::fs`.
//!
//! Checks run when the returned future is first polled, against the scope of
//! the task polling it. Run untrusted work inside
//! [`SecurityScope::scope`](crate::SecurityScope::scope) so that scope is the
//! right one.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs::{File, ReadDir};
use tokio::io::AsyncWriteExt as _;

use super::process::AsyncGuardedCommand;
use super::{OpenOptions, host_path};
use crate::error::GuardResult;
use crate::interceptor::{Interceptor, Operation};
use crate::path::Canonicalizer;

/// Async filesystem and process access, checked against the current scope.
#[derive(Clone, Debug)]
pub struct AsyncGuardedFs {
    interceptor: Interceptor,
}

impl AsyncGuardedFs {
    /// Create a facade rooted at `canon`'s root.
    pub fn new(canon: Canonicalizer) -> Self {
        Self::from_interceptor(Interceptor::new(canon))
    }

    /// Create a facade around an existing interceptor.
    pub fn from_interceptor(interceptor: Interceptor) -> Self {
        Self { interceptor }
    }

    /// The interceptor performing the checks.
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// The root relative paths are resolved against.
    pub fn root(&self) -> &Path {
        self.interceptor.root()
    }

    fn guard(&self, op: Operation, path: &Path) -> GuardResult<PathBuf> {
        self.interceptor.check(op, path)?;
        Ok(host_path(self.root(), path))
    }

    /// Open a file; needs `w` if the options can modify it, `r` otherwise.
    pub async fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> GuardResult<File> {
        let target = self.guard(options.operation(), path.as_ref())?;
        Ok(options.to_tokio().open(target).await?)
    }

    /// Read a whole file. Needs `r`.
    pub async fn read(&self, path: impl AsRef<Path>) -> GuardResult<Vec<u8>> {
        let target = self.guard(Operation::Read, path.as_ref())?;
        Ok(tokio::fs::read(target).await?)
    }

    /// Read a whole file as UTF-8. Needs `r`.
    pub async fn read_to_string(&self, path: impl AsRef<Path>) -> GuardResult<String> {
        let target = self.guard(Operation::Read, path.as_ref())?;
        Ok(tokio::fs::read_to_string(target).await?)
    }

    /// Create or truncate a file and write `contents`. Needs `w`.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(tokio::fs::write(target, contents).await?)
    }

    /// Append `contents`, creating the file if needed. Needs `w`.
    pub async fn append(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> GuardResult<()> {
        let mut file = self
            .open(path, OpenOptions::new().append(true).create(true))
            .await?;
        file.write_all(contents.as_ref()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Copy a file. Needs `r` on `from` and `w` on `to`.
    pub async fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> GuardResult<u64> {
        let source = self.guard(Operation::Read, from.as_ref())?;
        let dest = self.guard(Operation::Write, to.as_ref())?;
        Ok(tokio::fs::copy(source, dest).await?)
    }

    /// Rename a file or directory. Needs `d` on `from` and `w` on `to`.
    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> GuardResult<()> {
        let source = self.guard(Operation::Delete, from.as_ref())?;
        let dest = self.guard(Operation::Write, to.as_ref())?;
        Ok(tokio::fs::rename(source, dest).await?)
    }

    /// Create a directory. Needs `w` on the new directory.
    pub async fn create_dir(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(tokio::fs::create_dir(target).await?)
    }

    /// Create a directory and its missing parents. Needs `w` on the leaf.
    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(tokio::fs::create_dir_all(target).await?)
    }

    /// Enumerate a directory. Needs `l`.
    pub async fn read_dir(&self, path: impl AsRef<Path>) -> GuardResult<ReadDir> {
        let target = self.guard(Operation::List, path.as_ref())?;
        Ok(tokio::fs::read_dir(target).await?)
    }

    /// Remove a file. Needs `d`.
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(tokio::fs::remove_file(target).await?)
    }

    /// Remove an empty directory. Needs `d`.
    pub async fn remove_dir(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(tokio::fs::remove_dir(target).await?)
    }

    /// Remove a directory tree. Needs `d` on the top of the tree.
    pub async fn remove_dir_all(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(tokio::fs::remove_dir_all(target).await?)
    }

    /// Build a command for `program`. The `x` check runs when it is started.
    pub fn command(&self, program: impl AsRef<OsStr>) -> AsyncGuardedCommand {
        AsyncGuardedCommand::new(self.interceptor.clone(), program)
    }

    /// Build a command running `script` through the platform shell.
    pub fn shell(&self, script: impl AsRef<OsStr>) -> AsyncGuardedCommand {
        AsyncGuardedCommand::shell(self.interceptor.clone(), script)
    }
}
