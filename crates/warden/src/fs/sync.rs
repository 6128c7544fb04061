//! Blocking facade over `std::fs`.

use std::ffi::OsStr;
use std::fs::{File, ReadDir};
use std::path::{Path, PathBuf};

use super::process::GuardedCommand;
use super::{OpenOptions, host_path};
use crate::error::GuardResult;
use crate::interceptor::{Interceptor, Operation};
use crate::path::Canonicalizer;

/// Blocking filesystem and process access, checked against the current scope.
///
/// ```no_run
/// use std::sync::Arc;
/// use warden::fs::GuardedFs;
/// use warden::{Canonicalizer, FlagSet, Policy, SecurityScope};
///
/// let fs = GuardedFs::new(Canonicalizer::new("/srv/project")?);
/// let policy = Policy::new(FlagSet::parse("rl")).with_path("secrets", FlagSet::NONE);
///
/// SecurityScope::sync_scope(Some(Arc::new(policy)), || {
///     assert!(fs.read_to_string("notes.txt").is_ok());
///     assert!(fs.read_to_string("secrets/key.pem").unwrap_err().is_denied());
/// });
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct GuardedFs {
    interceptor: Interceptor,
}

impl GuardedFs {
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
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> GuardResult<File> {
        let target = self.guard(options.operation(), path.as_ref())?;
        Ok(options.to_std().open(target)?)
    }

    /// Read a whole file. Needs `r`.
    pub fn read(&self, path: impl AsRef<Path>) -> GuardResult<Vec<u8>> {
        let target = self.guard(Operation::Read, path.as_ref())?;
        Ok(std::fs::read(target)?)
    }

    /// Read a whole file as UTF-8. Needs `r`.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> GuardResult<String> {
        let target = self.guard(Operation::Read, path.as_ref())?;
        Ok(std::fs::read_to_string(target)?)
    }

    /// Create or truncate a file and write `contents`. Needs `w`.
    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(std::fs::write(target, contents)?)
    }

    /// Append `contents`, creating the file if needed. Needs `w`.
    pub fn append(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> GuardResult<()> {
        use std::io::Write as _;

        let mut file = self.open(path, OpenOptions::new().append(true).create(true))?;
        file.write_all(contents.as_ref())?;
        Ok(())
    }

    /// Copy a file. Needs `r` on `from` and `w` on `to`.
    pub fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> GuardResult<u64> {
        let source = self.guard(Operation::Read, from.as_ref())?;
        let dest = self.guard(Operation::Write, to.as_ref())?;
        Ok(std::fs::copy(source, dest)?)
    }

    /// Rename a file or directory. Needs `d` on `from` and `w` on `to`.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> GuardResult<()> {
        let source = self.guard(Operation::Delete, from.as_ref())?;
        let dest = self.guard(Operation::Write, to.as_ref())?;
        Ok(std::fs::rename(source, dest)?)
    }

    /// Create a directory. Needs `w` on the new directory.
    pub fn create_dir(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(std::fs::create_dir(target)?)
    }

    /// Create a directory and its missing parents. Needs `w` on the leaf.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Write, path.as_ref())?;
        Ok(std::fs::create_dir_all(target)?)
    }

    /// Enumerate a directory. Needs `l`.
    pub fn read_dir(&self, path: impl AsRef<Path>) -> GuardResult<ReadDir> {
        let target = self.guard(Operation::List, path.as_ref())?;
        Ok(std::fs::read_dir(target)?)
    }

    /// Remove a file. Needs `d`.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(std::fs::remove_file(target)?)
    }

    /// Remove an empty directory. Needs `d`.
    pub fn remove_dir(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(std::fs::remove_dir(target)?)
    }

    /// Remove a directory tree. Needs `d` on the top of the tree.
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> GuardResult<()> {
        let target = self.guard(Operation::Delete, path.as_ref())?;
        Ok(std::fs::remove_dir_all(target)?)
    }

    /// Build a command for `program`. The `x` check runs when it is started.
    pub fn command(&self, program: impl AsRef<OsStr>) -> GuardedCommand {
        GuardedCommand::new(self.interceptor.clone(), program)
    }

    /// Build a command running `script` through the platform shell.
    pub fn shell(&self, script: impl AsRef<OsStr>) -> GuardedCommand {
        GuardedCommand::shell(self.interceptor.clone(), script)
    }
}
