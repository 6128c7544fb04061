//! Capability-checking facade over filesystem and process primitives.
//!
//! Untrusted execution paths must perform their I/O through these types:
//!
//! - [`GuardedFs`] wraps `std::fs` and `std::process`;
//! - [`AsyncGuardedFs`] wraps `tokio::fs` and `tokio::process`.
//!
//! Every method checks the current [`SecurityScope`](crate::SecurityScope)
//! through the [`Interceptor`] *before* touching the filesystem, so a denied
//! operation has no partial effect. Relative paths are resolved against the
//! facade's root, the same root the policy is evaluated against, and spawned
//! commands run in the root unless given another working directory.
//!
//! ## Limitations
//!
//! The facade only protects what goes through it. An executor that hands
//! untrusted code direct access to `std::fs`, `std::process`, `libc` or any
//! other I/O surface is not covered. Paths are checked lexically, so a
//! symbolic link inside a permitted directory can point elsewhere; pair the
//! guard with an OS-level sandbox where that matters.

mod async_fs;
mod process;
mod sync;

use std::path::{Path, PathBuf};

pub use async_fs::AsyncGuardedFs;
pub use process::{AsyncGuardedCommand, GuardedCommand};
pub use sync::GuardedFs;

use crate::interceptor::{OpenMode, Operation};

/// Options for opening a file through the facade.
///
/// Mirrors `std::fs::OpenOptions`, but keeps the mode visible so the open
/// can be classified as a read or a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    mode: OpenMode,
}

impl OpenOptions {
    /// Options with every flag unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open for reading.
    pub fn read(&mut self, read: bool) -> &mut Self {
        self.mode.read = read;
        self
    }

    /// Open for writing.
    pub fn write(&mut self, write: bool) -> &mut Self {
        self.mode.write = write;
        self
    }

    /// Open for appending.
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.mode.append = append;
        self
    }

    /// Truncate on open.
    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.mode.truncate = truncate;
        self
    }

    /// Create the file if it does not exist.
    pub fn create(&mut self, create: bool) -> &mut Self {
        self.mode.create = create;
        self
    }

    /// Create the file, failing if it exists.
    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.mode.create_new = create_new;
        self
    }

    /// The mode flags.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The operation this open amounts to.
    pub fn operation(&self) -> Operation {
        Operation::for_open(&self.mode)
    }

    fn to_std(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(self.mode.read)
            .write(self.mode.write)
            .append(self.mode.append)
            .truncate(self.mode.truncate)
            .create(self.mode.create)
            .create_new(self.mode.create_new);
        options
    }

    fn to_tokio(self) -> tokio::fs::OpenOptions {
        tokio::fs::OpenOptions::from(self.to_std())
    }
}

/// Resolve a caller path to the host path the operation will touch.
fn host_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
