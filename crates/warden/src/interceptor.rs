//! The enforcement point.
//!
//! The [`Interceptor`] turns an attempted operation into a required
//! capability and a target path, resolves the current scope's policy at that
//! path, and either lets the operation proceed or returns a
//! [`PolicyViolation`] before any effect happens.
//!
//! | Operation | Capability | Path checked |
//! |-----------|------------|--------------|
//! | open for reading | `r` | the file |
//! | open for writing, appending or creating | `w` | the file |
//! | enumerate a directory | `l` | the directory |
//! | remove a file or directory (recursively or not) | `d` | the removed path |
//! | spawn a process or shell command | `x` | the working directory |
//!
//! The interceptor only sees what is routed through it. Code that reaches
//! `std::fs` or `std::process` directly is not checked; see [`crate::fs`]
//! for the facade untrusted execution paths must use.

use std::path::Path;

use crate::error::PolicyViolation;
use crate::flags::Capability;
use crate::path::Canonicalizer;
use crate::policy::Policy;
use crate::scope::SecurityScope;

/// A sensitive operation, classified by the capability it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Open a file for reading.
    Read,
    /// Open a file for writing, appending or creating.
    Write,
    /// Enumerate directory entries.
    List,
    /// Remove a file, an empty directory or a directory tree.
    Delete,
    /// Spawn a subprocess or shell command.
    Execute,
}

impl Operation {
    /// The capability this operation requires.
    pub fn capability(self) -> Capability {
        match self {
            Operation::Read => Capability::Read,
            Operation::Write => Capability::Write,
            Operation::List => Capability::List,
            Operation::Delete => Capability::Delete,
            Operation::Execute => Capability::Execute,
        }
    }

    /// Classify a file open by its mode.
    ///
    /// Any mode that can modify or create the file needs `w`; everything
    /// else needs `r`.
    pub fn for_open(mode: &OpenMode) -> Self {
        if mode.write || mode.append || mode.create || mode.create_new || mode.truncate {
            Operation::Write
        } else {
            Operation::Read
        }
    }
}

/// The mode flags of a file open, as far as classification is concerned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Open for appending.
    pub append: bool,
    /// Create the file if missing.
    pub create: bool,
    /// Create the file, failing if it exists.
    pub create_new: bool,
    /// Truncate the file on open.
    pub truncate: bool,
}

/// Checks operations against the current [`SecurityScope`].
#[derive(Clone, Debug)]
pub struct Interceptor {
    canon: Canonicalizer,
}

impl Interceptor {
    /// Create an interceptor that resolves paths against `canon`'s root.
    pub fn new(canon: Canonicalizer) -> Self {
        Self { canon }
    }

    /// The canonicalizer used for lookups.
    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    /// The root that relative paths are resolved against.
    pub fn root(&self) -> &Path {
        self.canon.root()
    }

    /// Check `op` on `path` against the current scope.
    ///
    /// With no policy in scope, every operation is allowed.
    pub fn check(&self, op: Operation, path: impl AsRef<Path>) -> Result<(), PolicyViolation> {
        match SecurityScope::current() {
            Some(policy) => self.check_with(&policy, op, path),
            None => {
                tracing::trace!(operation = ?op, path = %path.as_ref().display(), "unrestricted");
                Ok(())
            }
        }
    }

    /// Check `op` on `path` against an explicit policy.
    pub fn check_with(
        &self,
        policy: &Policy,
        op: Operation,
        path: impl AsRef<Path>,
    ) -> Result<(), PolicyViolation> {
        let path = path.as_ref();
        let capability = op.capability();
        let canonical = self.canon.canonicalize(path);
        let granted = policy.resolve(&canonical);

        if granted.allows(capability) {
            tracing::trace!(
                operation = ?op,
                path = %canonical,
                granted = %granted,
                "policy allowed access"
            );
            Ok(())
        } else {
            tracing::warn!(
                operation = ?op,
                path = %canonical,
                required = %capability,
                granted = %granted,
                "policy denied access"
            );
            Err(PolicyViolation::new(capability, path.display().to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::flags::FlagSet;

    fn interceptor() -> Interceptor {
        Interceptor::new(Canonicalizer::new("/srv/project").unwrap())
    }

    fn scenario_policy() -> Arc<Policy> {
        Arc::new(Policy::new(FlagSet::parse("rl")).with_path("secrets", FlagSet::NONE))
    }

    #[test]
    fn test_open_classification() {
        let read = OpenMode {
            read: true,
            ..OpenMode::default()
        };
        assert_eq!(Operation::for_open(&read), Operation::Read);

        for mode in [
            OpenMode { write: true, ..OpenMode::default() },
            OpenMode { append: true, ..OpenMode::default() },
            OpenMode { create: true, ..OpenMode::default() },
            OpenMode { create_new: true, ..OpenMode::default() },
            OpenMode { read: true, truncate: true, ..OpenMode::default() },
        ] {
            assert_eq!(Operation::for_open(&mode), Operation::Write, "{mode:?}");
        }
    }

    #[test]
    fn test_capabilities_per_operation() {
        assert_eq!(Operation::Read.capability(), Capability::Read);
        assert_eq!(Operation::Write.capability(), Capability::Write);
        assert_eq!(Operation::List.capability(), Capability::List);
        assert_eq!(Operation::Delete.capability(), Capability::Delete);
        assert_eq!(Operation::Execute.capability(), Capability::Execute);
    }

    #[test]
    fn test_unrestricted_without_scope() {
        let guard = interceptor();
        assert!(guard.check(Operation::Delete, "/etc/passwd").is_ok());
        assert!(guard.check(Operation::Execute, ".").is_ok());
    }

    #[test]
    fn test_read_only_listing_scenario() {
        let guard = interceptor();
        SecurityScope::sync_scope(Some(scenario_policy()), || {
            assert!(guard.check(Operation::Read, "notes.txt").is_ok());
            assert!(guard.check(Operation::List, ".").is_ok());

            let err = guard.check(Operation::Read, "secrets/key.pem").unwrap_err();
            assert_eq!(err.capability, Capability::Read);
            assert_eq!(err.path, "secrets/key.pem");

            for path in ["notes.txt", "secrets/key.pem", "."] {
                assert!(guard.check(Operation::Delete, path).is_err());
            }
            assert!(guard.check(Operation::Write, "notes.txt").is_err());
            assert!(guard.check(Operation::Execute, ".").is_err());
        });
    }

    #[test]
    fn test_flag_check_is_case_insensitive() {
        let guard = interceptor();
        let policy = Policy::new(FlagSet::parse("RWX"));
        assert!(guard.check_with(&policy, Operation::Execute, ".").is_ok());
        assert!(guard.check_with(&policy, Operation::Write, "a").is_ok());
        assert!(guard.check_with(&policy, Operation::List, ".").is_err());
    }

    #[test]
    fn test_violation_names_capability_and_path() {
        let guard = interceptor();
        let err = guard
            .check_with(&Policy::deny_all(), Operation::Write, "out/report.txt")
            .unwrap_err();
        assert_eq!(err.to_string(), "Access Denied: 'w' required for out/report.txt");
    }

    #[test]
    fn test_escaping_root_is_denied() {
        let guard = interceptor();
        let policy = Policy::allow_all();
        assert!(guard.check_with(&policy, Operation::Read, "../../etc/shadow").is_err());
        assert!(guard.check_with(&policy, Operation::Read, "src/../README").is_ok());
    }
}
