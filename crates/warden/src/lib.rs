//! Warden: path-scoped capability guard for untrusted code execution
//!
//! Warden decides, for every filesystem or process operation attempted by
//! untrusted code, whether the operation is allowed under the policy of the
//! unit of work currently running. Policies grant capability flags
//! (`r w x l d`) to a default and to path overrides resolved hierarchically;
//! several sources can be composed conservatively; the active policy is
//! bound to the current task or thread through a [`SecurityScope`]; and the
//! [`fs`] facade routes I/O through an [`Interceptor`] that refuses denied
//! operations before they take effect.
//!
//! ```
//! use std::sync::Arc;
//! use warden::{Canonicalizer, FlagSet, Interceptor, Operation, Policy, SecurityScope, compose};
//!
//! let canon = Canonicalizer::new("/srv/project").unwrap();
//! let base = Policy::new(FlagSet::parse("rwl")).with_path("secrets", FlagSet::NONE);
//! let mode = Policy::new(FlagSet::parse("rl"));
//! let policy = Arc::new(compose([Some(&base), Some(&mode)]));
//!
//! let interceptor = Interceptor::new(canon);
//! SecurityScope::sync_scope(Some(policy), || {
//!     assert!(interceptor.check(Operation::Read, "README.md").is_ok());
//!     let denied = interceptor.check(Operation::Write, "README.md").unwrap_err();
//!     assert_eq!(denied.to_string(), "Access Denied: 'w' required for README.md");
//! });
//! ```

mod compose;
mod error;
mod flags;
mod interceptor;
mod path;
mod policy;
mod scope;

pub mod config;
pub mod fs;

pub use compose::compose;
pub use error::{ConfigError, GuardError, GuardResult, PolicyViolation};
pub use flags::{Capability, FlagSet, UnknownFlag};
pub use interceptor::{Interceptor, OpenMode, Operation};
pub use path::{CanonicalPath, Canonicalizer, normalize_key};
pub use policy::Policy;
pub use scope::{ScopeToken, SecurityScope};
