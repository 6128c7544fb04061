//! Conservative composition of policies.
//!
//! When several independent sources restrict the same unit of work (a base
//! preset, active modes, a per-session override) they are combined into one
//! policy that grants only what every source grants:
//!
//! 1. the default is the intersection of every input default;
//! 2. every path key mentioned by any input becomes a key of the result;
//! 3. the flags for that key are the intersection of each input's *fully
//!    resolved* flags at that key, so inherited grants are honoured.
//!
//! The `/` key covers both the project root and the filesystem root. When
//! any input carries it, the result gets an explicit `""` entry for the
//! project root, and `/` itself is resolved as the filesystem root.
//!
//! An absent input (`None`) counts as the all-deny policy, so it collapses
//! the result to total denial.

use std::collections::BTreeSet;

use crate::flags::FlagSet;
use crate::policy::{Policy, ROOT_SLASH_KEY};

/// Intersect a list of policies into one.
///
/// For every input `p` and every path `x`,
/// `compose(inputs).resolve(x)` is a subset of `p.resolve(x)`. Input order
/// does not affect the result. An empty list yields [`Policy::deny_all`].
///
/// ```
/// use warden::{FlagSet, Policy, compose};
///
/// let full = Policy::allow_all();
/// let narrow = Policy::new(FlagSet::parse("r")).with_path("logs/", FlagSet::parse("rw"));
///
/// let effective = compose([Some(&full), Some(&narrow)]);
/// assert_eq!(effective.default_flags(), FlagSet::parse("r"));
/// assert_eq!(effective.entry("logs"), Some(FlagSet::parse("rw")));
///
/// let denied = compose([Some(&full), None]);
/// assert_eq!(denied.default_flags(), FlagSet::NONE);
/// ```
pub fn compose<'a, I>(policies: I) -> Policy
where
    I: IntoIterator<Item = Option<&'a Policy>>,
{
    let deny = Policy::deny_all();
    let inputs: Vec<&Policy> = policies
        .into_iter()
        .map(|policy| policy.unwrap_or(&deny))
        .collect();

    if inputs.is_empty() {
        tracing::debug!("composing an empty policy list, denying everything");
        return Policy::deny_all();
    }

    let default = inputs
        .iter()
        .fold(FlagSet::ALL, |acc, policy| acc & policy.default_flags());

    let mut keys: BTreeSet<&str> = inputs
        .iter()
        .flat_map(|policy| policy.paths().keys().map(String::as_str))
        .collect();
    if keys.contains(ROOT_SLASH_KEY) {
        keys.insert("");
    }

    let entries: Vec<(&str, FlagSet)> = keys
        .into_iter()
        .map(|key| {
            let flags = inputs
                .iter()
                .fold(FlagSet::ALL, |acc, policy| acc & policy.resolve_key(key));
            (key, flags)
        })
        .collect();

    tracing::debug!(
        inputs = inputs.len(),
        default = %default,
        paths = entries.len(),
        "composed policy"
    );

    Policy::from_entries(default, entries, str::to_string)
}
