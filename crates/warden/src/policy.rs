//! Access policies and hierarchical resolution.
//!
//! A [`Policy`] is a default [`FlagSet`] plus a map of path overrides. The
//! effective flags for a path are found by "bubbling up": the path itself is
//! looked up first, then its parent, and so on up to the root. The first
//! entry found wins outright. If nothing on the chain has an entry, the
//! policy default applies.
//!
//! ```
//! use warden::{Canonicalizer, FlagSet, Policy};
//!
//! let canon = Canonicalizer::new("/srv/project").unwrap();
//! let policy = Policy::new(FlagSet::parse("rl"))
//!     .with_path("secrets", FlagSet::NONE)
//!     .with_path("logs/", FlagSet::parse("rw"));
//!
//! assert_eq!(policy.resolve_path(&canon, "notes.txt"), FlagSet::parse("rl"));
//! assert_eq!(policy.resolve_path(&canon, "secrets/key.pem"), FlagSet::NONE);
//! assert_eq!(policy.resolve_path(&canon, "logs/app.log"), FlagSet::parse("rw"));
//! ```
//!
//! Paths outside the root only match explicit absolute entries; without one
//! they resolve to the empty set regardless of the default.
//!
//! The key `/` is the slashed form of the root key `""`, so it also applies
//! to every path inside the root when there is no `""` entry. For paths
//! outside the root it is the filesystem root, the last ancestor on their
//! chain.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;
use crate::flags::{Capability, FlagSet};
use crate::path::{CanonicalPath, Canonicalizer, normalize_key};

/// The slashed spelling of the root key.
pub(crate) const ROOT_SLASH_KEY: &str = "/";

/// A default flag set plus path-specific overrides.
///
/// Keys are stored normalized (see [`normalize_key`]), so `logs` and
/// `logs/` name the same entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PolicyConfig", into = "PolicyConfig")]
pub struct Policy {
    default: FlagSet,
    paths: BTreeMap<String, FlagSet>,
}

impl Policy {
    /// Create a policy with the given default and no path entries.
    pub fn new(default: FlagSet) -> Self {
        Self {
            default,
            paths: BTreeMap::new(),
        }
    }

    /// The most restrictive policy: nothing is granted anywhere.
    pub fn deny_all() -> Self {
        Self::new(FlagSet::NONE)
    }

    /// Every capability under the root.
    pub fn allow_all() -> Self {
        Self::new(FlagSet::ALL)
    }

    /// Build a policy from raw `(key, flags)` entries.
    ///
    /// Each key is passed through `normalize`. When several raw keys collapse
    /// to the same normalized key, the one without a trailing slash wins,
    /// then the lexicographically smallest raw key. The outcome does not
    /// depend on iteration order.
    pub fn from_entries<I, K>(default: FlagSet, entries: I, normalize: impl Fn(&str) -> String) -> Self
    where
        I: IntoIterator<Item = (K, FlagSet)>,
        K: AsRef<str>,
    {
        let mut ranked: BTreeMap<String, ((bool, String), FlagSet)> = BTreeMap::new();
        for (raw, flags) in entries {
            let raw = raw.as_ref();
            let trimmed = raw.trim();
            let slashed = trimmed.len() > 1 && (trimmed.ends_with('/') || trimmed.ends_with('\\'));
            let rank = (slashed, raw.to_string());
            match ranked.entry(normalize(raw)) {
                Entry::Vacant(slot) => {
                    slot.insert((rank, flags));
                }
                Entry::Occupied(mut slot) => {
                    if rank < slot.get().0 {
                        tracing::debug!(
                            key = %slot.key(),
                            winner = %raw,
                            loser = %slot.get().0.1,
                            "policy keys collapse to the same path"
                        );
                        slot.insert((rank, flags));
                    }
                }
            }
        }

        Self {
            default,
            paths: ranked
                .into_iter()
                .map(|(key, (_, flags))| (key, flags))
                .collect(),
        }
    }

    /// Add or replace the entry for `key`, normalized lexically.
    pub fn with_path(mut self, key: &str, flags: FlagSet) -> Self {
        self.set_path(key, flags);
        self
    }

    /// Add or replace the entry for `key`, normalized lexically.
    ///
    /// Unlike [`Policy::from_entries`], this always overwrites: it is an
    /// explicit statement about one path.
    pub fn set_path(&mut self, key: &str, flags: FlagSet) {
        self.paths.insert(normalize_key(key), flags);
    }

    /// The fallback flags for in-root paths with no entry on their chain.
    pub fn default_flags(&self) -> FlagSet {
        self.default
    }

    /// The normalized path entries.
    pub fn paths(&self) -> &BTreeMap<String, FlagSet> {
        &self.paths
    }

    /// The explicit entry for a key, if any (no inheritance).
    pub fn entry(&self, key: &str) -> Option<FlagSet> {
        self.paths.get(&normalize_key(key)).copied()
    }

    /// Effective flags for an already canonicalized path.
    pub fn resolve(&self, path: &CanonicalPath) -> FlagSet {
        for ancestor in path.ancestors() {
            if let Some(flags) = self.paths.get(ancestor) {
                return *flags;
            }
            if ancestor.is_empty()
                && path.is_within_root()
                && let Some(flags) = self.paths.get(ROOT_SLASH_KEY)
            {
                return *flags;
            }
        }
        if path.is_within_root() {
            self.default
        } else {
            FlagSet::NONE
        }
    }

    /// Effective flags for a policy key (see [`CanonicalPath::from_key`]).
    ///
    /// The key is normalized first, so `secrets/` resolves like `secrets`.
    pub fn resolve_key(&self, key: &str) -> FlagSet {
        self.resolve(&CanonicalPath::from_key(normalize_key(key)))
    }

    /// Canonicalize `path` against `canon` and resolve it.
    pub fn resolve_path(&self, canon: &Canonicalizer, path: impl AsRef<Path>) -> FlagSet {
        self.resolve(&canon.canonicalize(path))
    }

    /// Returns true if `capability` is granted at `path`.
    pub fn allows(&self, canon: &Canonicalizer, capability: Capability, path: impl AsRef<Path>) -> bool {
        self.resolve_path(canon, path).allows(capability)
    }

    /// The conservative intersection of two policies.
    ///
    /// Shorthand for [`compose`](crate::compose) over `[self, other]`.
    pub fn intersect(&self, other: &Policy) -> Policy {
        crate::compose::compose([Some(self), Some(other)])
    }
}

impl From<PolicyConfig> for Policy {
    fn from(config: PolicyConfig) -> Self {
        Policy::from_entries(config.global, config.paths, normalize_key)
    }
}

impl From<Policy> for PolicyConfig {
    fn from(policy: Policy) -> Self {
        PolicyConfig {
            global: policy.default,
            paths: policy.paths,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn canon() -> Canonicalizer {
        Canonicalizer::new("/srv/project").unwrap()
    }

    fn flags(s: &str) -> FlagSet {
        FlagSet::parse(s)
    }

    #[test]
    fn test_more_specific_wins() {
        let c = canon();
        let policy = Policy::new(FlagSet::NONE)
            .with_path("a", flags("r"))
            .with_path("a/b", flags("rw"));

        assert_eq!(policy.resolve_path(&c, "a/b/c.txt"), flags("rw"));
        assert_eq!(policy.resolve_path(&c, "a/x.txt"), flags("r"));
        assert_eq!(policy.resolve_path(&c, "a/b"), flags("rw"));
        assert_eq!(policy.resolve_path(&c, "z.txt"), FlagSet::NONE);
    }

    #[test]
    fn test_narrower_hole_can_be_more_permissive() {
        let c = canon();
        let policy = Policy::new(flags("r")).with_path("scratch", FlagSet::ALL);

        assert_eq!(policy.resolve_path(&c, "scratch/tmp/out.bin"), FlagSet::ALL);
        assert_eq!(policy.resolve_path(&c, "src/lib.rs"), flags("r"));
    }

    #[test]
    fn test_first_match_ignores_default() {
        let c = canon();
        let policy = Policy::new(FlagSet::ALL).with_path("secrets", FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, "secrets/key.pem"), FlagSet::NONE);
    }

    #[test]
    fn test_root_entry_acts_as_default() {
        let c = canon();
        let policy = Policy::new(FlagSet::ALL).with_path("./", flags("l"));
        assert_eq!(policy.resolve_path(&c, "any/file"), flags("l"));
        assert_eq!(policy.resolve_path(&c, "."), flags("l"));
    }

    #[test]
    fn test_slash_key_covers_the_root() {
        let c = canon();
        let policy: Policy =
            serde_json::from_str(r#"{"global": "rwxld", "paths": {"/": ""}}"#).unwrap();
        assert_eq!(policy.resolve_path(&c, "notes.txt"), FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, ""), FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, "/etc/passwd"), FlagSet::NONE);

        let configured = PolicyConfig {
            global: FlagSet::ALL,
            paths: [("/".to_string(), FlagSet::NONE)].into(),
        }
        .into_policy(&c);
        assert_eq!(configured.resolve_path(&c, "src/main.rs"), FlagSet::NONE);
    }

    #[test]
    fn test_slash_key_is_also_the_filesystem_root() {
        let c = canon();
        let policy = Policy::new(FlagSet::NONE).with_path("/", flags("r"));
        assert_eq!(policy.resolve_path(&c, "/etc/hosts"), flags("r"));
        assert_eq!(policy.resolve_path(&c, "notes.txt"), flags("r"));
    }

    #[test]
    fn test_more_specific_entries_beat_slash_key() {
        let c = canon();
        let policy = Policy::new(FlagSet::ALL)
            .with_path("/", FlagSet::NONE)
            .with_path("docs", flags("r"));
        assert_eq!(policy.resolve_path(&c, "docs/guide.md"), flags("r"));
        assert_eq!(policy.resolve_path(&c, "src/lib.rs"), FlagSet::NONE);
    }

    #[test]
    fn test_empty_root_key_wins_over_slash_key() {
        let c = canon();
        let policy = Policy::new(FlagSet::NONE)
            .with_path("", flags("rl"))
            .with_path("/", flags("rwxld"));
        assert_eq!(policy.resolve_path(&c, "notes.txt"), flags("rl"));
        assert_eq!(policy.resolve_path(&c, "/etc/hosts"), flags("rwxld"));
    }

    #[test]
    fn test_resolve_key_accepts_trailing_slash() {
        let policy = Policy::new(FlagSet::ALL).with_path("secrets", FlagSet::NONE);
        assert_eq!(policy.resolve_key("secrets/"), FlagSet::NONE);
        assert_eq!(policy.resolve_key("secrets/key.pem"), FlagSet::NONE);
        assert_eq!(policy.resolve_key("src/"), FlagSet::ALL);
    }

    #[test]
    fn test_trailing_slash_is_a_synonym() {
        let c = canon();
        let policy = Policy::new(FlagSet::NONE).with_path("logs/", flags("rw"));
        assert_eq!(policy.entry("logs"), Some(flags("rw")));
        assert_eq!(policy.resolve_path(&c, "logs"), flags("rw"));
        assert_eq!(policy.resolve_path(&c, "logs/app.log"), flags("rw"));
    }

    #[test]
    fn test_non_slashed_key_wins_tie_break() {
        let forward = Policy::from_entries(
            FlagSet::NONE,
            [("logs", flags("r")), ("logs/", flags("rwd"))],
            normalize_key,
        );
        let backward = Policy::from_entries(
            FlagSet::NONE,
            [("logs/", flags("rwd")), ("logs", flags("r"))],
            normalize_key,
        );
        assert_eq!(forward.entry("logs"), Some(flags("r")));
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_outside_root_denied_without_absolute_rule() {
        let c = canon();
        let policy = Policy::allow_all();
        assert_eq!(policy.resolve_path(&c, "/etc/passwd"), FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, "../sibling/file"), FlagSet::NONE);
    }

    #[test]
    fn test_absolute_rule_matches_outside_root() {
        let c = canon();
        let policy = Policy::new(flags("r")).with_path("/tmp/", flags("rwd"));
        assert_eq!(policy.resolve_path(&c, "/tmp/cache/x"), flags("rwd"));
        assert_eq!(policy.resolve_path(&c, "/var/tmp/x"), FlagSet::NONE);
    }

    #[test]
    fn test_root_relative_entries_never_match_outside() {
        let c = canon();
        let policy = Policy::new(FlagSet::NONE).with_path("etc", FlagSet::ALL);
        assert_eq!(policy.resolve_path(&c, "/etc/passwd"), FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, "etc/passwd"), FlagSet::ALL);
    }

    #[test]
    fn test_wire_format_round_trip() {
        let json = r#"{"global": "RL", "paths": {"logs/": "rw", "secrets": ""}}"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.default_flags(), flags("rl"));
        assert_eq!(policy.entry("logs"), Some(flags("rw")));
        assert_eq!(policy.entry("secrets"), Some(FlagSet::NONE));

        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["global"], "rl");
        assert_eq!(value["paths"]["logs"], "rw");
    }

    #[test]
    fn test_wire_format_missing_fields_deny() {
        let policy: Policy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, Policy::deny_all());
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("([a-c]{1,2}/){0,3}[a-c]{1,2}").unwrap()
    }

    fn flags_strategy() -> impl Strategy<Value = FlagSet> {
        (0u8..32).prop_map(FlagSet::from_bits_truncate)
    }

    proptest! {
        /// With no entry on the chain, the default is returned.
        #[test]
        fn prop_no_entry_resolves_to_default(
            default in flags_strategy(),
            path in key_strategy(),
            other in flags_strategy(),
        ) {
            let c = canon();
            let policy = Policy::new(default).with_path("zz/unrelated", other);
            prop_assert_eq!(policy.resolve_path(&c, &path), default);
        }

        /// Resolving the canonical form gives the same answer as the raw path.
        #[test]
        fn prop_resolution_invariant_under_canonicalization(
            path in prop::string::string_regex("(\\./|\\.\\./|[a-c]{1,2}/){0,5}[a-c]{0,2}").unwrap(),
            entries in prop::collection::vec((key_strategy(), flags_strategy()), 0..6),
            default in flags_strategy(),
        ) {
            let c = canon();
            let mut policy = Policy::new(default);
            for (key, f) in &entries {
                policy.set_path(key, *f);
            }
            let canonical = c.canonicalize(&path);
            prop_assert_eq!(
                policy.resolve_path(&c, &path),
                policy.resolve_path(&c, canonical.as_str())
            );
        }
    }
}
