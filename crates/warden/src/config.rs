//! Policy configuration: the wire format, presets and modes, and assembly of
//! the effective policy for one unit of work.
//!
//! A host application typically keeps two JSON documents:
//!
//! ```json
//! // presets.json
//! {
//!   "default_preset_id": "default",
//!   "presets": {
//!     "default": {
//!       "fs_permissions": { "global": "rl", "paths": { "workspace/": "rwld" } },
//!       "modes": ["review"],
//!       "blocked": ["browser_use"]
//!     }
//!   }
//! }
//!
//! // modes (final_prompts.json)
//! {
//!   "active_parameters": ["review"],
//!   "prompts": {
//!     "review": { "name": "Review", "fs_permissions": { "global": "rl" } }
//!   }
//! }
//! ```
//!
//! The effective policy is the composition of the preset's permissions and
//! those of every mode that the preset lists *and* that is globally active.
//! A session's own files are then granted full access on top.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::compose::compose;
use crate::error::ConfigError;
use crate::flags::FlagSet;
use crate::path::Canonicalizer;
use crate::policy::Policy;

/// The policy wire format: `{"global": "<flags>", "paths": {"<path>": "<flags>"}}`.
///
/// Missing fields mean "nothing granted".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Flags for paths with no entry on their ancestor chain.
    #[serde(default)]
    pub global: FlagSet,
    /// Raw path keys (optionally suffixed with `/`) and their flags.
    #[serde(default)]
    pub paths: BTreeMap<String, FlagSet>,
}

impl PolicyConfig {
    /// Build a policy, normalizing keys against `canon`'s root.
    ///
    /// Absolute keys inside the root become root-relative.
    pub fn into_policy(self, canon: &Canonicalizer) -> Policy {
        Policy::from_entries(self.global, self.paths, |key| canon.normalize_key(key))
    }
}

/// Deserialize a field that distinguishes "absent" from `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Deserialize a mode's permissions, treating `null` and `{}` alike as
/// "no restriction".
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<PolicyConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => PolicyConfig::deserialize(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// One entry of `presets.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The preset's base policy.
    ///
    /// Absent: the preset contributes nothing. Present but `null`: an
    /// unusable source, which denies everything.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub fs_permissions: Option<Option<PolicyConfig>>,
    /// Modes this preset may activate.
    #[serde(default)]
    pub modes: Vec<String>,
    /// Tools the preset refuses to run.
    #[serde(default)]
    pub blocked: Vec<String>,
}

impl Preset {
    /// Returns true if the preset blocks the tool `name`.
    pub fn is_tool_blocked(&self, name: &str) -> bool {
        self.blocked.iter().any(|blocked| blocked == name)
    }
}

fn default_preset_id() -> String {
    "default".to_string()
}

/// The `presets.json` document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetsFile {
    /// Preset used when the caller does not name one.
    #[serde(default = "default_preset_id")]
    pub default_preset_id: String,
    /// Presets by id.
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

impl Default for PresetsFile {
    fn default() -> Self {
        Self {
            default_preset_id: default_preset_id(),
            presets: BTreeMap::new(),
        }
    }
}

impl PresetsFile {
    /// Look up a preset, falling back to the default preset id.
    pub fn preset(&self, id: Option<&str>) -> Result<&Preset, ConfigError> {
        let id = id.unwrap_or(&self.default_preset_id);
        self.presets
            .get(id)
            .ok_or_else(|| ConfigError::UnknownPreset(id.to_string()))
    }
}

/// A mode definition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra restrictions while the mode is active. `None` contributes nothing.
    ///
    /// An empty object (`{}`) reads as `None`; `{"global": ""}` still denies
    /// everything.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub fs_permissions: Option<PolicyConfig>,
}

/// The modes document: which modes are switched on and what they restrict.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModesFile {
    /// Globally active mode ids.
    #[serde(default)]
    pub active_parameters: Vec<String>,
    /// Mode definitions by id.
    #[serde(default)]
    pub prompts: BTreeMap<String, Mode>,
}

impl ModesFile {
    /// Modes that `preset` lists and that are globally active, in preset order.
    pub fn active_for<'a>(&'a self, preset: &'a Preset) -> impl Iterator<Item = (&'a str, &'a Mode)> {
        preset
            .modes
            .iter()
            .filter(|id| self.active_parameters.contains(id))
            .filter_map(|id| self.prompts.get(id).map(|mode| (id.as_str(), mode)))
    }
}

/// Read and parse a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Keys granted to a session for its own persisted state.
pub fn session_grants(session_id: &str) -> Result<[String; 3], ConfigError> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\']);
    if !valid {
        return Err(ConfigError::InvalidSessionId(session_id.to_string()));
    }
    Ok([
        format!("chats/{session_id}.pkl"),
        format!("chats/{session_id}.json"),
        format!("chats/{session_id}/"),
    ])
}

/// Assembles the policy for one unit of work from independent sources.
///
/// ```
/// use warden::config::EffectivePolicy;
/// use warden::{FlagSet, Policy};
///
/// let policy = EffectivePolicy::new()
///     .base(Some(Policy::allow_all()))
///     .mode(Some(Policy::new(FlagSet::parse("r"))))
///     .grant("chats/42.json", FlagSet::ALL)
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.default_flags(), FlagSet::parse("r"));
/// assert_eq!(policy.entry("chats/42.json"), Some(FlagSet::ALL));
/// ```
#[derive(Clone, Debug, Default)]
pub struct EffectivePolicy {
    sources: Vec<Option<Policy>>,
    grants: Vec<(String, FlagSet)>,
}

impl EffectivePolicy {
    /// An empty set of sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the base policy. `None` is an unusable source and denies
    /// everything.
    pub fn base(mut self, policy: Option<Policy>) -> Self {
        self.sources.push(policy);
        self
    }

    /// Add an active mode's restrictions. As with [`EffectivePolicy::base`],
    /// `None` denies everything.
    pub fn mode(mut self, policy: Option<Policy>) -> Self {
        self.sources.push(policy);
        self
    }

    /// Grant `flags` at `key` after composition, overriding the composed
    /// entry.
    pub fn grant(mut self, key: impl Into<String>, flags: FlagSet) -> Self {
        self.grants.push((key.into(), flags));
        self
    }

    /// Grant full access to a session's own files.
    pub fn session(mut self, session_id: &str) -> Result<Self, ConfigError> {
        for key in session_grants(session_id)? {
            self = self.grant(key, FlagSet::ALL);
        }
        Ok(self)
    }

    /// Number of restricting sources added so far.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Collect the sources for `preset_id` (or the default preset).
    pub fn for_preset(
        presets: &PresetsFile,
        preset_id: Option<&str>,
        modes: &ModesFile,
        canon: &Canonicalizer,
    ) -> Result<Self, ConfigError> {
        let preset = presets.preset(preset_id)?;
        let mut builder = Self::new();

        if let Some(permissions) = &preset.fs_permissions {
            builder = builder.base(
                permissions
                    .clone()
                    .map(|config| config.into_policy(canon)),
            );
        }

        for (id, mode) in modes.active_for(preset) {
            if let Some(permissions) = &mode.fs_permissions {
                tracing::debug!(mode = %id, "mode restricts filesystem access");
                builder = builder.mode(Some(permissions.clone().into_policy(canon)));
            }
        }

        Ok(builder)
    }

    /// Compose the sources and apply the grants.
    ///
    /// With no restricting source at all the result is `None`: nothing
    /// restricts the unit of work, so it runs unrestricted.
    pub fn build(self) -> Option<Policy> {
        if self.sources.is_empty() {
            tracing::debug!(
                grants = self.grants.len(),
                "no restricting policy sources, running unrestricted"
            );
            return None;
        }

        let mut policy = compose(self.sources.iter().map(Option::as_ref));
        for (key, flags) in &self.grants {
            policy.set_path(key, *flags);
        }
        Some(policy)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const PRESETS: &str = r#"{
        "default_preset_id": "coder",
        "presets": {
            "coder": {
                "name": "Coder",
                "fs_permissions": {"global": "rwxl", "paths": {"secrets/": "", "/srv/project/build": "rwxld"}},
                "modes": ["review", "offline"],
                "blocked": ["browser_use"],
                "prompt_ids": ["base"]
            },
            "open": {"modes": []},
            "broken": {"fs_permissions": null}
        }
    }"#;

    const MODES: &str = r#"{
        "active_parameters": ["review", "unrelated"],
        "prompts": {
            "review": {"name": "Review", "text": "...", "fs_permissions": {"global": "rl"}},
            "offline": {"fs_permissions": {"global": ""}}
        }
    }"#;

    fn canon() -> Canonicalizer {
        Canonicalizer::new("/srv/project").unwrap()
    }

    fn presets() -> PresetsFile {
        serde_json::from_str(PRESETS).unwrap()
    }

    fn modes() -> ModesFile {
        serde_json::from_str(MODES).unwrap()
    }

    #[test]
    fn test_into_policy_rebases_absolute_keys() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"global": "r", "paths": {"/srv/project/logs/": "rw", "/tmp": "r"}}"#)
                .unwrap();
        let policy = config.into_policy(&canon());
        assert_eq!(policy.entry("logs"), Some(FlagSet::parse("rw")));
        assert_eq!(policy.entry("/tmp"), Some(FlagSet::parse("r")));
    }

    #[test]
    fn test_preset_lookup() {
        let presets = presets();
        assert_eq!(presets.preset(None).unwrap().name.as_deref(), Some("Coder"));
        assert!(presets.preset(Some("open")).is_ok());
        assert!(matches!(
            presets.preset(Some("missing")),
            Err(ConfigError::UnknownPreset(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_blocked_tools() {
        let presets = presets();
        let preset = presets.preset(None).unwrap();
        assert!(preset.is_tool_blocked("browser_use"));
        assert!(!preset.is_tool_blocked("python"));
    }

    #[test]
    fn test_only_listed_and_active_modes_apply() {
        let presets = presets();
        let modes = modes();
        let active: Vec<&str> = modes
            .active_for(presets.preset(None).unwrap())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(active, vec!["review"]);
    }

    #[test]
    fn test_preset_and_mode_are_intersected() {
        let c = canon();
        let policy = EffectivePolicy::for_preset(&presets(), None, &modes(), &c)
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(policy.default_flags(), FlagSet::parse("rl"));
        assert_eq!(policy.resolve_path(&c, "src/main.rs"), FlagSet::parse("rl"));
        assert_eq!(policy.resolve_path(&c, "secrets/token"), FlagSet::NONE);
        assert_eq!(policy.resolve_path(&c, "build/out.o"), FlagSet::parse("rl"));
    }

    #[test]
    fn test_preset_without_permissions_is_unrestricted() {
        let c = canon();
        let builder = EffectivePolicy::for_preset(&presets(), Some("open"), &modes(), &c).unwrap();
        assert_eq!(builder.source_count(), 0);
        assert!(builder.build().is_none());
    }

    #[test]
    fn test_empty_mode_permissions_contribute_nothing() {
        let c = canon();
        let modes: ModesFile = serde_json::from_str(
            r#"{
                "active_parameters": ["review", "offline"],
                "prompts": {
                    "review": {"fs_permissions": {}},
                    "offline": {"fs_permissions": null}
                }
            }"#,
        )
        .unwrap();
        assert!(modes.prompts.values().all(|mode| mode.fs_permissions.is_none()));

        let builder = EffectivePolicy::for_preset(&presets(), None, &modes, &c).unwrap();
        assert_eq!(builder.source_count(), 1);
        let policy = builder.build().unwrap();
        assert_eq!(policy.resolve_path(&c, "src/main.rs"), FlagSet::parse("rwxl"));
    }

    #[test]
    fn test_explicit_empty_global_still_restricts() {
        let mode: Mode = serde_json::from_str(r#"{"fs_permissions": {"global": ""}}"#).unwrap();
        assert_eq!(mode.fs_permissions, Some(PolicyConfig::default()));
    }

    #[test]
    fn test_null_permissions_deny_everything() {
        let c = canon();
        let policy = EffectivePolicy::for_preset(&presets(), Some("broken"), &modes(), &c)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(policy, Policy::deny_all());
    }

    #[test]
    fn test_session_grants_override_composition() {
        let c = canon();
        let policy = EffectivePolicy::new()
            .base(Some(Policy::new(FlagSet::parse("r")).with_path("chats", FlagSet::NONE)))
            .session("abc123")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(policy.resolve_path(&c, "chats/abc123.json"), FlagSet::ALL);
        assert_eq!(policy.resolve_path(&c, "chats/abc123/image.png"), FlagSet::ALL);
        assert_eq!(policy.resolve_path(&c, "chats/other.json"), FlagSet::NONE);
    }

    #[test]
    fn test_session_id_cannot_escape() {
        for id in ["", ".", "..", "../secrets", "a/b", "a\\b"] {
            assert!(
                matches!(session_grants(id), Err(ConfigError::InvalidSessionId(_))),
                "session id {id:?}"
            );
        }
    }

    #[test]
    fn test_load_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("presets.json");
        std::fs::write(&good, PRESETS).unwrap();
        let loaded: PresetsFile = load_json(&good).unwrap();
        assert_eq!(loaded, presets());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{").unwrap();
        let err = load_json::<PresetsFile>(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));

        let err = load_json::<PresetsFile>(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_preset_serialization_keeps_null_permissions() {
        let preset = Preset {
            fs_permissions: Some(None),
            ..Preset::default()
        };
        let json = serde_json::to_value(&preset).unwrap();
        assert!(json["fs_permissions"].is_null());
        let back: Preset = serde_json::from_value(json).unwrap();
        assert_eq!(back, preset);
    }
}
