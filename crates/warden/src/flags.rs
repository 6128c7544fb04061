//! Capability flags and flag sets.
//!
//! A [`FlagSet`] is the unit of permission in a policy. It serializes as a
//! short string drawn from the alphabet `r w x l d`:
//!
//! | Letter | Capability | Gates |
//! |--------|------------|-------|
//! | `r` | [`Capability::Read`] | opening a file for reading |
//! | `w` | [`Capability::Write`] | opening a file for writing, appending or creating |
//! | `x` | [`Capability::Execute`] | spawning a process or shell command |
//! | `l` | [`Capability::List`] | enumerating directory entries |
//! | `d` | [`Capability::Delete`] | removing files and directories |
//!
//! Parsing is case-insensitive and order-insensitive. The empty set grants
//! nothing.
//!
//! ```
//! use warden::{Capability, FlagSet};
//!
//! let flags = FlagSet::parse("LR");
//! assert!(flags.allows(Capability::Read));
//! assert!(flags.allows(Capability::List));
//! assert!(!flags.allows(Capability::Write));
//! assert_eq!(flags.to_string(), "rl");
//! ```

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single grantable ability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read file contents.
    Read,
    /// Write, append to or create files.
    Write,
    /// Spawn a subprocess or shell command.
    Execute,
    /// Enumerate directory contents.
    List,
    /// Remove files or directories.
    Delete,
}

impl Capability {
    /// Every capability, in canonical serialization order.
    pub const ALL: [Capability; 5] = [
        Capability::Read,
        Capability::Write,
        Capability::Execute,
        Capability::List,
        Capability::Delete,
    ];

    /// The single-letter form used in flag strings.
    pub fn letter(self) -> char {
        match self {
            Capability::Read => 'r',
            Capability::Write => 'w',
            Capability::Execute => 'x',
            Capability::List => 'l',
            Capability::Delete => 'd',
        }
    }

    /// Parse a single letter (case-insensitive).
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'r' => Some(Capability::Read),
            'w' => Some(Capability::Write),
            'x' => Some(Capability::Execute),
            'l' => Some(Capability::List),
            'd' => Some(Capability::Delete),
            _ => None,
        }
    }

    /// The flag set containing only this capability.
    pub fn flag(self) -> FlagSet {
        match self {
            Capability::Read => FlagSet::READ,
            Capability::Write => FlagSet::WRITE,
            Capability::Execute => FlagSet::EXECUTE,
            Capability::List => FlagSet::LIST,
            Capability::Delete => FlagSet::DELETE,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

bitflags! {
    /// A subset of the capability alphabet.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct FlagSet: u8 {
        /// `r`
        const READ    = 0b0_0001;
        /// `w`
        const WRITE   = 0b0_0010;
        /// `x`
        const EXECUTE = 0b0_0100;
        /// `l`
        const LIST    = 0b0_1000;
        /// `d`
        const DELETE  = 0b1_0000;
    }
}

impl FlagSet {
    /// No capabilities.
    pub const NONE: Self = Self::empty();

    /// Every capability (`rwxld`).
    pub const ALL: Self = Self::all();

    /// Parse a flag string, dropping characters outside the alphabet.
    ///
    /// Unknown characters never widen access; they are logged and ignored.
    /// Use [`FromStr`] to reject them instead.
    pub fn parse(flags: &str) -> Self {
        let mut set = Self::empty();
        for c in flags.chars() {
            match Capability::from_letter(c) {
                Some(cap) => set |= cap.flag(),
                None if c.is_whitespace() => {}
                None => {
                    tracing::warn!(flags = %flags, ignored = %c, "ignoring unknown capability flag");
                }
            }
        }
        set
    }

    /// Returns true if the set grants `capability`.
    pub fn allows(self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// The capabilities present in this set, in canonical order.
    pub fn capabilities(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.allows(*cap))
    }

    /// Returns true if every capability in `self` is also in `other`.
    pub fn is_subset_of(self, other: Self) -> bool {
        other.contains(self)
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cap in self.capabilities() {
            write!(f, "{}", cap.letter())?;
        }
        Ok(())
    }
}

/// Error returned by strict flag parsing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability flag {flag:?} in {input:?}")]
pub struct UnknownFlag {
    /// The offending character.
    pub flag: char,
    /// The full input string.
    pub input: String,
}

impl FromStr for FlagSet {
    type Err = UnknownFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::empty();
        for c in s.chars() {
            let cap = Capability::from_letter(c).ok_or_else(|| UnknownFlag {
                flag: c,
                input: s.to_string(),
            })?;
            set |= cap.flag();
        }
        Ok(set)
    }
}

impl Serialize for FlagSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FlagSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flags = String::deserialize(deserializer)?;
        Ok(FlagSet::parse(&flags))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_and_order_insensitive() {
        assert_eq!(FlagSet::parse("rwl"), FlagSet::parse("LWR"));
        assert_eq!(
            FlagSet::parse("Rw"),
            FlagSet::READ | FlagSet::WRITE
        );
    }

    #[test]
    fn test_empty_string_is_no_capability() {
        let flags = FlagSet::parse("");
        assert!(flags.is_empty());
        for cap in Capability::ALL {
            assert!(!flags.allows(cap));
        }
    }

    #[test]
    fn test_unknown_letters_grant_nothing() {
        let flags = FlagSet::parse("rz?");
        assert_eq!(flags, FlagSet::READ);
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        let err = "rq".parse::<FlagSet>().unwrap_err();
        assert_eq!(err.flag, 'q');
        assert_eq!("DLX".parse::<FlagSet>().unwrap(), FlagSet::parse("xld"));
    }

    #[test]
    fn test_display_is_canonical_order() {
        assert_eq!(FlagSet::parse("dlxwr").to_string(), "rwxld");
        assert_eq!(FlagSet::ALL.to_string(), "rwxld");
        assert_eq!(FlagSet::NONE.to_string(), "");
    }

    #[test]
    fn test_letters_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_letter(cap.letter()), Some(cap));
            assert_eq!(
                Capability::from_letter(cap.letter().to_ascii_uppercase()),
                Some(cap)
            );
        }
        assert_eq!(Capability::from_letter('q'), None);
    }

    #[test]
    fn test_intersection_and_subset() {
        let a = FlagSet::parse("rwl");
        let b = FlagSet::parse("rxl");
        let both = a & b;
        assert_eq!(both.to_string(), "rl");
        assert!(both.is_subset_of(a));
        assert!(both.is_subset_of(b));
        assert!(!a.is_subset_of(b));
    }

    #[test]
    fn test_serde_uses_flag_strings() {
        let json = serde_json::to_string(&FlagSet::parse("lr")).unwrap();
        assert_eq!(json, "\"rl\"");

        let parsed: FlagSet = serde_json::from_str("\"WD\"").unwrap();
        assert_eq!(parsed, FlagSet::WRITE | FlagSet::DELETE);
    }
}
