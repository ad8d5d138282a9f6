//! Per-action protection schedule for a page.
//!
//! The API reports protection as a list of `{type, level, expiry}` entries.
//! Actions without an entry are unrestricted; the three standard actions
//! (edit, move, create) are always present in the schedule so callers can
//! look them up without caring whether the wiki reported them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const STANDARD_ACTIONS: &[&str] = &["edit", "move", "create"];

/// The restriction on one action: which user right is required and until
/// when. `(None, None)` means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub level: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Restriction {
    pub fn new(level: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            level: Some(level.into()),
            expiry: Some(expiry),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.level.is_none()
    }
}

/// Map from action name to its restriction. Wikis may configure actions
/// beyond the standard three; those show up as extra keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protection {
    entries: BTreeMap<String, Restriction>,
}

impl Default for Protection {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        for action in STANDARD_ACTIONS {
            entries.insert((*action).to_string(), Restriction::default());
        }
        Self { entries }
    }
}

impl Protection {
    pub fn get(&self, action: &str) -> Option<&Restriction> {
        self.entries.get(action)
    }

    pub fn set(&mut self, action: impl Into<String>, restriction: Restriction) {
        self.entries.insert(action.into(), restriction);
    }

    /// Iterate entries in sorted action-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Restriction)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parse an expiry string as the API reports it. `"infinity"` and an absent
/// expiry both mean the restriction never lapses; anything unparseable
/// degrades to the unbounded timestamp instead of failing the whole load.
pub fn parse_expiry(expiry: Option<&str>) -> DateTime<Utc> {
    match expiry {
        None => DateTime::<Utc>::MAX_UTC,
        Some("infinity") => DateTime::<Utc>::MAX_UTC,
        Some(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_has_standard_actions() {
        let protection = Protection::default();
        for action in ["edit", "move", "create"] {
            let restriction = protection.get(action).expect("standard action present");
            assert!(restriction.is_unrestricted());
            assert!(restriction.expiry.is_none());
        }
        assert!(protection.get("upload").is_none());
    }

    #[test]
    fn test_set_overrides_default() {
        let mut protection = Protection::default();
        protection.set(
            "edit",
            Restriction::new("sysop", DateTime::<Utc>::MAX_UTC),
        );
        let edit = protection.get("edit").unwrap();
        assert_eq!(edit.level.as_deref(), Some("sysop"));
        assert_eq!(edit.expiry, Some(DateTime::<Utc>::MAX_UTC));
        assert!(protection.get("move").unwrap().is_unrestricted());
    }

    #[test]
    fn test_parse_expiry_infinity() {
        assert_eq!(parse_expiry(Some("infinity")), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_parse_expiry_absent() {
        assert_eq!(parse_expiry(None), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_parse_expiry_absolute() {
        let parsed = parse_expiry(Some("2030-01-01T00:00:00Z"));
        assert_eq!(parsed, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_expiry_garbage_degrades() {
        assert_eq!(parse_expiry(Some("never")), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_iter_sorted() {
        let protection = Protection::default();
        let actions: Vec<&str> = protection.iter().map(|(a, _)| a).collect();
        assert_eq!(actions, vec!["create", "edit", "move"]);
    }
}
