//! Entity ID generation and resolution
//!
//! Every id uses the format `{6-char-hex}-{type}-{slug}`, e.g.
//! `019430-task-add-oauth-handler`. The hex prefix is the leading byte of a
//! UUIDv7 (so ids sort roughly by creation time); the type token is one of
//! `out`, `task`, `wrk`, `esc`, `alert`, `job`; the slug is derived from a
//! human title so ids stay recognizable in logs without a lookup.

use std::collections::HashMap;

/// Generate an entity id from a type token and a human title.
pub fn generate_id(entity_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{hex_prefix}-{entity_type}")
    } else {
        format!("{hex_prefix}-{entity_type}-{slug}")
    }
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Type-safe wrapper for entity ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(entity_type: &str, title: &str) -> Self {
        Self(generate_id(entity_type, title))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn hex_prefix(&self) -> &str {
        &self.0[..6.min(self.0.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.0.splitn(3, '-').nth(1)
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DomainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DomainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for DomainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DomainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Resolves a partial reference (hex prefix or slug fragment) to a full id.
pub struct IdResolver<'a> {
    ids: &'a HashMap<String, String>,
}

impl<'a> IdResolver<'a> {
    pub fn new(ids: &'a HashMap<String, String>) -> Self {
        Self { ids }
    }

    /// Returns `Ok(Some(id))` for exactly one match, `Ok(None)` for zero,
    /// `Err(candidates)` if the reference is ambiguous.
    pub fn resolve(&self, reference: &str) -> Result<Option<String>, Vec<String>> {
        let matches: Vec<String> = self.ids.keys().filter(|id| Self::matches(id, reference)).cloned().collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.into_iter().next().unwrap())),
            _ => Err(matches),
        }
    }

    fn matches(id: &str, reference: &str) -> bool {
        if id == reference {
            return true;
        }
        if id.starts_with(reference) {
            return true;
        }
        if let Some(slug_start) = id.find('-') {
            if id[slug_start + 1..].contains(reference) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_contains_type_and_slug() {
        let id = generate_id("task", "Add OAuth Authentication");
        assert!(id.contains("-task-"));
        assert!(id.ends_with("add-oauth-authentication"));
    }

    #[test]
    fn slugify_strips_apostrophes_and_collapses_separators() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("don't stop"), "dont-stop");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
    }

    #[test]
    fn domain_id_parts() {
        let id = DomainId::from_string("019430-task-add-oauth".to_string());
        assert_eq!(id.hex_prefix(), "019430");
        assert_eq!(id.entity_type(), Some("task"));
    }

    #[test]
    fn id_resolver_hex_prefix_and_ambiguity() {
        let mut ids = HashMap::new();
        ids.insert("019430-task-add-oauth".to_string(), "Add OAuth".to_string());
        ids.insert("019431-task-oauth-db".to_string(), "OAuth DB".to_string());
        let resolver = IdResolver::new(&ids);

        assert_eq!(resolver.resolve("019430").unwrap(), Some("019430-task-add-oauth".to_string()));
        assert!(resolver.resolve("oauth").is_err());
        assert_eq!(resolver.resolve("nonexistent").unwrap(), None);
    }
}
