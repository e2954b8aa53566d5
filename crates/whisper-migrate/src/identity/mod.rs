//! Resolution of legacy series paths into destination series identities.
//!
//! # Resolution
//!
//! ```text
//! carbon/host1/load.wsp
//!   → normalize  → carbon.host1.load
//!   → match "carbon.#HOST.load" (prefix "carbon.")
//!   → remainder  → [host1, load]
//!   → identity   → { measurement: load, tags: {host: host1}, field: value }
//! ```
//!
//! Patterns are tried in configuration order and the first whose literal
//! prefix occurs in the normalized path wins. Placeholder `i` binds remainder
//! segment `i - 1`; the last remainder segment is the measurement, or the
//! pattern's own measurement when the prefix consumed the whole path.

pub mod key;
pub mod pattern;

pub use key::{encode, FIELD_SEPARATOR};
pub use pattern::{TagPattern, TagTemplate, PLACEHOLDER_MARKER, SEGMENT_DELIMITER};

use crate::error::{MigrateError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of legacy series files.
pub const LEGACY_EXTENSION: &str = ".wsp";

/// Characters that would corrupt a series key, replaced by `_`.
const KEY_UNSAFE_CHARS: [char; 2] = [',', ' '];

/// Destination identity of a legacy series.
///
/// Tags keep their configured order for key encoding; equality ignores it.
#[derive(Debug, Clone, Eq)]
pub struct SeriesIdentity {
    measurement: String,
    tags: Vec<(String, String)>,
    field: String,
}

impl SeriesIdentity {
    /// Creates an identity, dropping any tag whose key was already seen.
    pub fn new(
        measurement: impl Into<String>,
        tags: Vec<(String, String)>,
        field: impl Into<String>,
    ) -> Self {
        let mut unique: Vec<(String, String)> = Vec::with_capacity(tags.len());
        for (k, v) in tags {
            if !unique.iter().any(|(existing, _)| *existing == k) {
                unique.push((k, v));
            }
        }
        Self {
            measurement: measurement.into(),
            tags: unique,
            field: field.into(),
        }
    }

    /// Returns the measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Returns the tags in configured order.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Returns the value of a tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the encoded series key.
    pub fn key(&self) -> String {
        key::encode(self)
    }

    fn sorted_tags(&self) -> Vec<&(String, String)> {
        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort();
        tags
    }
}

impl PartialEq for SeriesIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.measurement == other.measurement
            && self.field == other.field
            && self.sorted_tags() == other.sorted_tags()
    }
}

/// Normalizes a legacy file path into a pattern-comparable key.
///
/// Strips the legacy extension, turns path separators into the segment
/// delimiter and replaces key-unsafe characters with `_`.
pub fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.strip_suffix(LEGACY_EXTENSION).unwrap_or(&*raw);
    trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' => SEGMENT_DELIMITER,
            c if KEY_UNSAFE_CHARS.contains(&c) => '_',
            c => c,
        })
        .collect()
}

/// Resolves a path against the patterns; `None` when no literal prefix matches.
pub fn resolve(path: &Path, patterns: &[TagPattern]) -> Option<SeriesIdentity> {
    let normalized = normalize_path(path);
    patterns
        .iter()
        .find_map(|pattern| resolve_normalized(&normalized, pattern))
}

/// Applies one pattern to an already normalized key.
pub fn resolve_normalized(normalized: &str, pattern: &TagPattern) -> Option<SeriesIdentity> {
    let prefix = pattern.literal_prefix();
    let start = normalized.find(prefix)?;
    let remainder: Vec<&str> = normalized[start + prefix.len()..]
        .split(SEGMENT_DELIMITER)
        .collect();

    let placeholders = pattern.placeholders();
    let mut tags = Vec::new();
    for template in &pattern.tags {
        let Some(name) = template.placeholder() else {
            continue;
        };
        let bound = placeholders
            .iter()
            .position(|p| *p == name)
            .and_then(|idx| remainder.get(idx))
            .filter(|value| !value.is_empty());
        if let Some(value) = bound {
            tags.push((template.key.clone(), (*value).to_string()));
        }
    }

    let measurement = match remainder.last() {
        Some(last) if !last.is_empty() => (*last).to_string(),
        _ => pattern.measurement.clone(),
    };
    Some(SeriesIdentity::new(measurement, tags, pattern.field.clone()))
}

/// Identity taken verbatim from a pattern's templates, used when a freshly
/// supplied pattern does not match the path it was created for.
pub fn literal_identity(pattern: &TagPattern) -> SeriesIdentity {
    let tags = pattern
        .tags
        .iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect();
    SeriesIdentity::new(pattern.measurement.clone(), tags, pattern.field.clone())
}

/// Supplies a new pattern when no configured pattern matches a path.
pub trait PatternSource {
    /// Returns a pattern for `path`, blocking until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::NoPatternAvailable`] if the source is exhausted.
    fn resolve_unmatched(&mut self, path: &Path) -> Result<TagPattern>;
}

/// Pattern source that never produces a pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPatternSource;

impl PatternSource for NoPatternSource {
    fn resolve_unmatched(&mut self, path: &Path) -> Result<TagPattern> {
        Err(MigrateError::NoPatternAvailable(path.to_path_buf()))
    }
}

/// Resolves and caches identities for the duration of a run.
///
/// Holds the pattern list, which grows when the pattern source supplies
/// a new pattern for an unmatched path.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    patterns: Vec<TagPattern>,
    cache: HashMap<PathBuf, SeriesIdentity>,
    added: usize,
}

impl IdentityResolver {
    /// Creates a resolver over the configured patterns.
    pub fn new(patterns: Vec<TagPattern>) -> Self {
        Self {
            patterns,
            cache: HashMap::new(),
            added: 0,
        }
    }

    /// Returns the current pattern list.
    pub fn patterns(&self) -> &[TagPattern] {
        &self.patterns
    }

    /// Returns the number of patterns appended during this run.
    pub fn added_patterns(&self) -> usize {
        self.added
    }

    /// Returns the cached identity for a path without resolving.
    pub fn cached(&self, path: &Path) -> Option<&SeriesIdentity> {
        self.cache.get(path)
    }

    /// Returns the identity for `path`, asking `source` for a pattern if
    /// none matches. The result is cached for the rest of the run.
    pub fn identity_for(
        &mut self,
        path: &Path,
        source: &mut dyn PatternSource,
    ) -> Result<SeriesIdentity> {
        if let Some(identity) = self.cache.get(path) {
            return Ok(identity.clone());
        }

        let identity = match resolve(path, &self.patterns) {
            Some(identity) => identity,
            None => {
                info!(path = %path.display(), "No pattern matches, requesting a new one");
                let pattern = source.resolve_unmatched(path)?;
                let identity = resolve_normalized(&normalize_path(path), &pattern)
                    .unwrap_or_else(|| literal_identity(&pattern));
                self.patterns.push(pattern);
                self.added += 1;
                identity
            }
        };

        debug!(path = %path.display(), key = %identity.key(), "Resolved series identity");
        self.cache.insert(path.to_path_buf(), identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_load_pattern() -> TagPattern {
        TagPattern::new("carbon.#HOST.load", "load", "value").with_tag("host", "#HOST")
    }

    struct Canned(Vec<TagPattern>, usize);

    impl PatternSource for Canned {
        fn resolve_unmatched(&mut self, path: &Path) -> Result<TagPattern> {
            self.1 += 1;
            self.0
                .pop()
                .ok_or_else(|| MigrateError::NoPatternAvailable(path.to_path_buf()))
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("carbon/host1/load.wsp")),
            "carbon.host1.load"
        );
        assert_eq!(
            normalize_path(Path::new("carbon/my host/a,b.wsp")),
            "carbon.my_host.a_b"
        );
    }

    #[test]
    fn test_resolve_host_load() {
        let identity = resolve(Path::new("carbon/host1/load.wsp"), &[host_load_pattern()]).unwrap();
        assert_eq!(identity.measurement(), "load");
        assert_eq!(identity.tag("host"), Some("host1"));
        assert_eq!(identity.field(), "value");
        assert_eq!(identity.key(), "load,host=host1#!~#value");
    }

    #[test]
    fn test_first_match_wins() {
        let generic = TagPattern::new("carbon.#A", "m", "generic");
        let specific = TagPattern::new("carbon.agents.#A", "m", "specific");
        let identity = resolve(
            Path::new("carbon/agents/h1/cpu.wsp"),
            &[generic, specific],
        )
        .unwrap();
        assert_eq!(identity.field(), "generic");
    }

    #[test]
    fn test_prefix_matches_anywhere_in_path() {
        let identity = resolve(
            Path::new("/var/lib/whisper/carbon/host1/load.wsp"),
            &[host_load_pattern()],
        )
        .unwrap();
        assert_eq!(identity.tag("host"), Some("host1"));
    }

    #[test]
    fn test_no_match() {
        assert!(resolve(Path::new("graphite/x.wsp"), &[host_load_pattern()]).is_none());
    }

    #[test]
    fn test_fewer_segments_than_placeholders_leaves_gaps() {
        let pattern = TagPattern::new("carbon.#A.#B.#C", "m", "value")
            .with_tag("a", "#A")
            .with_tag("b", "#B")
            .with_tag("c", "#C");
        let identity = resolve(Path::new("carbon/x.wsp"), &[pattern]).unwrap();
        assert_eq!(identity.tags(), &[("a".to_string(), "x".to_string())]);
        assert_eq!(identity.measurement(), "x");
    }

    #[test]
    fn test_unknown_placeholder_and_literal_templates_are_skipped() {
        let pattern = TagPattern::new("carbon.#HOST.load", "load", "value")
            .with_tag("host", "#HOST")
            .with_tag("dc", "#DC")
            .with_tag("env", "prod");
        let identity = resolve(Path::new("carbon/h1/load.wsp"), &[pattern]).unwrap();
        assert_eq!(identity.tags(), &[("host".to_string(), "h1".to_string())]);
    }

    #[test]
    fn test_measurement_is_last_remainder_segment() {
        let pattern = TagPattern::new("carbon.relays.#HOST", "ignored", "value").with_tag("host", "#HOST");
        let identity = resolve(
            Path::new("carbon/relays/eud3-pr-mutgra1-a/whitelistRejects.wsp"),
            &[pattern],
        )
        .unwrap();
        assert_eq!(identity.measurement(), "whitelistRejects");
        assert_eq!(identity.tag("host"), Some("eud3-pr-mutgra1-a"));
    }

    #[test]
    fn test_whole_path_prefix_uses_pattern_measurement() {
        let pattern = TagPattern::new("carbon.host1.load", "load", "value").with_tag("host", "#HOST");
        let identity = resolve(Path::new("carbon/host1/load.wsp"), &[pattern]).unwrap();
        assert_eq!(identity.measurement(), "load");
        assert!(identity.tags().is_empty());
        assert_eq!(identity.key(), "load#!~#value");
    }

    #[test]
    fn test_identity_equality_ignores_tag_order() {
        let a = SeriesIdentity::new("m", vec![("a".into(), "1".into()), ("b".into(), "2".into())], "f");
        let b = SeriesIdentity::new("m", vec![("b".into(), "2".into()), ("a".into(), "1".into())], "f");
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_tag_keys_keep_first() {
        let identity = SeriesIdentity::new(
            "m",
            vec![("a".into(), "1".into()), ("a".into(), "2".into())],
            "f",
        );
        assert_eq!(identity.tags().len(), 1);
        assert_eq!(identity.tag("a"), Some("1"));
    }

    #[test]
    fn test_resolver_prompts_once_and_caches() {
        let mut resolver = IdentityResolver::new(vec![]);
        let mut source = Canned(vec![host_load_pattern()], 0);
        let path = Path::new("carbon/host1/load.wsp");

        let first = resolver.identity_for(path, &mut source).unwrap();
        let second = resolver.identity_for(path, &mut source).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.1, 1);
        assert_eq!(resolver.patterns().len(), 1);
        assert_eq!(resolver.added_patterns(), 1);
    }

    #[test]
    fn test_resolver_new_pattern_applies_to_later_paths() {
        let mut resolver = IdentityResolver::new(vec![]);
        let mut source = Canned(vec![host_load_pattern()], 0);

        resolver
            .identity_for(Path::new("carbon/host1/load.wsp"), &mut source)
            .unwrap();
        let other = resolver
            .identity_for(Path::new("carbon/host2/load.wsp"), &mut source)
            .unwrap();

        assert_eq!(other.tag("host"), Some("host2"));
        assert_eq!(source.1, 1);
    }

    #[test]
    fn test_resolver_falls_back_to_literal_identity() {
        let mut resolver = IdentityResolver::new(vec![]);
        let literal = TagPattern::new("nomatch.#X", "constant", "value").with_tag("env", "prod");
        let mut source = Canned(vec![literal], 0);

        let identity = resolver
            .identity_for(Path::new("carbon/host1/load.wsp"), &mut source)
            .unwrap();
        assert_eq!(identity.key(), "constant,env=prod#!~#value");
    }

    #[test]
    fn test_resolver_source_exhausted() {
        let mut resolver = IdentityResolver::new(vec![]);
        let result = resolver.identity_for(Path::new("a/b.wsp"), &mut NoPatternSource);
        assert!(matches!(result, Err(MigrateError::NoPatternAvailable(_))));
    }
}
