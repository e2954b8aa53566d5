//! Filename patterns that map legacy series paths to destination identities.
//!
//! A pattern such as `carbon.agents.#HOST.#METRIC` is split on the
//! placeholder marker `#` into a literal prefix (`carbon.agents.`) and a
//! sequence of placeholder segments (`HOST.`, `METRIC`). The name of a
//! placeholder is its segment up to the first delimiter, so `#HOST.load`
//! declares the placeholder `HOST`.

use serde::{Deserialize, Serialize};

/// Marker that introduces a placeholder inside a pattern or tag template.
pub const PLACEHOLDER_MARKER: char = '#';

/// Delimiter between segments of a normalized series path.
pub const SEGMENT_DELIMITER: char = '.';

/// One `tagKey=value` template of a pattern.
///
/// The value is either a placeholder reference (`#HOST`) or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTemplate {
    /// Destination tag key.
    #[serde(rename = "tagkey")]
    pub key: String,
    /// Placeholder reference or literal value.
    #[serde(rename = "tagvalue")]
    pub value: String,
}

impl TagTemplate {
    /// Creates a new tag template.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns the placeholder name this template refers to, if any.
    pub fn placeholder(&self) -> Option<&str> {
        self.value
            .strip_prefix(PLACEHOLDER_MARKER)
            .map(|name| name.trim_matches(PLACEHOLDER_MARKER))
    }

    /// Parses `key=value`; returns `None` when there is no `=` or the key is empty.
    pub fn parse(text: &str) -> Option<Self> {
        let (key, value) = text.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key, value.trim()))
    }
}

/// A configured filename pattern with its measurement, tag and field templates.
///
/// Serialized as one element of the pattern configuration file:
///
/// ```json
/// {
///   "pattern": "carbon.#HOST.load",
///   "measurement": "load",
///   "tags": [{ "tagkey": "host", "tagvalue": "#HOST" }],
///   "field": "value"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPattern {
    /// Pattern string with zero or more placeholders.
    pub pattern: String,
    /// Measurement used when the pattern is applied without matching.
    pub measurement: String,
    /// Tag templates in configuration order.
    #[serde(default)]
    pub tags: Vec<TagTemplate>,
    /// Destination field name.
    pub field: String,
}

impl TagPattern {
    /// Creates a pattern with no tag templates.
    pub fn new(
        pattern: impl Into<String>,
        measurement: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            measurement: measurement.into(),
            tags: Vec::new(),
            field: field.into(),
        }
    }

    /// Appends a tag template.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(TagTemplate::new(key, value));
        self
    }

    /// Returns the literal text before the first placeholder marker.
    pub fn literal_prefix(&self) -> &str {
        match self.pattern.find(PLACEHOLDER_MARKER) {
            Some(idx) => &self.pattern[..idx],
            None => &self.pattern,
        }
    }

    /// Returns the placeholder names in positional order.
    ///
    /// Position `i` (1-indexed) binds to the `i`-th remainder segment after
    /// the literal prefix.
    pub fn placeholders(&self) -> Vec<&str> {
        self.pattern
            .split(PLACEHOLDER_MARKER)
            .skip(1)
            .map(|segment| {
                let segment = segment.trim_matches(SEGMENT_DELIMITER);
                segment
                    .split(SEGMENT_DELIMITER)
                    .next()
                    .unwrap_or(segment)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_prefix() {
        let pattern = TagPattern::new("carbon.agents.#HOST.#METRIC", "m", "value");
        assert_eq!(pattern.literal_prefix(), "carbon.agents.");

        let no_placeholder = TagPattern::new("carbon.relays", "m", "value");
        assert_eq!(no_placeholder.literal_prefix(), "carbon.relays");

        let leading = TagPattern::new("#HOST.cpu", "m", "value");
        assert_eq!(leading.literal_prefix(), "");
    }

    #[test]
    fn test_placeholders_in_order() {
        let pattern = TagPattern::new("carbon.agents.#A.#B.#C", "m", "value");
        assert_eq!(pattern.placeholders(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_placeholder_name_stops_at_delimiter() {
        let pattern = TagPattern::new("carbon.#HOST.load", "load", "value");
        assert_eq!(pattern.placeholders(), vec!["HOST"]);
    }

    #[test]
    fn test_tag_template_placeholder() {
        assert_eq!(TagTemplate::new("host", "#HOST").placeholder(), Some("HOST"));
        assert_eq!(TagTemplate::new("dc", "eu-west").placeholder(), None);
    }

    #[test]
    fn test_tag_template_parse() {
        assert_eq!(
            TagTemplate::parse("host=#TEXT1"),
            Some(TagTemplate::new("host", "#TEXT1"))
        );
        assert_eq!(TagTemplate::parse("novalue"), None);
        assert_eq!(TagTemplate::parse("=#TEXT1"), None);
    }

    #[test]
    fn test_json_field_names() {
        let pattern = TagPattern::new("carbon.#HOST.load", "load", "value").with_tag("host", "#HOST");
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["pattern"], "carbon.#HOST.load");
        assert_eq!(json["tags"][0]["tagkey"], "host");
        assert_eq!(json["tags"][0]["tagvalue"], "#HOST");
        assert_eq!(json["field"], "value");
    }
}
