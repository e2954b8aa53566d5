//! Series key encoding.
//!
//! A series key is `measurement[,tagkey=tagvalue]*#!~#field`. Tags are
//! written in the identity's configured order, not sorted.

use crate::identity::SeriesIdentity;

/// Separator between the series part of a key and its field name.
pub const FIELD_SEPARATOR: &str = "#!~#";

/// Encodes an identity into its series key.
pub fn encode(identity: &SeriesIdentity) -> String {
    let tags_len: usize = identity
        .tags()
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    let mut key = String::with_capacity(
        identity.measurement().len() + tags_len + FIELD_SEPARATOR.len() + identity.field().len(),
    );
    key.push_str(identity.measurement());
    for (tag_key, tag_value) in identity.tags() {
        key.push(',');
        key.push_str(tag_key);
        key.push('=');
        key.push_str(tag_value);
    }
    key.push_str(FIELD_SEPARATOR);
    key.push_str(identity.field());
    key
}

/// Splits a key into its series part and field name.
pub fn split_field(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(FIELD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_with_tags() {
        let identity = SeriesIdentity::new("load", vec![("host".into(), "host1".into())], "value");
        assert_eq!(encode(&identity), "load,host=host1#!~#value");
    }

    #[test]
    fn test_encode_without_tags() {
        let identity = SeriesIdentity::new("whitelistRejects", vec![], "value");
        assert_eq!(encode(&identity), "whitelistRejects#!~#value");
    }

    #[test]
    fn test_encode_is_deterministic() {
        let identity = SeriesIdentity::new(
            "cpu",
            vec![("host".into(), "a".into()), ("dc".into(), "eu".into())],
            "value",
        );
        assert_eq!(encode(&identity).as_bytes(), encode(&identity.clone()).as_bytes());
    }

    #[test]
    fn test_encode_preserves_configured_tag_order() {
        let a = SeriesIdentity::new(
            "cpu",
            vec![("host".into(), "a".into()), ("dc".into(), "eu".into())],
            "value",
        );
        let b = SeriesIdentity::new(
            "cpu",
            vec![("dc".into(), "eu".into()), ("host".into(), "a".into())],
            "value",
        );
        assert_eq!(a, b);
        assert_eq!(encode(&a), "cpu,host=a,dc=eu#!~#value");
        assert_eq!(encode(&b), "cpu,dc=eu,host=a#!~#value");
    }

    #[test]
    fn test_split_field() {
        assert_eq!(
            split_field("load,host=host1#!~#value"),
            Some(("load,host=host1", "value"))
        );
        assert_eq!(split_field("no-field"), None);
    }
}
