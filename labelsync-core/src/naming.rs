//! Tag-space ↔ label-space naming rules.
//!
//! Conversions are pure and total. Truncation is measured in bytes, never
//! splits a UTF-8 character, and is lossy: a truncated name does not
//! round-trip back to its original.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::ConfigOptions;

pub const MAX_TAG_NAME_LEN: usize = 512;
pub const MAX_TAG_VALUE_LEN: usize = 256;
/// Maximum number of tags a compute resource may carry.
pub const MAX_TAG_COUNT: usize = 50;
pub const INVALID_TAG_CHARS: &[char] = &['<', '>', '%', '&', '\\', '?', '/'];
pub const MAX_LABEL_NAME_LEN: usize = 63;
pub const MAX_LABEL_PREFIX_LEN: usize = 253;
pub const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]*$").expect("static regex"));

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex")
});

// ---------------------------------------------------------------------------
// Validity
// ---------------------------------------------------------------------------

/// A tag name is valid when it fits the ARM length limit and avoids `<>%&\?/`.
pub fn tag_name_is_valid(name: &str) -> bool {
    name.len() <= MAX_TAG_NAME_LEN && !name.contains(INVALID_TAG_CHARS)
}

/// Character-level check for a label name segment (or value).
///
/// Empty is accepted; otherwise the first and last characters must be
/// alphanumeric and everything in between drawn from `[a-zA-Z0-9_.-]`.
pub fn label_name_is_valid(name: &str) -> bool {
    if name.len() > MAX_TAG_NAME_LEN || !LABEL_CHARSET.is_match(name) {
        return false;
    }
    match (name.chars().next(), name.chars().last()) {
        (Some(first), Some(last)) => first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric(),
        _ => true,
    }
}

/// Whether `prefix` may appear before the `/` of a label key.
pub fn label_prefix_is_valid(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.len() <= MAX_LABEL_PREFIX_LEN && DNS_SUBDOMAIN.is_match(prefix)
}

/// Full label key check: optional `<prefix>/` plus a non-empty name segment of
/// at most 63 characters.
pub fn label_key_is_valid(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if !label_prefix_is_valid(prefix) {
            return false;
        }
    }
    !name.is_empty() && name.len() <= MAX_LABEL_NAME_LEN && label_name_is_valid(name)
}

/// A label value is at most 63 characters, empty or alphanumeric-bounded.
pub fn label_value_is_valid(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN && label_name_is_valid(value)
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// `env` → `azure.tags/env`.
///
/// Strips `cfg.tag_prefix` when present, truncates the name segment to 63
/// bytes and prepends `cfg.label_prefix/`.
pub fn tag_name_to_label_name(tag_name: &str, cfg: &ConfigOptions) -> String {
    let stripped = tag_name
        .strip_prefix(cfg.tag_prefix.as_str())
        .unwrap_or(tag_name);
    let segment = truncate(stripped, MAX_LABEL_NAME_LEN);
    format!("{}/{}", cfg.label_prefix, segment)
}

/// `azure.tags/env` → `env`. Names without the label prefix pass through.
pub fn label_name_to_tag_name(label_name: &str, cfg: &ConfigOptions) -> String {
    label_name
        .strip_prefix(cfg.label_prefix.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(label_name)
        .to_owned()
}

pub fn tag_value_to_label_value(value: &str) -> String {
    truncate(value, MAX_LABEL_VALUE_LEN).to_owned()
}

pub fn label_value_to_tag_value(value: &str) -> String {
    truncate(value, MAX_TAG_VALUE_LEN).to_owned()
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cfg() -> ConfigOptions {
        ConfigOptions::default()
    }

    #[rstest]
    #[case("env", true)]
    #[case("cost center", true)]
    #[case("a/b", false)]
    #[case("a<b", false)]
    #[case("100%", false)]
    #[case("a&b", false)]
    #[case("a\\b", false)]
    #[case("why?", false)]
    fn tag_name_validity(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(tag_name_is_valid(name), expected);
    }

    #[test]
    fn tag_name_length_limit() {
        assert!(tag_name_is_valid(&"a".repeat(512)));
        assert!(!tag_name_is_valid(&"a".repeat(513)));
    }

    #[rstest]
    #[case("", true)]
    #[case("env", true)]
    #[case("a.b-c_d", true)]
    #[case("-env", false)]
    #[case("env_", false)]
    #[case("has space", false)]
    #[case("azure.tags/env", false)]
    fn label_name_validity(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(label_name_is_valid(name), expected);
    }

    #[rstest]
    #[case("azure.tags/env", true)]
    #[case("env", true)]
    #[case("kubernetes.io/hostname", true)]
    #[case("Azure.Tags/env", false)]
    #[case("/env", false)]
    #[case("azure.tags/", false)]
    #[case("a/b/c", false)]
    fn label_key_validity(#[case] key: &str, #[case] expected: bool) {
        assert_eq!(label_key_is_valid(key), expected);
    }

    #[test]
    fn tag_to_label_adds_prefix() {
        assert_eq!(tag_name_to_label_name("env", &cfg()), "azure.tags/env");
    }

    #[test]
    fn tag_to_label_strips_tag_prefix() {
        let cfg = ConfigOptions {
            tag_prefix: "node.labels.".into(),
            ..cfg()
        };
        assert_eq!(
            tag_name_to_label_name("node.labels.role", &cfg),
            "azure.tags/role"
        );
    }

    #[test]
    fn tag_to_label_truncates_segment() {
        let long = "x".repeat(100);
        let label = tag_name_to_label_name(&long, &cfg());
        assert_eq!(label, format!("azure.tags/{}", "x".repeat(63)));
        assert!(label.len() <= "azure.tags".len() + 1 + MAX_LABEL_NAME_LEN);
    }

    #[test]
    fn label_to_tag_strips_label_prefix_only() {
        assert_eq!(label_name_to_tag_name("azure.tags/env", &cfg()), "env");
        assert_eq!(label_name_to_tag_name("favfruit", &cfg()), "favfruit");
        assert_eq!(
            label_name_to_tag_name("azure.tagsenv", &cfg()),
            "azure.tagsenv"
        );
        let long = format!("azure.tags/{}", "y".repeat(300));
        assert_eq!(label_name_to_tag_name(&long, &cfg()).len(), 300);
    }

    #[test]
    fn values_truncate_per_space() {
        assert_eq!(tag_value_to_label_value(&"v".repeat(80)).len(), 63);
        assert_eq!(label_value_to_tag_value(&"v".repeat(300)).len(), 256);
        assert_eq!(tag_value_to_label_value("short"), "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = format!("{}é", "a".repeat(62));
        assert_eq!(s.len(), 64);
        assert_eq!(tag_value_to_label_value(&s), "a".repeat(62));
    }

    #[test]
    fn converted_valid_segment_yields_valid_key() {
        for name in ["env", "dept", "a.b", "x-1_y", &"z".repeat(90)] {
            let key = tag_name_to_label_name(name, &cfg());
            assert!(label_key_is_valid(&key), "{key}");
        }
    }
}
