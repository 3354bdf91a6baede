//! Token audience (RFC 8707 resource indicator) matching.

use std::fmt;

use serde::Deserialize;
use url::Url;

/// The `aud` claim: one resource or several.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(s) => s.is_empty(),
            Self::Many(v) => v.iter().all(String::is_empty),
        }
    }

    /// Non-empty entries, in order.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v,
        };
        items.iter().map(String::as_str)
    }

    /// True if any entry names `resource` after normalization.
    #[must_use]
    pub fn contains_resource(&self, resource: &str) -> bool {
        let Some(expected) = normalize_resource(resource) else {
            return false;
        };
        self.iter().filter_map(normalize_resource).any(|aud| aud == expected)
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.iter().collect::<Vec<_>>().join(" "))
    }
}

/// Canonical form of a resource URL.
///
/// Lowercases scheme and host, drops default ports and the fragment, and
/// strips a trailing slash. Returns `None` for anything that is not an
/// absolute URL.
#[must_use]
pub fn normalize_resource(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_resource("HTTPS://Example.COM:443/mcp/").as_deref(), Some("https://example.com/mcp"));
        assert_eq!(normalize_resource("http://localhost:3003").as_deref(), Some("http://localhost:3003"));
        assert_eq!(normalize_resource("not a url"), None);
    }

    #[test]
    fn test_deserialize_string_or_array() {
        let one: Audience = serde_json::from_str(r#""http://a""#).unwrap();
        let many: Audience = serde_json::from_str(r#"["http://a","http://b"]"#).unwrap();
        assert_eq!(one, Audience::One("http://a".into()));
        assert!(many.contains_resource("http://b/"));
    }
}
