//! # Response Formats
//!
//! Maps short format names (`json`, `xml`, ...) to media types and back.

use std::fmt;

/// Well-known format names and their media types
const KNOWN: &[(&str, &str)] = &[
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("html", "text/html"),
    ("txt", "text/plain"),
    ("js", "application/javascript"),
    ("csv", "text/csv"),
];

/// A response format: short name plus media type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Format {
    name: String,
    mime: String,
}

impl Format {
    /// Format with an explicit media type
    #[must_use]
    pub fn new(name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
        }
    }

    /// Format for a name, using the well-known media type when there is one
    /// and `application/<name>` otherwise
    #[must_use]
    pub fn named(name: &str) -> Self {
        let name = name.trim_start_matches('.').to_ascii_lowercase();
        let mime = KNOWN
            .iter()
            .find(|(known, _)| *known == name)
            .map_or_else(|| format!("application/{name}"), |(_, mime)| (*mime).to_string());
        Self { name, mime }
    }

    /// JSON format
    #[must_use]
    pub fn json() -> Self {
        Self::named("json")
    }

    /// Short name (path extension)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Media type
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Format {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Path extension for a media type: the well-known short name when there is
/// one, otherwise the subtype
#[must_use]
pub fn extension_for(media_type: &str) -> Option<&str> {
    let media_type = media_type.trim();
    if let Some((name, _)) = KNOWN
        .iter()
        .find(|(_, mime)| mime.eq_ignore_ascii_case(media_type))
    {
        return Some(name);
    }
    media_type.split_once('/').map(|(_, subtype)| subtype)
}

/// Whether a concrete media type satisfies a possibly-wildcarded range
/// (`*/*`, `text/*`)
#[must_use]
pub fn media_matches(range: &str, media_type: &str) -> bool {
    let (Some((range_type, range_sub)), Some((kind, sub))) =
        (range.split_once('/'), media_type.split_once('/'))
    else {
        return false;
    };
    (range_type == "*" || range_type.eq_ignore_ascii_case(kind))
        && (range_sub == "*" || range_sub.eq_ignore_ascii_case(sub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_known() {
        assert_eq!(Format::named("json").mime(), "application/json");
        assert_eq!(Format::named("txt").mime(), "text/plain");
        assert_eq!(Format::named(".HTML").name(), "html");
    }

    #[test]
    fn test_named_unknown_falls_back() {
        assert_eq!(Format::named("msgpack").mime(), "application/msgpack");
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("application/json"), Some("json"));
        assert_eq!(extension_for("text/plain"), Some("txt"));
        assert_eq!(extension_for("application/yaml"), Some("yaml"));
        assert_eq!(extension_for("*/*"), Some("*"));
        assert_eq!(extension_for("garbage"), None);
    }

    #[test]
    fn test_media_matches() {
        assert!(media_matches("*/*", "application/json"));
        assert!(media_matches("application/*", "application/json"));
        assert!(media_matches("application/json", "application/json"));
        assert!(!media_matches("text/*", "application/json"));
        assert!(!media_matches("application/xml", "application/json"));
    }
}
