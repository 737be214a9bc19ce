//! # Path Utilities
//!
//! Normalization and joining of request paths and route templates.
//!
//! A normalized path always starts with `/`, never contains `//` and never
//! ends with `/` unless it is the root.

/// Normalize a path: leading slash, no repeated or trailing slashes
///
/// Idempotent: normalizing an already normalized path returns it unchanged.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Join namespace segments and a trailing path, then normalize
#[must_use]
pub fn join<S: AsRef<str>>(segments: &[S], path: &str) -> String {
    let mut joined = String::from("/");
    for segment in segments {
        joined.push_str(segment.as_ref());
        joined.push('/');
    }
    joined.push_str(path);
    normalize(&joined)
}

/// Whether `path` starts with `segment` as a whole path segment
///
/// `/v2/users` and `/v2.json` start with `v2`; `/v22` does not.
#[must_use]
pub fn starts_with_segment(path: &str, segment: &str) -> bool {
    let trimmed = path.trim_start_matches('/');
    trimmed
        .strip_prefix(segment)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('.'))
}

/// Extension of the last path segment, without the dot
#[must_use]
pub fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_leading_slash() {
        assert_eq!(normalize("users"), "/users");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_normalize_squeezes_and_trims() {
        assert_eq!(normalize("//users///1/"), "/users/1");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("///"), "/");
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["/a//b/", "x", "/", "/users/:id/posts", "//v1//things.json"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_join_namespaces() {
        assert_eq!(join(&["users", ":id"], "/posts"), "/users/:id/posts");
        assert_eq!(join(&["/api/", "/v1"], "/"), "/api/v1");
        let empty: [&str; 0] = [];
        assert_eq!(join(&empty, "/"), "/");
    }

    #[test]
    fn test_starts_with_segment() {
        assert!(starts_with_segment("/v2/users", "v2"));
        assert!(starts_with_segment("/v2", "v2"));
        assert!(starts_with_segment("/v2.json", "v2"));
        assert!(!starts_with_segment("/v22/users", "v2"));
        assert!(!starts_with_segment("/users", "v2"));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/users.json"), Some("json"));
        assert_eq!(extension("/v1.0/users"), None);
        assert_eq!(extension("/users"), None);
        assert_eq!(extension("/users."), None);
    }
}
