//! # Content Negotiation
//!
//! Resolves vendor, version and format from the `Accept` header, the query
//! string and the path, and derives the path used for route matching.
//!
//! Given
//!
//! ```text
//! GET /users
//! Accept: application/vnd.acme-v2+json
//! ```
//!
//! the request is matched as `/v2/users.json` with vendor `acme`. The
//! request itself is never rewritten; the result is a separate
//! [`NegotiatedRequest`].

use crate::format::{extension_for, media_matches, Format};
use crate::path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Media range grammar: `type/(vnd.<vendor>(-<version>)?)?(+<format>)?;q=<q>`
static ACCEPT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        (?P<type>[^/;,\s]+)
        /
        (?P<subtype>
            (?:
                vnd\.(?P<vendor>[^/;,\s.+-]+)
                (?:-(?P<version>[^/;,\s.+-]+))?
            |
                [^/;,\s+]+
            )
            (?:\+(?P<format>[^/;,\s]+))?
        )
        \s*
        (?:;\s*q=(?P<qvalue>\d(?:\.\d+)?))?
        ",
    )
    .unwrap()
});

/// One media range from an `Accept` header
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    kind: String,
    subtype: String,
    vendor: Option<String>,
    version: Option<String>,
    format: Option<String>,
    qvalue: f32,
}

impl MediaType {
    /// Top-level type (`application`)
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Full subtype (`vnd.acme-v2+json`)
    #[must_use]
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Vendor token
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    /// Version token
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Format: the `+suffix` when present, otherwise the subtype
    #[must_use]
    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or(&self.subtype)
    }

    /// Quality, 1 when absent
    #[must_use]
    pub const fn qvalue(&self) -> f32 {
        self.qvalue
    }

    /// Media type without vendor parts (`application/json`)
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.format())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.format())
    }
}

/// A parsed `Accept` header, ranked by descending quality
///
/// Ties keep header order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Accept {
    media_types: Vec<MediaType>,
}

impl Accept {
    /// Parse a header; an absent header means `*/*`
    #[must_use]
    pub fn parse(header: Option<&str>) -> Self {
        let header = header.filter(|h| !h.trim().is_empty()).unwrap_or("*/*");
        let mut media_types: Vec<MediaType> = ACCEPT_HEADER
            .captures_iter(header)
            .map(|caps| {
                let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
                MediaType {
                    kind: text("type").unwrap_or_default().to_ascii_lowercase(),
                    subtype: text("subtype").unwrap_or_default().to_ascii_lowercase(),
                    vendor: text("vendor"),
                    version: text("version"),
                    format: text("format").map(|f| f.to_ascii_lowercase()),
                    qvalue: caps
                        .name("qvalue")
                        .and_then(|q| q.as_str().parse().ok())
                        .unwrap_or(1.0),
                }
            })
            .collect();
        media_types.sort_by(|a, b| b.qvalue.total_cmp(&a.qvalue));
        Self { media_types }
    }

    /// Ranked media types
    #[must_use]
    pub fn media_types(&self) -> &[MediaType] {
        &self.media_types
    }

    /// Highest-ranked media type
    #[must_use]
    pub fn preferred(&self) -> Option<&MediaType> {
        self.media_types.first()
    }

    /// The first offered format that the highest-ranked compatible media
    /// range accepts
    #[must_use]
    pub fn best_of<'a>(&self, offered: &'a [Format]) -> Option<&'a Format> {
        self.media_types.iter().find_map(|media| {
            let range = media.essence();
            offered.iter().find(|f| media_matches(&range, f.mime()))
        })
    }
}

/// Where the API version comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Leading path segment (`/v2/users`)
    #[default]
    Path,
    /// Vendor media type in `Accept`
    Header,
    /// Query parameter (`?v=v2`)
    Query,
}

/// API-wide versioning settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioning {
    /// Version source
    pub strategy: Strategy,
    /// Vendor token expected in vendor media types
    pub vendor: Option<String>,
    /// Query parameter carrying the version
    pub parameter: String,
    /// Version prefixed when a header or query request names none
    pub default: Option<String>,
}

impl Default for Versioning {
    fn default() -> Self {
        Self {
            strategy: Strategy::Path,
            vendor: None,
            parameter: "v".to_string(),
            default: None,
        }
    }
}

impl Versioning {
    /// Versioning with a strategy and default settings
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Set the vendor token
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Set the query parameter name
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }

    /// Set the default version
    #[must_use]
    pub fn with_default(mut self, version: impl Into<String>) -> Self {
        self.default = Some(version.into());
        self
    }
}

/// Read-only view of a request after negotiation
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedRequest {
    /// Vendor named by the `Accept` header
    pub vendor: Option<String>,
    /// Resolved version
    pub version: Option<String>,
    /// Format extension derived from `Accept`, if any was appended
    pub format: Option<String>,
    /// Path used for matching
    pub path: String,
    /// Query parameters, without the version parameter
    pub query: HashMap<String, String>,
    /// Parsed `Accept` header
    pub accept: Accept,
}

impl NegotiatedRequest {
    /// Whether the matching path's extension came from `Accept` rather
    /// than the request path
    #[must_use]
    pub const fn format_from_accept(&self) -> bool {
        self.format.is_some()
    }
}

/// Applies a [`Versioning`] strategy to incoming requests
#[derive(Debug, Clone, Default)]
pub struct ContentNegotiator {
    versioning: Versioning,
    versions: Vec<String>,
}

impl ContentNegotiator {
    /// Negotiator for a strategy and the versions an API declares
    #[must_use]
    pub const fn new(versioning: Versioning, versions: Vec<String>) -> Self {
        Self {
            versioning,
            versions,
        }
    }

    /// Versioning settings
    #[must_use]
    pub const fn versioning(&self) -> &Versioning {
        &self.versioning
    }

    /// Negotiate a request
    #[must_use]
    pub fn negotiate(
        &self,
        accept: Option<&str>,
        request_path: &str,
        query: &HashMap<String, String>,
    ) -> NegotiatedRequest {
        let accept = Accept::parse(accept);
        let preferred = accept.preferred();
        let mut query = query.clone();
        let mut path = path::normalize(request_path);

        let vendor = preferred.and_then(MediaType::vendor).map(str::to_string);

        let mut version = match self.versioning.strategy {
            Strategy::Path => None,
            Strategy::Header => preferred.and_then(MediaType::version).map(str::to_string),
            Strategy::Query => query.remove(&self.versioning.parameter),
        }
        .filter(|v| !v.is_empty());

        if version.is_none() && self.versioning.strategy != Strategy::Path {
            let named = self.versions.iter().any(|v| path::starts_with_segment(&path, v));
            if !named {
                version.clone_from(&self.versioning.default);
            }
        }

        if let Some(version) = &version {
            if !path::starts_with_segment(&path, version) {
                path = path::join(&[version.as_str()], &path);
            }
        }

        let mut format = None;
        // A vendor type without `+format` leaves the format to the endpoint
        if let Some(media) = preferred.filter(|m| m.vendor.is_none() || m.format.is_some()) {
            let essence = media.essence();
            if let Some(ext) = extension_for(&essence) {
                if ext != "*" && path::extension(&path).is_none() {
                    path.push('.');
                    path.push_str(ext);
                    format = Some(ext.to_string());
                }
            }
        }

        debug!(
            vendor = ?vendor,
            version = ?version,
            format = ?format,
            path = %path,
            "Negotiated request"
        );

        NegotiatedRequest {
            vendor,
            version,
            format,
            path,
            query,
            accept,
        }
    }
}
