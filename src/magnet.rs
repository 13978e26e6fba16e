use std::{fmt::Display, str::FromStr, sync::LazyLock};

use regex::Regex;
use url::form_urlencoded;

const MAGNET_PREFIX: &str = "magnet:?";

static MAGNET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^magnet:\?xt=urn:btih:[a-zA-Z0-9]{32,40}(&.*)?$")
        .expect("magnet pattern should compile")
});

static HASH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"urn:btih:([a-zA-Z0-9]{32,40})").expect("hash pattern should compile")
});

#[derive(Debug, thiserror::Error)]
pub enum MagnetError {
    #[error("Invalid magnet link: {0:?}")]
    Invalid(String),
}

/// A magnet URI that passed validation.
///
/// The only way to obtain one is [`MagnetLink::parse`], so holding a
/// `MagnetLink` means the grammar check already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink(String);

/// Attributes extracted from a magnet URI. Missing fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagnetInfo {
    pub hash: String,
    pub name: String,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Check whether `input` (surrounding whitespace ignored) is a well-formed magnet URI.
    #[must_use]
    pub fn is_valid(input: &str) -> bool {
        MAGNET_PATTERN.is_match(input.trim())
    }

    /// Validate and wrap a magnet URI.
    ///
    /// # Errors
    ///
    /// Returns `MagnetError::Invalid` if the trimmed input does not match the magnet grammar.
    pub fn parse(input: &str) -> Result<Self, MagnetError> {
        let trimmed = input.trim();
        if Self::is_valid(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(MagnetError::Invalid(input.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase info-hash of the link.
    #[must_use]
    pub fn hash(&self) -> String {
        extract_hash(&self.0)
    }

    #[must_use]
    pub fn info(&self) -> MagnetInfo {
        magnet_info(&self.0)
    }

    /// Return a copy of the link with `trackers` appended as `tr=` parameters.
    ///
    /// Trackers already carried by the link, and repeats within `trackers`, are skipped.
    #[must_use]
    pub fn with_trackers(&self, trackers: &[String]) -> Self {
        let mut seen = self.info().trackers;
        let mut link = self.0.clone();

        for tracker in trackers {
            if tracker.is_empty() || seen.contains(tracker) {
                continue;
            }
            link.push_str("&tr=");
            link.extend(form_urlencoded::byte_serialize(tracker.as_bytes()));
            seen.push(tracker.clone());
        }

        Self(link)
    }
}

impl Display for MagnetLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MagnetLink {
    type Err = MagnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Extract the lowercase btih info-hash, or an empty string when there is none.
#[must_use]
pub fn extract_hash(input: &str) -> String {
    HASH_PATTERN
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Extract hash, display name and trackers from any string.
///
/// Works on unvalidated input; fields that cannot be found are left empty.
#[must_use]
pub fn magnet_info(input: &str) -> MagnetInfo {
    let input = input.trim();
    if input.is_empty() {
        return MagnetInfo::default();
    }

    let mut info = MagnetInfo {
        hash: extract_hash(input),
        ..MagnetInfo::default()
    };

    let query = input.strip_prefix(MAGNET_PREFIX).unwrap_or(input);
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "dn" if info.name.is_empty() => info.name = value.into_owned(),
            "tr" if !value.is_empty() => info.trackers.push(value.into_owned()),
            _ => {}
        }
    }

    info
}
