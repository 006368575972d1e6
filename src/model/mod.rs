//! Shared value types for catalog and provider records.
//!
//! Both ingestion paths (canonical catalog load and provider listing
//! normalization) produce these types, so matching can compare them
//! directly by content hash or by normalized (name, region) key.

pub mod name;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Stable identifier of a canonical catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Creates an entry identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a content provider as declared in its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Creates a provider identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Release region of a title.
///
/// Used as half of the secondary (normalized name, region) match key.
/// Tags that don't map to a known region collapse to [`Region::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Usa,
    Europe,
    Japan,
    World,
    Unknown,
}

impl Region {
    /// Returns the canonical string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usa => "usa",
            Self::Europe => "europe",
            Self::Japan => "japan",
            Self::World => "world",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a bracketed tag token (`USA`, `U`, `Eur`, ...) to a region.
    ///
    /// Returns `None` for tokens that are not region tags, so callers can
    /// keep scanning the remaining tags.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "usa" | "us" | "u" => Some(Self::Usa),
            "europe" | "eur" | "eu" | "e" => Some(Self::Europe),
            "japan" | "jpn" | "jp" | "j" => Some(Self::Japan),
            "world" | "w" => Some(Self::World),
            _ => None,
        }
    }

    /// Parses a free-form region string, defaulting to `Unknown`.
    #[must_use]
    pub fn parse_loose(value: &str) -> Self {
        Self::from_tag(value).unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hashes attached to a catalog entry or provider record.
///
/// Hex digests are lowercased at construction so lookups never have to
/// worry about case. `md5` and `sha1` count as strong hashes; `crc32` is
/// a fallback integrity check only, never a match key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentHashes {
    /// 128-bit MD5 digest, lowercase hex.
    pub md5: Option<String>,
    /// 160-bit SHA-1 digest, lowercase hex.
    pub sha1: Option<String>,
    /// CRC32 checksum, lowercase hex.
    pub crc32: Option<String>,
}

// Deserialization funnels through `new` so digests arriving from catalog
// exports or listing files are normalized exactly like constructed ones.
impl<'de> Deserialize<'de> for ContentHashes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            md5: Option<String>,
            #[serde(default)]
            sha1: Option<String>,
            #[serde(default)]
            crc32: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::new(
            raw.md5.as_deref(),
            raw.sha1.as_deref(),
            raw.crc32.as_deref(),
        ))
    }
}

impl ContentHashes {
    /// Creates a hash set, lowercasing digests and dropping empty strings.
    #[must_use]
    pub fn new(md5: Option<&str>, sha1: Option<&str>, crc32: Option<&str>) -> Self {
        fn clean(value: Option<&str>) -> Option<String> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_lowercase)
        }

        Self {
            md5: clean(md5),
            sha1: clean(sha1),
            crc32: clean(crc32),
        }
    }

    /// Returns true when at least one strong (md5/sha1) hash is present.
    #[must_use]
    pub fn has_strong(&self) -> bool {
        self.md5.is_some() || self.sha1.is_some()
    }

    /// Returns all strong hash keys, md5 first.
    #[must_use]
    pub fn strong_keys(&self) -> Vec<HashKey> {
        let mut keys = Vec::new();
        if let Some(md5) = &self.md5 {
            keys.push(HashKey::Md5(md5.clone()));
        }
        if let Some(sha1) = &self.sha1 {
            keys.push(HashKey::Sha1(sha1.clone()));
        }
        keys
    }
}

/// Lookup key for the hash index: one strong digest, tagged by algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    /// Lowercase hex MD5 digest.
    Md5(String),
    /// Lowercase hex SHA-1 digest.
    Sha1(String),
}

/// Canonical record for one title on one console.
///
/// Immutable once loaded; owned by the reconciliation index for the
/// lifetime of a console session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable identifier.
    pub id: EntryId,
    /// Display name.
    pub name: String,
    /// Release region.
    #[serde(default = "default_region")]
    pub region: Region,
    /// Cartridge/disc serial when known.
    #[serde(default)]
    pub serial: Option<String>,
    /// Content hashes (at least one strong hash expected).
    #[serde(default)]
    pub hashes: ContentHashes,
    /// Byte size when known.
    #[serde(default)]
    pub size: Option<u64>,
}

fn default_region() -> Region {
    Region::Unknown
}

impl CatalogEntry {
    /// Returns the secondary match key: (normalized name, region).
    #[must_use]
    pub fn name_key(&self) -> Option<(String, Region)> {
        let normalized = name::normalize(&self.name);
        if normalized.is_empty() {
            None
        } else {
            Some((normalized, self.region))
        }
    }
}

/// Transport kind of a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Direct HTTP(S) download.
    Http,
    /// Peer-to-peer transfer through the external engine.
    Peer,
}

impl Transport {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Peer => "peer",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "peer" => Ok(Self::Peer),
            _ => Err(format!("invalid transport: {s}")),
        }
    }
}

/// Error building a transfer locator from provider data.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// The HTTP URL failed to parse.
    #[error("invalid HTTP locator {url}: {source}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The URL parsed but is not http/https.
    #[error("unsupported scheme '{scheme}' in locator {url}")]
    UnsupportedScheme {
        /// The offending URL string.
        url: String,
        /// The rejected scheme.
        scheme: String,
    },

    /// Peer-to-peer locator was empty.
    #[error("empty peer-to-peer locator")]
    EmptyPeer,
}

/// Transport-specific address for retrieving an artifact.
///
/// Validated for well-formedness only; reachability is the job manager's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// Direct HTTP(S) URL.
    Http {
        /// Absolute URL of the artifact.
        url: String,
    },
    /// Peer-to-peer reference: a bundle locator plus the path of the wanted
    /// file inside the bundle (bundles typically carry many files).
    Peer {
        /// Bundle locator (magnet link, .torrent URL or path).
        locator: String,
        /// Path of the wanted file inside the bundle.
        #[serde(default)]
        path: Option<String>,
    },
}

impl Locator {
    /// Builds a validated HTTP locator.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::InvalidUrl`] when the URL does not parse and
    /// [`LocatorError::UnsupportedScheme`] for non-http(s) schemes.
    pub fn http(url: impl Into<String>) -> Result<Self, LocatorError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|source| LocatorError::InvalidUrl {
            url: url.clone(),
            source,
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self::Http { url }),
            scheme => Err(LocatorError::UnsupportedScheme {
                url: url.clone(),
                scheme: scheme.to_string(),
            }),
        }
    }

    /// Builds a validated peer-to-peer locator.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::EmptyPeer`] when the bundle locator is blank.
    pub fn peer(
        locator: impl Into<String>,
        path: Option<String>,
    ) -> Result<Self, LocatorError> {
        let locator = locator.into();
        if locator.trim().is_empty() {
            return Err(LocatorError::EmptyPeer);
        }
        Ok(Self::Peer { locator, path })
    }

    /// Returns the transport kind this locator requires.
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self {
            Self::Http { .. } => Transport::Http,
            Self::Peer { .. } => Transport::Peer,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => f.write_str(url),
            Self::Peer {
                locator,
                path: Some(path),
            } => write!(f, "{locator}#{path}"),
            Self::Peer {
                locator,
                path: None,
            } => f.write_str(locator),
        }
    }
}

/// A provider's claim about an available artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Source provider.
    pub provider: ProviderId,
    /// Display name as given by the provider (usually a file name).
    pub name: String,
    /// Transfer locators, preferred first.
    pub locators: Vec<Locator>,
    /// Hashes if the provider supplies them.
    #[serde(default)]
    pub hashes: ContentHashes,
    /// Byte size if the provider supplies it.
    #[serde(default)]
    pub size: Option<u64>,
}

impl ProviderRecord {
    /// Returns the secondary match key derived from the provider name.
    ///
    /// The region is extracted from bracketed tags in the raw name
    /// (`"Super Mario 64 (USA).z64"` yields `("super mario 64", Usa)`).
    #[must_use]
    pub fn name_key(&self) -> Option<(String, Region)> {
        let (normalized, region) = name::parse_title(&self.name);
        if normalized.is_empty() {
            None
        } else {
            Some((normalized, region))
        }
    }
}

/// Confidence of a catalog-to-provider match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchConfidence {
    /// A strong content hash matched exactly.
    HashExact,
    /// Matched by (normalized name, region) only.
    NameApproximate,
    /// No provider record matched.
    Unmatched,
}

impl MatchConfidence {
    /// Returns the canonical string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashExact => "hash-exact",
            Self::NameApproximate => "name-approximate",
            Self::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
