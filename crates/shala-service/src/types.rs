use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::caching::CacheError;

/// The logical path of a resource, as returned by the catalog endpoints.
///
/// This is the cache key. It is either a relative URL path such as `/uploads/pdfs/a.pdf`,
/// or an absolute `http(s)` URL. It is never empty.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(Arc<str>);

impl ResourcePath {
    /// Creates a new path, rejecting empty and whitespace-only input.
    pub fn new(path: &str) -> Result<Self, CacheError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(CacheError::InvalidPath(path.to_owned()));
        }
        Ok(Self(trimmed.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this path is an absolute `http` or `https` URL.
    pub fn is_absolute_url(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// The path relative to a base location, without leading slashes.
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches('/')
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourcePath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ResourcePath {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for ResourcePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourcePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path_rejected() {
        assert_eq!(
            ResourcePath::new(""),
            Err(CacheError::InvalidPath(String::new()))
        );
        assert!(ResourcePath::new("   ").is_err());
    }

    #[test]
    fn test_path_is_trimmed() {
        let path = ResourcePath::new("  /uploads/pdfs/a.pdf\n").unwrap();
        assert_eq!(path.as_str(), "/uploads/pdfs/a.pdf");
        assert_eq!(path.relative(), "uploads/pdfs/a.pdf");
        assert!(!path.is_absolute_url());
    }

    #[test]
    fn test_absolute_url() {
        let path: ResourcePath = "https://cdn.example.org/a.pdf".parse().unwrap();
        assert!(path.is_absolute_url());
    }

    #[test]
    fn test_deserialize() {
        let path: ResourcePath = serde_json::from_str(r#""/a.pdf""#).unwrap();
        assert_eq!(path.as_str(), "/a.pdf");
        assert!(serde_json::from_str::<ResourcePath>(r#""""#).is_err());
    }
}
