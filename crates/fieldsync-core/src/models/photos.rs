//! Photo path list stored on entity records
//!
//! Older records keep photo references as a comma-joined string, newer ones as a
//! JSON array. Both decode into [`PhotoPaths`]; encoding always emits an array.
//! Array input is kept as-is, so a decode followed by an encode reproduces it.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered list of photo file paths attached to one entity field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoPaths(Vec<String>);

impl PhotoPaths {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Decode a stored column value: JSON array text or comma-joined paths.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::new();
        }
        if trimmed.starts_with('[') {
            if let Ok(paths) = serde_json::from_str::<Vec<String>>(trimmed) {
                return Self(paths);
            }
        }
        Self(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Encode as a JSON array string for storage.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Append a path unless the list already holds it.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.0.contains(&path) {
            self.0.push(path);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for PhotoPaths {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for PhotoPaths {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PhotoPaths {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PhotoPathsVisitor)
    }
}

struct PhotoPathsVisitor;

impl<'de> Visitor<'de> for PhotoPathsVisitor {
    type Value = PhotoPaths;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a list of paths, a JSON array string or a comma-joined string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(PhotoPaths::parse(value))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(PhotoPaths::new())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(PhotoPaths::new())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut paths = Vec::new();
        while let Some(path) = seq.next_element::<String>()? {
            paths.push(path);
        }
        Ok(PhotoPaths(paths))
    }
}
