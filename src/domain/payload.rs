//! JSON report schema.
//!
//! Two report versions exist. Version 1 groups raw calls by interface under
//! `interfaces`; version 2 carries a flat `calls` list. Call bodies are kept
//! as raw JSON objects here and normalized by [`crate::domain::call`].

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use time::PrimitiveDateTime;
use time::macros::format_description;

use crate::common::ImportError;

/// A raw call object as found in the report.
pub type RawCall = Map<String, Value>;

/// Schema version of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadVersion {
    V1,
    V2,
}

impl TryFrom<u64> for PayloadVersion {
    type Error = ImportError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PayloadVersion::V1),
            2 => Ok(PayloadVersion::V2),
            other => Err(ImportError::UnsupportedVersion(other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildPayload {
    #[serde(default = "default_version", deserialize_with = "version_number")]
    pub version: u64,
    pub time: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub tests: Vec<TestPayload>,
}

fn default_version() -> u64 {
    1
}

/// Versions arrive as numbers, or as numeric strings from older emitters.
fn version_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Number(u64),
        Text(String),
    }

    match Version::deserialize(deserializer)? {
        Version::Number(n) => Ok(n),
        Version::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid version {text:?}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestPayload {
    /// Dotted test identifier, e.g. `tests.api.test_login`.
    pub id: String,
    #[serde(default)]
    pub doc: Option<String>,
    pub duration: f64,
    /// Version 1: interface tag -> calls.
    #[serde(default)]
    pub interfaces: BTreeMap<String, Vec<RawCall>>,
    /// Version 2: flat call list.
    #[serde(default)]
    pub calls: Vec<RawCall>,
}

impl BuildPayload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ImportError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn schema_version(&self) -> Result<PayloadVersion, ImportError> {
        PayloadVersion::try_from(self.version)
    }

    /// Parse the build timestamp (`2012-05-16T03:43:59.23`, fraction optional).
    pub fn timestamp(&self) -> Result<PrimitiveDateTime, ImportError> {
        parse_timestamp(&self.time)
    }
}

impl TestPayload {
    pub fn description(&self) -> String {
        self.doc.as_deref().unwrap_or("").trim().to_string()
    }
}

pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, ImportError> {
    let with_fraction =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
    let without_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    PrimitiveDateTime::parse(value, with_fraction)
        .or_else(|_| PrimitiveDateTime::parse(value, without_fraction))
        .map_err(|e| ImportError::InvalidTimestamp {
            value: value.to_string(),
            detail: e.to_string(),
        })
}
