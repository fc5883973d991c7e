//! Per-instance configuration.
//!
//! [`StoreConfig`] is the resolved configuration one store instance runs
//! with. [`StoreOptions`] is a partial update merged over it, built with
//! `typed-builder` or deserialized from JSON/TOML-shaped data.
//!
//! # Examples
//!
//! ```
//! use netabase_kv::config::{StoreConfig, StoreOptions};
//!
//! let options = StoreOptions::builder()
//!     .name("office")
//!     .store_name("staff list")
//!     .build();
//!
//! let config = StoreConfig::default().merge(options).unwrap();
//! assert_eq!(config.name, "office");
//! assert_eq!(config.store_name, "staff_list");
//! ```

use derive_more::From;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::errors::{KvError, KvResult};
use crate::registry::BuiltinDriver;

pub const DEFAULT_NAME: &str = "localforage";
pub const DEFAULT_STORE_NAME: &str = "keyvaluepairs";
/// Just under 5MB, the largest size browsers grant without prompting.
pub const DEFAULT_SIZE: u64 = 4_980_736;
pub const DEFAULT_VERSION: f64 = 1.0;

/// Which driver(s) an instance should use, in order of preference.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DriverPreference {
    One(String),
    Ordered(Vec<String>),
    /// Anything else, e.g. an object in a config file. Never matches a driver.
    #[from(ignore)]
    Unrecognized(serde_json::Value),
}

impl DriverPreference {
    /// The built-in default order.
    pub fn default_order() -> Self {
        DriverPreference::Ordered(
            BuiltinDriver::default_order()
                .iter()
                .map(|d| d.to_string())
                .collect(),
        )
    }

    /// Candidate driver names in preference order.
    pub fn candidates(&self) -> Vec<String> {
        match self {
            DriverPreference::One(name) => vec![name.clone()],
            DriverPreference::Ordered(names) => names.clone(),
            DriverPreference::Unrecognized(_) => Vec::new(),
        }
    }
}

impl From<&str> for DriverPreference {
    fn from(name: &str) -> Self {
        DriverPreference::One(name.to_string())
    }
}

impl From<BuiltinDriver> for DriverPreference {
    fn from(driver: BuiltinDriver) -> Self {
        DriverPreference::One(driver.to_string())
    }
}

impl From<Vec<&str>> for DriverPreference {
    fn from(names: Vec<&str>) -> Self {
        DriverPreference::Ordered(names.into_iter().map(str::to_string).collect())
    }
}

/// Resolved configuration of one store instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Logical database name.
    pub name: String,
    /// Sub-store (table / tree / prefix) name.
    pub store_name: String,
    /// Schema version.
    pub version: f64,
    /// Size hint in bytes, honoured by the relational backend.
    pub size: u64,
    pub description: String,
    pub driver: DriverPreference,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            version: DEFAULT_VERSION,
            size: DEFAULT_SIZE,
            description: String::new(),
            driver: DriverPreference::default_order(),
        }
    }
}

impl StoreConfig {
    /// Apply `options` over this configuration, validating the result.
    pub fn merge(&self, options: StoreOptions) -> KvResult<Self> {
        let mut config = self.clone();
        if let Some(name) = options.name {
            config.name = name;
        }
        if let Some(store_name) = options.store_name {
            config.store_name = sanitize_store_name(&store_name);
        }
        if let Some(version) = options.version {
            config.version = version;
        }
        if let Some(size) = options.size {
            config.size = size;
        }
        if let Some(description) = options.description {
            config.description = description;
        }
        if let Some(driver) = options.driver {
            config.driver = driver;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KvResult<()> {
        if !self.version.is_finite() || self.version <= 0.0 {
            return Err(KvError::Config("Database version must be a number.".to_string()));
        }
        if self.name.is_empty() {
            return Err(KvError::Config("Database name must not be empty.".to_string()));
        }
        if self.store_name.is_empty() {
            return Err(KvError::Config("Store name must not be empty.".to_string()));
        }
        Ok(())
    }

    /// Look up a single option by its camelCase name.
    pub fn value(&self, option: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map.remove(option),
            _ => None,
        }
    }

    /// Integral schema version, as engines with integer versions see it.
    pub fn integral_version(&self) -> u64 {
        self.version.trunc() as u64
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_store_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A database name as a single path segment.
///
/// Names made only of `[A-Za-z0-9_-]` are kept as they are. Anything else is
/// hex-encoded behind an `x.` marker; `.` never appears in a kept name, so
/// two distinct names never share a segment.
pub fn encode_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        name.to_string()
    } else {
        format!("x.{}", hex::encode(name))
    }
}

/// A partial configuration update.
#[derive(Debug, Clone, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreOptions {
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub store_name: Option<String>,
    #[builder(default, setter(strip_option))]
    pub version: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub size: Option<u64>,
    #[builder(default, setter(strip_option, into))]
    pub description: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub driver: Option<DriverPreference>,
}

/// Target of a [`drop_instance`](crate::KvStore::drop_instance) call.
///
/// With only `name` set the whole database goes; with `store_name` too,
/// just that store.
#[derive(Debug, Clone, Default, PartialEq, TypedBuilder)]
#[builder(doc)]
pub struct DropOptions {
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub store_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.name, "localforage");
        assert_eq!(config.store_name, "keyvaluepairs");
        assert_eq!(config.size, 4_980_736);
        assert_eq!(
            config.driver.candidates(),
            vec!["structured", "relational", "flat"]
        );
    }

    #[test]
    fn merge_overrides_only_given_fields() {
        let base = StoreConfig::default();
        let merged = base
            .merge(StoreOptions::builder().version(2.0).build())
            .unwrap();
        assert_eq!(merged.version, 2.0);
        assert_eq!(merged.name, base.name);
    }

    #[test]
    fn invalid_version_is_rejected() {
        let res = StoreConfig::default().merge(StoreOptions::builder().version(f64::NAN).build());
        assert!(matches!(res, Err(KvError::Config(_))));
    }

    #[test]
    fn store_name_is_sanitized() {
        assert_eq!(sanitize_store_name("my-store.v2"), "my_store_v2");
    }

    #[test]
    fn names_encode_to_distinct_segments() {
        assert_eq!(encode_name("localforage"), "localforage");
        assert_eq!(encode_name("team-7_a"), "team-7_a");
        assert_eq!(encode_name("a/b"), "x.612f62");
        assert_eq!(encode_name("../escaped"), "x.2e2e2f65736361706564");
        assert_ne!(encode_name("x.612f62"), encode_name("a/b"));
        assert!(!encode_name("team/alpha").contains('/'));
    }

    #[test]
    fn preference_from_json_shapes() {
        let one: DriverPreference = serde_json::from_str("\"flat\"").unwrap();
        assert_eq!(one.candidates(), vec!["flat"]);
        let many: DriverPreference = serde_json::from_str("[\"a\",\"flat\"]").unwrap();
        assert_eq!(many.candidates(), vec!["a", "flat"]);
        let object: DriverPreference = serde_json::from_str("{\"driver\":\"flat\"}").unwrap();
        assert!(object.candidates().is_empty());
    }

    #[test]
    fn options_deserialize_camel_case() {
        let options: StoreOptions =
            serde_json::from_str(r#"{"storeName":"staff","driver":"memory"}"#).unwrap();
        assert_eq!(options.store_name.as_deref(), Some("staff"));
        assert_eq!(options.driver, Some(DriverPreference::One("memory".into())));
    }

    #[test]
    fn single_option_lookup() {
        let config = StoreConfig::default();
        assert_eq!(
            config.value("storeName"),
            Some(serde_json::Value::String("keyvaluepairs".into()))
        );
        assert_eq!(config.value("nope"), None);
    }
}
