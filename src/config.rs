//! Pipeline configuration.
//!
//! A [`Config`] wraps an already parsed JSON document. The top level names the passes
//! to run and the property bookkeeping of the pipeline; every other key holds the
//! options of the pass with that name:
//!
//! ```json
//! {
//!   "passes": ["ReduceSparseSwitchesPass", "InstructionSequenceOutlinerPass"],
//!   "final_properties": ["DexLimitsObeyed"],
//!   "verify_cfg_edits": true,
//!   "ReduceSparseSwitchesPass": { "max_expanded_switch_cases": 4 }
//! }
//! ```
//!
//! Passes read their options through a [`ConfigView`], which deserialises the pass'
//! object into a `#[serde(default)]` options struct.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{pass::Property, Error, Result};

/// Properties established before the first pass when the configuration does not say
/// otherwise.
pub const DEFAULT_INITIAL_PROPERTIES: [Property; 4] = [
    Property::HasSourceBlocks,
    Property::NoInitClassInstructions,
    Property::DexLimitsObeyed,
    Property::InitialRenameClass,
];

/// The configuration of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Map<String, Value>,
}

impl Config {
    /// Wraps a parsed document. `null` is treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is neither an object nor `null`.
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Config { root }),
            Value::Null => Ok(Config::default()),
            other => Err(Error::Config(format!(
                "the configuration must be an object, found {other}"
            ))),
        }
    }

    /// Reads a top-level key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value does not deserialise into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.root
            .get(key)
            .map(|v| {
                T::deserialize(v).map_err(|e| Error::Config(format!("'{key}': {e}")))
            })
            .transpose()
    }

    /// The ordered pass names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `passes` is not a list of strings.
    pub fn passes(&self) -> Result<Vec<String>> {
        Ok(self.get("passes")?.unwrap_or_default())
    }

    /// Properties established before the first pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown property name.
    pub fn initial_properties(&self) -> Result<Vec<Property>> {
        match self.get::<Vec<String>>("initial_properties")? {
            Some(names) => parse_properties(&names),
            None => Ok(DEFAULT_INITIAL_PROPERTIES.to_vec()),
        }
    }

    /// Properties that must be established when the pipeline ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown property name.
    pub fn final_properties(&self) -> Result<Vec<Property>> {
        parse_properties(&self.get::<Vec<String>>("final_properties")?.unwrap_or_default())
    }

    /// Whether CFG invariants are rechecked after every pass.
    #[must_use]
    pub fn verify_cfg_edits(&self) -> bool {
        self.root
            .get("verify_cfg_edits")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The options of the pass called `pass`.
    #[must_use]
    pub fn view<'a>(&'a self, pass: &'a str) -> ConfigView<'a> {
        ConfigView {
            pass,
            value: self.root.get(pass),
        }
    }
}

fn parse_properties(names: &[String]) -> Result<Vec<Property>> {
    names
        .iter()
        .map(|name| {
            Property::from_str(name)
                .map_err(|_| Error::Config(format!("unknown property '{name}'")))
        })
        .collect()
}

/// The options object of a single pass.
#[derive(Debug, Clone, Copy)]
pub struct ConfigView<'a> {
    pass: &'a str,
    value: Option<&'a Value>,
}

impl<'a> ConfigView<'a> {
    /// A view with no options, for passes constructed outside a configuration.
    #[must_use]
    pub fn empty(pass: &'a str) -> Self {
        ConfigView { pass, value: None }
    }

    /// The pass this view belongs to.
    #[must_use]
    pub fn pass(&self) -> &str {
        self.pass
    }

    /// `true` if the configuration has an options object for the pass.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Deserialises the whole options object, falling back to `T::default()` when the
    /// pass has none. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a known key has the wrong type.
    pub fn bind<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match self.value {
            None => Ok(T::default()),
            Some(v) => {
                T::deserialize(v).map_err(|e| Error::Config(format!("{}: {e}", self.pass)))
            }
        }
    }

    /// Reads a single option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the option has the wrong type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.value
            .and_then(|v| v.get(key))
            .map(|v| {
                T::deserialize(v)
                    .map_err(|e| Error::Config(format!("{}.{key}: {e}", self.pass)))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Options {
        limit: usize,
        enabled: bool,
    }

    #[test]
    fn binds_pass_options() -> Result<()> {
        let config = Config::new(json!({
            "passes": ["A", "B"],
            "A": { "limit": 7, "unknown": "ignored" },
            "B": { "limit": "seven" }
        }))?;
        assert_eq!(config.passes()?, vec!["A".to_string(), "B".to_string()]);

        let a: Options = config.view("A").bind()?;
        assert_eq!(a, Options { limit: 7, enabled: false });

        let missing: Options = config.view("C").bind()?;
        assert_eq!(missing, Options::default());

        assert!(matches!(config.view("B").bind::<Options>(), Err(Error::Config(_))));
        assert_eq!(config.view("A").get::<usize>("limit")?, Some(7));
        Ok(())
    }

    #[test]
    fn properties_and_defaults() -> Result<()> {
        let config = Config::new(Value::Null)?;
        assert_eq!(config.initial_properties()?, DEFAULT_INITIAL_PROPERTIES.to_vec());
        assert!(config.final_properties()?.is_empty());
        assert!(!config.verify_cfg_edits());

        let config = Config::new(json!({
            "initial_properties": [],
            "final_properties": ["DexLimitsObeyed"],
            "verify_cfg_edits": true
        }))?;
        assert!(config.initial_properties()?.is_empty());
        assert_eq!(config.final_properties()?, vec![Property::DexLimitsObeyed]);
        assert!(config.verify_cfg_edits());

        let bad = Config::new(json!({ "final_properties": ["NoSuchThing"] }))?;
        assert!(bad.final_properties().is_err());
        assert!(Config::new(json!([1, 2])).is_err());
        Ok(())
    }
}
