//! Embedded flows
//!
//! A job of type `flow` runs another flow of the same project in place. Its
//! own options are passed down to every job of the embedded flow, so one flow
//! can run in several variants. Values that differ per variant ("mode") are
//! declared once in [`FlowProperties`]; jobs reference them through a
//! `${flow.property.N}` placeholder and each embedding job supplies the
//! values of its mode.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use super::{Job, JobHooks, TYPE_KEY};
use crate::options::{Options, OptionsError};
use crate::project::{Project, ProjectError};

/// Job type of an embedded flow.
pub const FLOW_TYPE: &str = "flow";

/// Option naming the embedded flow.
pub const FLOW_NAME_KEY: &str = "flow.name";

const PROPERTY_PREFIX: &str = "flow.property";

/// Registry of per-mode property values
///
/// Clones share the registry, so properties defined after a subflow job was
/// created are still picked up when the project is built.
#[derive(Debug, Clone, Default)]
pub struct FlowProperties {
    values: Arc<RwLock<Vec<BTreeMap<String, Value>>>>,
}

impl FlowProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property with one value per mode.
    pub fn define<K, V>(&self, values: impl IntoIterator<Item = (K, V)>) -> FlowProperty
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut registry = self.write();
        let key = format!("{}.{}", PROPERTY_PREFIX, registry.len());
        registry.push(
            values
                .into_iter()
                .map(|(mode, value)| (mode.into(), value.into()))
                .collect(),
        );
        FlowProperty { key }
    }

    /// Values of every property defined for `mode`, keyed by property key.
    pub fn for_mode(&self, mode: &str) -> Options {
        self.read()
            .iter()
            .enumerate()
            .filter_map(|(index, values)| {
                values
                    .get(mode)
                    .map(|value| (format!("{}.{}", PROPERTY_PREFIX, index), value.clone()))
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BTreeMap<String, Value>>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BTreeMap<String, Value>>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle on a declared property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowProperty {
    key: String,
}

impl FlowProperty {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `${flow.property.N}`, resolved by the server from the embedding job.
    pub fn placeholder(&self) -> String {
        format!("${{{}}}", self.key)
    }
}

impl fmt::Display for FlowProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.placeholder())
    }
}

/// Serializes as its placeholder, so a property can be used directly as an
/// option value.
impl Serialize for FlowProperty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.placeholder())
    }
}

/// Adds the property values of one mode to an embedding job at build time.
#[derive(Debug, Clone)]
pub struct Subflow {
    mode: String,
    properties: FlowProperties,
}

impl JobHooks for Subflow {
    fn on_build(
        &self,
        _project: &Project,
        name: &str,
        options: &mut Options,
    ) -> Result<(), ProjectError> {
        let values = self.properties.for_mode(&self.mode);
        log::debug!(
            "job '{}' embeds mode '{}' with {} properties",
            name,
            self.mode,
            values.len()
        );
        options.extend(values);
        Ok(())
    }
}

impl Job {
    /// A job embedding the flow rooted at `flow`. `type` and `flow.name` are
    /// forced over whatever `layers` set.
    pub fn subflow(flow: impl Into<String>, mut layers: Vec<Value>) -> Result<Self, OptionsError> {
        let flow: String = flow.into();
        layers.push(json!({ TYPE_KEY: FLOW_TYPE, FLOW_NAME_KEY: flow }));
        Job::new(layers)
    }

    /// Like [`Job::subflow`], also passing down the values `properties`
    /// holds for `mode` when the project is built.
    pub fn subflow_mode(
        flow: impl Into<String>,
        mode: impl Into<String>,
        properties: &FlowProperties,
        layers: Vec<Value>,
    ) -> Result<Self, OptionsError> {
        let hooks = Subflow {
            mode: mode.into(),
            properties: properties.clone(),
        };
        Ok(Self::subflow(flow, layers)?.with_hooks(Arc::new(hooks)))
    }
}
