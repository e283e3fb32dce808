use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability manifest exchanged between peers during API negotiation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub version: Value,
    #[serde(default)]
    pub evts: BTreeMap<String, EventShape>,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodShape>,
}

/// Declared shape of an event a peer emits.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Methods whose data this event updates, when tied to methods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

/// Declared request/response shapes of a callable method.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp: Option<Value>,
}

impl ApiDescriptor {
    pub fn is_empty(&self) -> bool {
        self.evts.is_empty() && self.methods.is_empty()
    }

    /// Fields with default values when the event declares a `data` object.
    pub fn event_defaults(&self, evt: &str) -> Option<&serde_json::Map<String, Value>> {
        self.evts.get(evt)?.data.as_ref()?.as_object()
    }
}

impl MethodShape {
    /// Initial response slot: an empty array for list responses, else an object.
    pub fn empty_response(&self) -> Value {
        match &self.resp {
            Some(Value::Array(_)) => Value::Array(Vec::new()),
            _ => Value::Object(serde_json::Map::new()),
        }
    }
}
