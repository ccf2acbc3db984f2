//! Typed view of product and director properties.
//!
//! The server speaks loosely shaped JSON. Properties are one of three things:
//! a scalar, a map of further properties, or a collection of maps whose
//! entries may carry a server-assigned `guid`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field under which collection entries carry their server identifier
pub const GUID_FIELD: &str = "guid";

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum PropertyValue {
    /// Strings, numbers, booleans, null and arrays of non-objects
    Scalar(Value),
    Map(BTreeMap<String, PropertyValue>),
    /// A non-empty array whose entries are all objects
    Collection(Vec<CollectionItem>),
}

/// One entry of a collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollectionItem {
    pub guid: Option<String>,
    pub fields: BTreeMap<String, PropertyValue>,
}

impl CollectionItem {
    #[must_use]
    pub fn new(fields: BTreeMap<String, PropertyValue>) -> Self {
        Self { guid: None, fields }
    }

    fn from_object(object: serde_json::Map<String, Value>) -> Self {
        let mut fields = BTreeMap::new();
        let mut guid = None;
        for (key, value) in object {
            if key == GUID_FIELD {
                guid = guid_of(&value);
                if guid.is_some() {
                    continue;
                }
            }
            fields.insert(key, PropertyValue::from(value));
        }
        Self { guid, fields }
    }

    fn into_object(self) -> serde_json::Map<String, Value> {
        let mut object: serde_json::Map<String, Value> = self
            .fields
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect();
        if let Some(guid) = self.guid {
            object.insert(GUID_FIELD.to_owned(), Value::String(guid));
        }
        object
    }
}

/// `"g1"` or `{"value": "g1", ...}`
fn guid_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(envelope) => envelope.get("value").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(object) => Self::Map(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                Self::Collection(
                    items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(object) => Some(CollectionItem::from_object(object)),
                            _ => None,
                        })
                        .collect(),
                )
            }
            other => Self::Scalar(other),
        }
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Scalar(value) => value,
            PropertyValue::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
            PropertyValue::Collection(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| Value::Object(item.into_object()))
                    .collect(),
            ),
        }
    }
}

impl PropertyValue {
    #[must_use]
    pub fn as_collection(&self) -> Option<&[CollectionItem]> {
        match self {
            Self::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// The collection held by this value, either directly or under a
    /// `{"value": [...]}` envelope.
    pub fn collection_mut(&mut self) -> Option<&mut Vec<CollectionItem>> {
        match self {
            Self::Collection(items) => Some(items),
            Self::Map(map) => match map.get_mut("value") {
                Some(Self::Collection(items)) => Some(items),
                _ => None,
            },
            Self::Scalar(_) => None,
        }
    }

    /// Strips `{"value": x, "configurable": .., ...}` envelopes, dropping
    /// entries the server marks as not configurable.
    ///
    /// Returns `None` for a non-configurable envelope.
    #[must_use]
    pub fn unwrapped(&self) -> Option<Value> {
        match self {
            Self::Map(map) if map.contains_key("value") => {
                if let Some(Self::Scalar(Value::Bool(false))) = map.get("configurable") {
                    return None;
                }
                map.get("value").map(|v| Value::from(v.clone()))
            }
            other => Some(Value::from(other.clone())),
        }
    }
}

/// A property as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseProperty {
    #[serde(default = "null_value")]
    pub value: PropertyValue,

    #[serde(default)]
    pub configurable: bool,

    #[serde(default)]
    pub credential: bool,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,

    #[serde(default)]
    pub optional: bool,
}

fn null_value() -> PropertyValue {
    PropertyValue::Scalar(Value::Null)
}

impl ResponseProperty {
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.kind == "collection"
    }
}

/// Property name to property, ordered by name
pub type PropertyMap = BTreeMap<String, PropertyValue>;
