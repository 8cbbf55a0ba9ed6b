//! Read-only view over PICS KeyValue product descriptors.
//!
//! The remote side hands out nested `{name, value, children}` nodes. We materialise
//! them once into a [`KeyValueTree`] whose children keep their original order and can
//! be looked up by name. Lookups that miss are errors, never defaults.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw descriptor node as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<KeyValue>,
}

impl KeyValue {
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            children: Vec::new(),
        }
    }

    pub fn node(name: impl Into<String>, children: Vec<KeyValue>) -> Self {
        Self {
            name: name.into(),
            value: None,
            children,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyValueError {
    #[error("key `{key}` not found under `{parent}`")]
    NotFound { parent: String, key: String },
    #[error("value `{value}` at `{key}` is malformed: {reason}")]
    Malformed {
        key: String,
        value: String,
        reason: String,
    },
}

/// Immutable tree built from a [`KeyValue`] descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueTree {
    name: String,
    value: String,
    children: IndexMap<String, KeyValueTree>,
}

impl KeyValueTree {
    /// Duplicate sibling names collapse to the last occurrence; the slot keeps the
    /// position of the first one.
    pub fn from_descriptor(kv: &KeyValue) -> Self {
        let mut children = IndexMap::with_capacity(kv.children.len());
        for child in &kv.children {
            children.insert(child.name.clone(), KeyValueTree::from_descriptor(child));
        }
        Self {
            name: kv.name.clone(),
            value: kv.value.clone().unwrap_or_default(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn has(&self, key: &str) -> bool {
        self.children.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&KeyValueTree, KeyValueError> {
        self.children.get(key).ok_or_else(|| KeyValueError::NotFound {
            parent: self.name.clone(),
            key: key.to_string(),
        })
    }

    /// Follows `segments` one child at a time; fails on the first missing segment.
    pub fn path(&self, segments: &[&str]) -> Result<&KeyValueTree, KeyValueError> {
        segments.iter().try_fold(self, |node, seg| node.get(seg))
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &KeyValueTree)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn first_child(&self) -> Option<(&str, &KeyValueTree)> {
        self.children.first().map(|(k, v)| (k.as_str(), v))
    }

    /// Parses the leaf at `segments` with `FromStr`, reporting the failing key.
    pub fn parse_at<T>(&self, segments: &[&str]) -> Result<T, KeyValueError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let leaf = self.path(segments)?;
        leaf.value.trim().parse::<T>().map_err(|e| KeyValueError::Malformed {
            key: segments.join("/"),
            value: leaf.value.clone(),
            reason: e.to_string(),
        })
    }
}

impl From<&KeyValue> for KeyValueTree {
    fn from(kv: &KeyValue) -> Self {
        KeyValueTree::from_descriptor(kv)
    }
}
