//! Interchange graph nodes

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute attached to a node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Single integer
    Int(i64),
    /// Integer list
    Ints(Vec<i64>),
    /// Single real
    Float(f64),
    /// Real list
    Floats(Vec<f64>),
    /// String
    String(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Ints(v) => write!(f, "{:?}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Floats(v) => write!(f, "{:?}", v),
            AttributeValue::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(v: Vec<i64>) -> Self {
        AttributeValue::Ints(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(v: Vec<f64>) -> Self {
        AttributeValue::Floats(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

/// An operator node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnnxNode {
    /// Operator type, e.g. `Conv`
    pub op_type: String,
    /// Input tensor names
    pub inputs: Vec<String>,
    /// Output tensor names
    pub outputs: Vec<String>,
    /// Attributes by name
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl OnnxNode {
    /// Builder-style attribute setter
    pub fn attr(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Attribute by name
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Create a node with no attributes
pub fn make_node<I, O>(op_type: &str, inputs: I, outputs: O) -> OnnxNode
where
    I: IntoIterator,
    I::Item: Into<String>,
    O: IntoIterator,
    O::Item: Into<String>,
{
    OnnxNode {
        op_type: op_type.to_string(),
        inputs: inputs.into_iter().map(Into::into).collect(),
        outputs: outputs.into_iter().map(Into::into).collect(),
        attributes: BTreeMap::new(),
    }
}
