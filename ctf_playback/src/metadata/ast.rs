//! Syntax tree handed over by the TSDL grammar front end.
//!
//! The tree is purely syntactic: names are unresolved and property values
//! are raw literals. It derives serde so a front end in another process can
//! ship it as JSON.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Declaration {
    Trace(Vec<BlockEntry>),
    Stream(Vec<BlockEntry>),
    Event(Vec<BlockEntry>),
    Clock(Vec<BlockEntry>),
    Env(Vec<BlockEntry>),
    Callsite(Vec<BlockEntry>),
    Type(TypeDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockEntry {
    /// `name = value;`
    Property { name: String, value: PropertyValue },
    /// `name := type;`
    TypeAssignment { name: String, ty: TypeSpecifier },
    Type(TypeDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Int(i64),
    #[serde(rename = "uint")]
    UInt(u64),
    String(String),
    /// Bare identifiers and dotted names: `le`, `true`, `clock.monotonic.value`.
    Identifier(String),
}

impl PropertyValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::UInt(value) => Some(*value),
            PropertyValue::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(value) => Some(*value),
            PropertyValue::UInt(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            PropertyValue::Int(value) => Some(i128::from(*value)),
            PropertyValue::UInt(value) => Some(i128::from(*value)),
            _ => None,
        }
    }

    /// Identifier or string text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::String(text) | PropertyValue::Identifier(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Identifier(text) | PropertyValue::String(text) => {
                match text.as_str() {
                    "true" | "TRUE" => Some(true),
                    "false" | "FALSE" => Some(false),
                    _ => None,
                }
            }
            PropertyValue::Int(1) | PropertyValue::UInt(1) => Some(true),
            PropertyValue::Int(0) | PropertyValue::UInt(0) => Some(false),
            _ => None,
        }
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::UInt(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Identifier(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDeclaration {
    /// `typealias <target> := <name>;`
    Alias { target: TypeSpecifier, name: String },
    /// `typedef <ty> <name>[dims];`
    Typedef {
        ty: TypeSpecifier,
        name: String,
        #[serde(default)]
        dims: Vec<ArrayDimension>,
    },
    /// A bare `struct foo { ... };`, `enum bar : int { ... };` or
    /// `variant baz { ... };`.
    Named(TypeSpecifier),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpecifier {
    Integer(Vec<Attribute>),
    FloatingPoint(Vec<Attribute>),
    String(Vec<Attribute>),
    Struct {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        body: Option<Vec<StructEntry>>,
        #[serde(default)]
        align: Option<u64>,
    },
    Variant {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        body: Option<Vec<StructEntry>>,
    },
    Enum {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        container: Option<Box<TypeSpecifier>>,
        #[serde(default)]
        body: Option<Vec<Enumerator>>,
    },
    /// Reference to a typealias/typedef name, e.g. `uint32_t`.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructEntry {
    Field(FieldDeclaration),
    Type(TypeDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    pub ty: TypeSpecifier,
    pub name: String,
    #[serde(default)]
    pub dims: Vec<ArrayDimension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayDimension {
    Fixed(u64),
    /// Field reference expression, e.g. `len` or `event.context.n`.
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumerator {
    pub label: String,
    #[serde(default)]
    pub value: Option<EnumeratorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumeratorValue {
    Single(PropertyValue),
    /// Inclusive `start ... stop`.
    Range(PropertyValue, PropertyValue),
}

// Builders used by front ends and tests.

impl TypeSpecifier {
    pub fn named(name: &str) -> Self {
        TypeSpecifier::Named(name.to_string())
    }

    pub fn integer(attrs: &[(&str, PropertyValue)]) -> Self {
        TypeSpecifier::Integer(attributes(attrs))
    }

    pub fn floating_point(attrs: &[(&str, PropertyValue)]) -> Self {
        TypeSpecifier::FloatingPoint(attributes(attrs))
    }

    pub fn string() -> Self {
        TypeSpecifier::String(Vec::new())
    }

    pub fn anonymous_struct(fields: Vec<StructEntry>) -> Self {
        TypeSpecifier::Struct {
            name: None,
            body: Some(fields),
            align: None,
        }
    }

    pub fn struct_ref(name: &str) -> Self {
        TypeSpecifier::Struct {
            name: Some(name.to_string()),
            body: None,
            align: None,
        }
    }

    pub fn variant(tag: &str, options: Vec<StructEntry>) -> Self {
        TypeSpecifier::Variant {
            name: None,
            tag: Some(tag.to_string()),
            body: Some(options),
        }
    }

    pub fn enumeration(container: TypeSpecifier, body: Vec<Enumerator>) -> Self {
        TypeSpecifier::Enum {
            name: None,
            container: Some(Box::new(container)),
            body: Some(body),
        }
    }
}

fn attributes(attrs: &[(&str, PropertyValue)]) -> Vec<Attribute> {
    attrs
        .iter()
        .map(|(name, value)| Attribute {
            name: (*name).to_string(),
            value: value.clone(),
        })
        .collect()
}

impl StructEntry {
    pub fn field(ty: TypeSpecifier, name: &str) -> Self {
        StructEntry::Field(FieldDeclaration {
            ty,
            name: name.to_string(),
            dims: Vec::new(),
        })
    }

    pub fn array(ty: TypeSpecifier, name: &str, dims: Vec<ArrayDimension>) -> Self {
        StructEntry::Field(FieldDeclaration {
            ty,
            name: name.to_string(),
            dims,
        })
    }
}

impl BlockEntry {
    pub fn property(name: &str, value: impl Into<PropertyValue>) -> Self {
        BlockEntry::Property {
            name: name.to_string(),
            value: value.into(),
        }
    }

    pub fn string_property(name: &str, value: &str) -> Self {
        BlockEntry::Property {
            name: name.to_string(),
            value: PropertyValue::String(value.to_string()),
        }
    }

    pub fn assign(name: &str, ty: TypeSpecifier) -> Self {
        BlockEntry::TypeAssignment {
            name: name.to_string(),
            ty,
        }
    }
}

impl Enumerator {
    pub fn auto(label: &str) -> Self {
        Self {
            label: label.to_string(),
            value: None,
        }
    }

    pub fn value(label: &str, value: i64) -> Self {
        Self {
            label: label.to_string(),
            value: Some(EnumeratorValue::Single(PropertyValue::Int(value))),
        }
    }

    pub fn range(label: &str, start: i64, stop: i64) -> Self {
        Self {
            label: label.to_string(),
            value: Some(EnumeratorValue::Range(
                PropertyValue::Int(start),
                PropertyValue::Int(stop),
            )),
        }
    }
}

pub fn typealias(target: TypeSpecifier, name: &str) -> Declaration {
    Declaration::Type(TypeDeclaration::Alias {
        target,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn test_property_value__bool_spellings__then_parsed() {
        assert_eq!(PropertyValue::from("true").as_bool(), Some(true));
        assert_eq!(PropertyValue::UInt(0).as_bool(), Some(false));
        assert_eq!(PropertyValue::from("maybe").as_bool(), None);
    }

    #[test]
    fn test_property_value__negative__then_not_unsigned() {
        assert_eq!(PropertyValue::Int(-1).as_u64(), None);
        assert_eq!(PropertyValue::Int(-1).as_i128(), Some(-1));
        assert_eq!(PropertyValue::UInt(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_metadata__json_round_trip__then_equal() {
        let metadata = Metadata {
            declarations: vec![
                typealias(
                    TypeSpecifier::integer(&[("size", 8u64.into()), ("signed", "false".into())]),
                    "uint8_t",
                ),
                Declaration::Trace(vec![BlockEntry::property("byte_order", "le")]),
            ],
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_metadata__hand_written_json__then_defaults_filled() {
        let json = r#"{
            "declarations": [
                { "event": [
                    { "property": { "name": "name", "value": { "string": "sched_switch" } } },
                    { "type_assignment": { "name": "fields", "ty": { "struct": {
                        "body": [ { "field": { "ty": { "named": "uint8_t" }, "name": "cpu" } } ]
                    } } } }
                ] }
            ]
        }"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        match &metadata.declarations[0] {
            Declaration::Event(entries) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected declaration: {other:?}"),
        }
    }
}
