//! Decoded field values. A value tree mirrors the shape of the
//! [`TypeDescriptor`](crate::types::TypeDescriptor) it was decoded with and is
//! never mutated once built.

use std::{fmt, sync::Arc};

use serde_json::{json, Map, Value};

use crate::types::{Base, IntegerType};

/// Integer of up to 64 bits. Signed values are stored sign-extended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerValue {
    raw: u64,
    descriptor: Arc<IntegerType>,
}

impl IntegerValue {
    pub fn new(raw: u64, descriptor: Arc<IntegerType>) -> Self {
        Self { raw, descriptor }
    }

    pub fn descriptor(&self) -> &IntegerType {
        &self.descriptor
    }

    pub fn is_signed(&self) -> bool {
        self.descriptor.signed
    }

    /// Bit pattern as read, sign-extended to 64 bits for signed types.
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Numeric value, lossless for both signed and unsigned 64-bit types.
    pub fn value(&self) -> i128 {
        if self.is_signed() {
            i128::from(self.raw as i64)
        } else {
            i128::from(self.raw)
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        u64::try_from(self.value()).ok()
    }

    pub fn as_i64(&self) -> Option<i64> {
        i64::try_from(self.value()).ok()
    }
}

impl fmt::Display for IntegerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_signed() {
            return write!(f, "{}", self.value());
        }
        match self.descriptor.base {
            Base::Binary => write!(f, "{:#b}", self.raw),
            Base::Octal => write!(f, "{:#o}", self.raw),
            Base::Decimal => write!(f, "{}", self.raw),
            Base::Hexadecimal => write!(f, "{:#x}", self.raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub integer: IntegerValue,
    /// `None` when no mapping range holds the value.
    pub label: Option<String>,
}

/// Struct fields in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    fields: Vec<(String, FieldValue)>,
}

impl StructValue {
    pub fn new(fields: Vec<(String, FieldValue)>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Integer (or enum) field `name`, looking through the selected option
    /// of any variant member when the struct itself has no such field.
    pub fn find_integer(&self, name: &str) -> Option<&IntegerValue> {
        let nested = self.fields.iter().rev().find_map(|(_, value)| match value {
            FieldValue::Variant(variant) => variant.value.as_struct()?.find_integer(name),
            _ => None,
        });
        nested.or_else(|| self.field(name).and_then(FieldValue::as_integer))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantValue {
    /// Label of the selected option.
    pub tag: String,
    pub value: Box<FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(IntegerValue),
    Float(f64),
    String(String),
    Enum(EnumValue),
    Array(Vec<FieldValue>),
    Struct(StructValue),
    Variant(VariantValue),
}

impl FieldValue {
    /// Integers and the integer behind an enum.
    pub fn as_integer(&self) -> Option<&IntegerValue> {
        match self {
            FieldValue::Integer(int) => Some(int),
            FieldValue::Enum(en) => Some(&en.integer),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            FieldValue::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Integer(int) => integer_json(int),
            FieldValue::Float(float) => json!(float),
            FieldValue::String(text) => json!(text),
            FieldValue::Enum(en) => json!({
                "value": integer_json(&en.integer),
                "label": en.label,
            }),
            FieldValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Struct(st) => st.to_json(),
            FieldValue::Variant(variant) => {
                let mut map = Map::new();
                map.insert(variant.tag.clone(), variant.value.to_json());
                Value::Object(map)
            }
        }
    }
}

impl StructValue {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

fn integer_json(int: &IntegerValue) -> Value {
    match (int.as_i64(), int.as_u64()) {
        (_, Some(unsigned)) => json!(unsigned),
        (Some(signed), None) => json!(signed),
        (None, None) => json!(int.to_string()),
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(int) => write!(f, "{int}"),
            FieldValue::Float(float) => write!(f, "{float}"),
            FieldValue::String(text) => write!(f, "{text:?}"),
            FieldValue::Enum(en) => match &en.label {
                Some(label) => write!(f, "( \"{label}\" : container = {} )", en.integer),
                None => write!(f, "( <unknown> : container = {} )", en.integer),
            },
            FieldValue::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " [{idx}] = {item}")?;
                }
                write!(f, " ]")
            }
            FieldValue::Struct(st) => write!(f, "{st}"),
            FieldValue::Variant(variant) => write!(f, "{{ {} = {} }}", variant.tag, variant.value),
        }
    }
}

impl fmt::Display for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (name, value)) in self.fields.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, " {name} = {value}")?;
        }
        write!(f, " }}")
    }
}
