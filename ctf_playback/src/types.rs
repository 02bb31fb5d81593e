//! Compiled, fully resolved type descriptors.
//!
//! Nothing in here refers to a type by name: the compiler inlines every
//! reference, so the decoder can match exhaustively over [`TypeDescriptor`]
//! without consulting any scope.

use std::sync::Arc;

use crate::expr::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    None,
    Utf8,
    Ascii,
}

/// Preferred display base. Has no effect on decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Base {
    Binary,
    Octal,
    #[default]
    Decimal,
    Hexadecimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerType {
    pub size: u32,
    pub signed: bool,
    pub byte_order: ByteOrder,
    pub base: Base,
    /// Alignment in bits.
    pub alignment: u32,
    pub encoding: Encoding,
    /// Clock named by a `map = clock.<name>.value` attribute.
    pub mapped_clock: Option<String>,
}

impl IntegerType {
    pub fn unsigned(size: u32, byte_order: ByteOrder) -> Self {
        Self {
            size,
            signed: false,
            byte_order,
            base: Base::Decimal,
            alignment: default_alignment(size),
            encoding: Encoding::None,
            mapped_clock: None,
        }
    }

    pub fn signed(size: u32, byte_order: ByteOrder) -> Self {
        Self {
            signed: true,
            ..Self::unsigned(size, byte_order)
        }
    }

    /// 8-bit integers carrying a text encoding make up character arrays.
    pub fn is_character(&self) -> bool {
        self.size == 8 && self.encoding != Encoding::None
    }
}

/// Default alignment of integers and floats: byte aligned when the size is
/// a whole number of bytes, bit packed otherwise.
pub fn default_alignment(size: u32) -> u32 {
    if size % 8 == 0 {
        8
    } else {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatType {
    pub exponent_bits: u32,
    /// Includes the implicit leading bit, as TSDL's `mant_dig` does.
    pub mantissa_bits: u32,
    pub byte_order: ByteOrder,
    pub alignment: u32,
}

impl FloatType {
    pub fn size(&self) -> u32 {
        self.exponent_bits + self.mantissa_bits
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringType {
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Declaration order is decode order.
    pub fields: Vec<StructField>,
    pub alignment: u32,
}

impl StructType {
    /// Builds a struct whose alignment is the largest of `min_alignment`
    /// and every field's alignment.
    pub fn new(fields: Vec<StructField>, min_alignment: u32) -> Self {
        let alignment = fields
            .iter()
            .map(|field| field.ty.alignment())
            .fold(min_alignment.max(1), u32::max);
        Self { fields, alignment }
    }

    pub fn field(&self, name: &str) -> Option<&TypeDescriptor> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayLength {
    Fixed(u64),
    /// Length read from an already decoded integer field.
    Dynamic(FieldPath),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayType {
    pub element: Box<TypeDescriptor>,
    pub length: ArrayLength,
}

impl ArrayType {
    /// Character arrays decode to a single string value.
    pub fn is_text(&self) -> bool {
        matches!(self.element.as_ref(), TypeDescriptor::Integer(int) if int.is_character())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMapping {
    pub label: String,
    pub start: i128,
    /// Inclusive.
    pub end: i128,
}

impl EnumMapping {
    pub fn contains(&self, value: i128) -> bool {
        self.start <= value && value <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub container: Arc<IntegerType>,
    pub mappings: Vec<EnumMapping>,
}

impl EnumType {
    /// First mapping, in declaration order, whose range holds `value`.
    pub fn label_for(&self, value: i128) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.contains(value))
            .map(|mapping| mapping.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantType {
    /// `None` only while a named variant waits to be tagged at its use site.
    pub tag: Option<FieldPath>,
    pub options: Vec<StructField>,
}

impl VariantType {
    pub fn option(&self, label: &str) -> Option<&TypeDescriptor> {
        self.options
            .iter()
            .find(|option| option.name == label)
            .map(|option| &option.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    String(StringType),
    Integer(Arc<IntegerType>),
    Struct(StructType),
    Array(ArrayType),
    Enum(EnumType),
    Variant(VariantType),
    Float(FloatType),
}

impl TypeDescriptor {
    /// Alignment in bits applied before the value is read.
    pub fn alignment(&self) -> u32 {
        match self {
            TypeDescriptor::String(_) => 8,
            TypeDescriptor::Integer(int) => int.alignment,
            TypeDescriptor::Struct(st) => st.alignment,
            TypeDescriptor::Array(array) => array.element.alignment(),
            TypeDescriptor::Enum(en) => en.container.alignment,
            // A variant takes the alignment of whichever option is selected.
            TypeDescriptor::Variant(_) => 1,
            TypeDescriptor::Float(float) => float.alignment,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TypeDescriptor::String(_) => "string",
            TypeDescriptor::Integer(_) => "integer",
            TypeDescriptor::Struct(_) => "struct",
            TypeDescriptor::Array(_) => "array",
            TypeDescriptor::Enum(_) => "enum",
            TypeDescriptor::Variant(_) => "variant",
            TypeDescriptor::Float(_) => "floating_point",
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            TypeDescriptor::Struct(st) => Some(st),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn uint(size: u32) -> TypeDescriptor {
        TypeDescriptor::Integer(Arc::new(IntegerType::unsigned(size, ByteOrder::Little)))
    }

    #[test]
    fn test_default_alignment__byte_multiple__then_byte_aligned() {
        assert_eq!(default_alignment(32), 8);
        assert_eq!(default_alignment(5), 1);
        assert_eq!(IntegerType::unsigned(27, ByteOrder::Big).alignment, 1);
    }

    #[test]
    fn test_struct_type__mixed_fields__then_takes_largest_alignment() {
        let mut wide = IntegerType::unsigned(64, ByteOrder::Little);
        wide.alignment = 64;
        let st = StructType::new(
            vec![
                StructField { name: "a".into(), ty: uint(3) },
                StructField { name: "b".into(), ty: TypeDescriptor::Integer(Arc::new(wide)) },
            ],
            8,
        );
        assert_eq!(st.alignment, 64);
        assert!(st.field("b").is_some());
        assert!(st.field("c").is_none());
    }

    #[test]
    fn test_enum_label_for__ranges__then_first_match_or_none() {
        let en = EnumType {
            container: Arc::new(IntegerType::unsigned(8, ByteOrder::Little)),
            mappings: vec![
                EnumMapping { label: "OK".into(), start: 0, end: 0 },
                EnumMapping { label: "ERROR".into(), start: 1, end: 200 },
            ],
        };
        assert_eq!(en.label_for(0), Some("OK"));
        assert_eq!(en.label_for(5), Some("ERROR"));
        assert_eq!(en.label_for(201), None);
    }

    #[test]
    fn test_array_type__utf8_bytes__then_text() {
        let mut ch = IntegerType::unsigned(8, ByteOrder::Little);
        ch.encoding = Encoding::Utf8;
        let text = ArrayType {
            element: Box::new(TypeDescriptor::Integer(Arc::new(ch))),
            length: ArrayLength::Fixed(16),
        };
        let bytes = ArrayType {
            element: Box::new(uint(8)),
            length: ArrayLength::Fixed(16),
        };
        assert!(text.is_text());
        assert!(!bytes.is_text());
    }

    #[test]
    fn test_variant_alignment__then_deferred_to_option() {
        let variant = TypeDescriptor::Variant(VariantType {
            tag: None,
            options: vec![StructField { name: "x".into(), ty: uint(32) }],
        });
        assert_eq!(variant.alignment(), 1);
        assert_eq!(variant.kind(), "variant");
    }
}
