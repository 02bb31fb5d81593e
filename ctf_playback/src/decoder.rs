//! Recursive field decoder: walks a [`TypeDescriptor`] and reads the bits it
//! describes from a [`BitCursor`].
//!
//! Every compound value is committed into the [`DecodeContext`] as soon as it
//! is complete, so array lengths and variant tags further down the record can
//! refer back to it.

use tracing::trace;

use crate::{
    cursor::BitCursor,
    error::{PlaybackError, PlaybackResult},
    expr::{DecodeContext, PathRoot, ScopeValues},
    types::{ArrayLength, ArrayType, EnumType, FloatType, StructType, TypeDescriptor, VariantType},
    value::{EnumValue, FieldValue, IntegerValue, StructValue, VariantValue},
};

/// Caps up-front allocation for arrays whose length comes from the data.
const MAX_PREALLOCATED_ELEMENTS: u64 = 4096;

/// Decodes one well-known scope (a packet header, an event payload, ...)
/// rooted at `root`, with `scopes` holding the scopes already decoded for
/// the same packet and event.
pub fn decode_scope(
    cursor: &mut BitCursor<'_>,
    scopes: ScopeValues<'_>,
    root: PathRoot,
    ty: &StructType,
) -> PlaybackResult<StructValue> {
    let start = cursor.position();
    let mut ctx = DecodeContext::new(scopes, root);
    let value = decode_struct(cursor, &mut ctx, ty)?;
    trace!(
        scope = root.prefix(),
        fields = value.len(),
        bits = cursor.position() - start,
        "decoded scope"
    );
    Ok(value)
}

pub fn decode_struct(
    cursor: &mut BitCursor<'_>,
    ctx: &mut DecodeContext<'_>,
    ty: &StructType,
) -> PlaybackResult<StructValue> {
    cursor.align(ty.alignment);
    ctx.enter_struct();
    for field in &ty.fields {
        ctx.push_name(field.name.as_str());
        let value = decode_value(cursor, ctx, &field.ty);
        ctx.pop_name();
        match value {
            Ok(value) => ctx.commit(&field.name, value),
            Err(err) => {
                ctx.exit_struct();
                return Err(err);
            }
        }
    }
    Ok(ctx.exit_struct())
}

pub fn decode_value(
    cursor: &mut BitCursor<'_>,
    ctx: &mut DecodeContext<'_>,
    ty: &TypeDescriptor,
) -> PlaybackResult<FieldValue> {
    match ty {
        TypeDescriptor::Integer(int) => {
            cursor.align(int.alignment);
            let raw = cursor.read_bits(int.size, int.signed, int.byte_order, || ctx.field_path())?;
            Ok(FieldValue::Integer(IntegerValue::new(raw, int.clone())))
        }
        TypeDescriptor::Float(float) => decode_float(cursor, ctx, float),
        TypeDescriptor::String(_) => {
            cursor.align(8);
            let bytes = cursor.read_cstring(|| ctx.field_path())?;
            Ok(FieldValue::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        TypeDescriptor::Struct(st) => decode_struct(cursor, ctx, st).map(FieldValue::Struct),
        TypeDescriptor::Array(array) => decode_array(cursor, ctx, array),
        TypeDescriptor::Enum(en) => decode_enum(cursor, ctx, en),
        TypeDescriptor::Variant(variant) => decode_variant(cursor, ctx, variant),
    }
}

fn decode_float(
    cursor: &mut BitCursor<'_>,
    ctx: &DecodeContext<'_>,
    float: &FloatType,
) -> PlaybackResult<FieldValue> {
    cursor.align(float.alignment);
    let raw = cursor.read_bits(float.size(), false, float.byte_order, || ctx.field_path())?;
    let value = if float.size() == 32 {
        f64::from(f32::from_bits(raw as u32))
    } else {
        f64::from_bits(raw)
    };
    Ok(FieldValue::Float(value))
}

fn decode_enum(
    cursor: &mut BitCursor<'_>,
    ctx: &DecodeContext<'_>,
    en: &EnumType,
) -> PlaybackResult<FieldValue> {
    let container = &en.container;
    cursor.align(container.alignment);
    let raw = cursor.read_bits(container.size, container.signed, container.byte_order, || {
        ctx.field_path()
    })?;
    let integer = IntegerValue::new(raw, container.clone());
    let label = en.label_for(integer.value()).map(str::to_string);
    Ok(FieldValue::Enum(EnumValue { integer, label }))
}

fn decode_array(
    cursor: &mut BitCursor<'_>,
    ctx: &mut DecodeContext<'_>,
    array: &ArrayType,
) -> PlaybackResult<FieldValue> {
    let (length, dynamic) = match &array.length {
        ArrayLength::Fixed(length) => (*length, false),
        ArrayLength::Dynamic(path) => (ctx.resolve_length(path, cursor.byte_offset())?, true),
    };

    if array.is_text() {
        return decode_text(cursor, ctx, array, length);
    }

    cursor.align(array.element.alignment());
    let mut items = Vec::with_capacity(length.min(MAX_PREALLOCATED_ELEMENTS) as usize);
    for index in 0..length {
        let start = cursor.position();
        ctx.push_name(format!("[{index}]"));
        let item = decode_value(cursor, ctx, &array.element);
        ctx.pop_name();
        items.push(item?);
        // A length read from the data must be paid for with input.
        if dynamic && cursor.position() == start {
            return Err(PlaybackError::ZeroWidthElements {
                field: ctx.field_path(),
                length,
                byte_offset: cursor.byte_offset(),
            });
        }
    }
    Ok(FieldValue::Array(items))
}

/// Character arrays consume their full length but end at the first NUL.
fn decode_text(
    cursor: &mut BitCursor<'_>,
    ctx: &DecodeContext<'_>,
    array: &ArrayType,
    length: u64,
) -> PlaybackResult<FieldValue> {
    let TypeDescriptor::Integer(int) = array.element.as_ref() else {
        return Err(PlaybackError::unresolved(ctx.field_path(), cursor.byte_offset()));
    };
    cursor.align(int.alignment);
    let mut bytes = Vec::with_capacity(length.min(MAX_PREALLOCATED_ELEMENTS) as usize);
    if cursor.position() % 8 == 0 {
        bytes.extend_from_slice(cursor.read_bytes(length, || ctx.field_path())?);
    } else {
        for _ in 0..length {
            let byte = cursor.read_bits(8, false, int.byte_order, || ctx.field_path())?;
            bytes.push(byte as u8);
        }
    }
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(nul);
    }
    Ok(FieldValue::String(String::from_utf8_lossy(&bytes).into_owned()))
}

fn decode_variant(
    cursor: &mut BitCursor<'_>,
    ctx: &mut DecodeContext<'_>,
    variant: &VariantType,
) -> PlaybackResult<FieldValue> {
    let byte_offset = cursor.byte_offset();
    let Some(tag_path) = &variant.tag else {
        return Err(PlaybackError::VariantTagNotEnum {
            field: ctx.field_path(),
            tag: "<untagged>".to_string(),
            byte_offset,
        });
    };

    let label = match ctx.resolve(tag_path, byte_offset)? {
        FieldValue::Enum(EnumValue {
            label: Some(label), ..
        }) => label.clone(),
        FieldValue::Enum(EnumValue { integer, label: None }) => {
            return Err(PlaybackError::VariantTagUnmatched {
                field: ctx.field_path(),
                value: integer.to_string(),
                byte_offset,
            })
        }
        _ => {
            return Err(PlaybackError::VariantTagNotEnum {
                field: ctx.field_path(),
                tag: tag_path.to_string(),
                byte_offset,
            })
        }
    };

    let option = variant
        .option(&label)
        .ok_or_else(|| PlaybackError::VariantTagUnmatched {
            field: ctx.field_path(),
            value: label.clone(),
            byte_offset,
        })?;
    let value = decode_value(cursor, ctx, option)?;
    Ok(FieldValue::Variant(VariantValue {
        tag: label,
        value: Box::new(value),
    }))
}
