//! Semantic compilation of a metadata syntax tree into [`Metadata`].
//!
//! Compilation runs in two phases per scope: every named declaration is
//! registered as pending first, then bodies are compiled, resolving names
//! lazily through the scope chain. The trace byte order is read before any
//! type is compiled because `native` integers depend on it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::debug;

use super::{
    ast::{
        self, ArrayDimension, Attribute, BlockEntry, Declaration, EnumeratorValue,
        FieldDeclaration, PropertyValue, StructEntry, TypeDeclaration, TypeSpecifier,
    },
    scope::{CompileType, ScopeId, ScopeTree, TypeName},
    ClockDescriptor, EnvValue, EnvironmentDescriptor, EventDescriptor, Metadata,
    StreamDescriptor, TraceDescriptor,
};
use crate::{
    error::{MetadataError, MetadataResult},
    expr::FieldPath,
    types::{
        default_alignment, ArrayLength, ArrayType, Base, ByteOrder, EnumMapping, EnumType,
        Encoding, FloatType, IntegerType, StringType, StructField, StructType, TypeDescriptor,
        VariantType,
    },
};

pub fn compile(tree: &ast::Metadata) -> MetadataResult<Metadata> {
    let mut scopes = ScopeTree::new();
    let root = scopes.root();

    let mut trace_block = None;
    let mut streams = Vec::new();
    let mut events = Vec::new();
    let mut clocks = Vec::new();
    let mut envs = Vec::new();

    for declaration in &tree.declarations {
        match declaration {
            Declaration::Type(decl) => register_declaration(&mut scopes, root, decl)?,
            Declaration::Trace(entries) => {
                if trace_block.replace(entries.as_slice()).is_some() {
                    return Err(MetadataError::unsupported("more than one trace block"));
                }
            }
            Declaration::Stream(entries) => streams.push(entries.as_slice()),
            Declaration::Event(entries) => events.push(entries.as_slice()),
            Declaration::Clock(entries) => clocks.push(entries.as_slice()),
            Declaration::Env(entries) => envs.push(entries.as_slice()),
            Declaration::Callsite(_) => debug!("ignoring callsite block"),
        }
    }

    let trace_entries = trace_block.ok_or_else(|| MetadataError::missing("trace", "byte_order"))?;
    let trace_scope = scopes.add_child(root, "trace");
    let trace_assignments = load_block(&mut scopes, trace_scope, trace_entries)?;
    let props = Properties::new(&scopes, trace_scope);
    let byte_order = parse_byte_order(
        props.required("byte_order")?,
        None,
        &props.scope_name,
        "byte_order",
    )?;

    let mut compiler = TypeCompiler { byte_order };
    let trace = TraceDescriptor {
        major: props.optional_u64("major")?,
        minor: props.optional_u64("minor")?,
        uuid: props.optional_uuid("uuid")?,
        byte_order,
        packet_header: compiler.scope_struct(&mut scopes, trace_scope, &trace_assignments, "packet.header")?,
    };

    let mut environment = EnvironmentDescriptor::default();
    for entries in envs {
        let scope = scopes.add_child(root, "env");
        load_block(&mut scopes, scope, entries)?;
        for (name, value) in scopes.properties(scope) {
            let value = match value {
                PropertyValue::String(text) | PropertyValue::Identifier(text) => {
                    EnvValue::String(text.clone())
                }
                other => EnvValue::Integer(other.as_i128().unwrap_or_default()),
            };
            environment.entries.insert(name.to_string(), value);
        }
    }

    let mut clock_map = BTreeMap::new();
    for entries in clocks {
        let scope = scopes.add_child(root, "clock");
        load_block(&mut scopes, scope, entries)?;
        let clock = compile_clock(&Properties::new(&scopes, scope))?;
        if clock_map.contains_key(&clock.name) {
            return Err(MetadataError::DuplicateType {
                name: format!("clock {}", clock.name),
                scope: "global".to_string(),
            });
        }
        clock_map.insert(clock.name.clone(), clock);
    }

    let mut stream_map = BTreeMap::new();
    let stream_count = streams.len();
    for entries in streams {
        let scope = scopes.add_child(root, "stream");
        let assignments = load_block(&mut scopes, scope, entries)?;
        let props = Properties::new(&scopes, scope);
        let id = match props.optional_u64("id")? {
            Some(id) => id,
            None if stream_count == 1 => 0,
            None => return Err(MetadataError::missing(&props.scope_name, "id")),
        };
        let stream = StreamDescriptor {
            id,
            packet_context: compiler.scope_struct(&mut scopes, scope, &assignments, "packet.context")?,
            event_header: compiler.scope_struct(&mut scopes, scope, &assignments, "event.header")?,
            event_context: compiler.scope_struct(&mut scopes, scope, &assignments, "event.context")?,
        };
        if stream_map.insert(id, stream).is_some() {
            return Err(MetadataError::DuplicateStream(id));
        }
    }
    if stream_map.is_empty() {
        stream_map.insert(0, StreamDescriptor::implicit(0));
    }

    let mut event_map = BTreeMap::new();
    for entries in events {
        let scope = scopes.add_child(root, "event");
        let assignments = load_block(&mut scopes, scope, entries)?;
        let props = Properties::new(&scopes, scope);
        let name = props.required_text("name")?.to_string();
        let id = props
            .optional_u64("id")?
            .ok_or_else(|| MetadataError::missing(format!("event `{name}`"), "id"))?;
        let stream_id = match props.optional_u64("stream_id")? {
            Some(stream_id) => stream_id,
            None if stream_map.len() == 1 => *stream_map.keys().next().unwrap_or(&0),
            None => {
                return Err(MetadataError::AmbiguousStream {
                    event: name,
                    streams: stream_map.len(),
                })
            }
        };
        let stream = stream_map
            .get(&stream_id)
            .ok_or_else(|| MetadataError::UnknownStream {
                event: name.clone(),
                stream_id,
            })?;

        let event = EventDescriptor {
            id,
            stream_id,
            log_level: props.optional_i64("loglevel")?,
            model_emf_uri: props.optional_text("model.emf.uri")?.map(str::to_string),
            header: stream.event_header.clone(),
            stream_context: stream.event_context.clone(),
            context: compiler.scope_struct(&mut scopes, scope, &assignments, "context")?,
            payload: compiler.scope_struct(&mut scopes, scope, &assignments, "fields")?,
            name,
        };
        if event_map.insert((stream_id, id), Arc::new(event)).is_some() {
            return Err(MetadataError::DuplicateEvent {
                stream_id,
                event_id: id,
            });
        }
    }

    debug!(
        streams = stream_map.len(),
        events = event_map.len(),
        clocks = clock_map.len(),
        byte_order = ?byte_order,
        "compiled trace metadata"
    );

    Ok(Metadata {
        trace,
        environment,
        clocks: clock_map,
        streams: stream_map,
        events: event_map,
    })
}

/// First pass over a block: record properties, register local type
/// declarations and collect `name := type` assignments.
fn load_block<'a>(
    scopes: &mut ScopeTree<'a>,
    scope: ScopeId,
    entries: &'a [BlockEntry],
) -> MetadataResult<HashMap<&'a str, &'a TypeSpecifier>> {
    let mut assignments = HashMap::new();
    for entry in entries {
        match entry {
            BlockEntry::Property { name, value } => scopes.set_property(scope, name, value)?,
            BlockEntry::TypeAssignment { name, ty } => {
                if assignments.insert(name.as_str(), ty).is_some() {
                    return Err(MetadataError::DuplicateField {
                        field: name.clone(),
                        scope: scopes.describe(scope),
                    });
                }
            }
            BlockEntry::Type(decl) => register_declaration(scopes, scope, decl)?,
        }
    }
    Ok(assignments)
}

fn register_declaration<'a>(
    scopes: &mut ScopeTree<'a>,
    scope: ScopeId,
    decl: &'a TypeDeclaration,
) -> MetadataResult<()> {
    match decl {
        TypeDeclaration::Alias { target, name } => {
            scopes.declare_pending(scope, TypeName::Alias(name.clone()), target, &[])
        }
        TypeDeclaration::Typedef { ty, name, dims } => {
            scopes.declare_pending(scope, TypeName::Alias(name.clone()), ty, dims)
        }
        TypeDeclaration::Named(spec) => match spec {
            TypeSpecifier::Struct {
                name: Some(name),
                body: Some(_),
                ..
            } => scopes.declare_pending(scope, TypeName::Struct(name.clone()), spec, &[]),
            TypeSpecifier::Variant {
                name: Some(name),
                body: Some(_),
                ..
            } => scopes.declare_pending(scope, TypeName::Variant(name.clone()), spec, &[]),
            TypeSpecifier::Enum {
                name: Some(name),
                body: Some(_),
                ..
            } => scopes.declare_pending(scope, TypeName::Enum(name.clone()), spec, &[]),
            // Forward declarations without a body carry no information.
            TypeSpecifier::Struct { name: Some(_), .. }
            | TypeSpecifier::Variant { name: Some(_), .. }
            | TypeSpecifier::Enum { name: Some(_), .. } => Ok(()),
            other => Err(MetadataError::unsupported(format!(
                "anonymous {} declaration in {}",
                spec_kind(other),
                scopes.describe(scope)
            ))),
        },
    }
}

fn spec_kind(spec: &TypeSpecifier) -> &'static str {
    match spec {
        TypeSpecifier::Integer(_) => "integer",
        TypeSpecifier::FloatingPoint(_) => "floating_point",
        TypeSpecifier::String(_) => "string",
        TypeSpecifier::Struct { .. } => "struct",
        TypeSpecifier::Variant { .. } => "variant",
        TypeSpecifier::Enum { .. } => "enum",
        TypeSpecifier::Named(_) => "type name",
    }
}

fn compile_clock(props: &Properties<'_, '_>) -> MetadataResult<ClockDescriptor> {
    let name = props.required_text("name")?.to_string();
    let freq = props.optional_u64("freq")?.unwrap_or(1_000_000_000);
    if freq == 0 {
        return Err(MetadataError::property_type(&props.scope_name, "freq", "non-zero frequency", 0));
    }
    Ok(ClockDescriptor {
        uuid: props.optional_uuid("uuid")?,
        description: props.optional_text("description")?.map(str::to_string),
        freq,
        precision: props.optional_u64("precision")?.unwrap_or(0),
        offset_s: props.optional_i64("offset_s")?.unwrap_or(0),
        offset: props.optional_i64("offset")?.unwrap_or(0),
        absolute: props.optional_bool("absolute")?.unwrap_or(false),
        name,
    })
}

/// Typed, lazily converted access to the raw properties of one block.
struct Properties<'s, 'a> {
    scopes: &'s ScopeTree<'a>,
    scope: ScopeId,
    scope_name: String,
}

impl<'s, 'a> Properties<'s, 'a> {
    fn new(scopes: &'s ScopeTree<'a>, scope: ScopeId) -> Self {
        Self {
            scopes,
            scope,
            scope_name: scopes.describe(scope),
        }
    }

    fn get(&self, name: &str) -> Option<&'a PropertyValue> {
        self.scopes.property(self.scope, name)
    }

    fn required(&self, name: &str) -> MetadataResult<&'a PropertyValue> {
        self.get(name)
            .ok_or_else(|| MetadataError::missing(&self.scope_name, name))
    }

    fn required_text(&self, name: &str) -> MetadataResult<&'a str> {
        let value = self.required(name)?;
        value
            .as_text()
            .ok_or_else(|| MetadataError::property_type(&self.scope_name, name, "string", value))
    }

    fn optional_text(&self, name: &str) -> MetadataResult<Option<&'a str>> {
        self.get(name)
            .map(|value| {
                value
                    .as_text()
                    .ok_or_else(|| MetadataError::property_type(&self.scope_name, name, "string", value))
            })
            .transpose()
    }

    fn optional_u64(&self, name: &str) -> MetadataResult<Option<u64>> {
        self.get(name)
            .map(|value| {
                value.as_u64().ok_or_else(|| {
                    MetadataError::property_type(&self.scope_name, name, "unsigned integer", value)
                })
            })
            .transpose()
    }

    fn optional_i64(&self, name: &str) -> MetadataResult<Option<i64>> {
        self.get(name)
            .map(|value| {
                value
                    .as_i64()
                    .ok_or_else(|| MetadataError::property_type(&self.scope_name, name, "integer", value))
            })
            .transpose()
    }

    fn optional_bool(&self, name: &str) -> MetadataResult<Option<bool>> {
        self.get(name)
            .map(|value| {
                value
                    .as_bool()
                    .ok_or_else(|| MetadataError::property_type(&self.scope_name, name, "boolean", value))
            })
            .transpose()
    }

    fn optional_uuid(&self, name: &str) -> MetadataResult<Option<[u8; 16]>> {
        self.optional_text(name)?
            .map(|text| {
                parse_uuid(text)
                    .ok_or_else(|| MetadataError::property_type(&self.scope_name, name, "uuid", text))
            })
            .transpose()
    }
}

pub fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let hex: Vec<u8> = text.bytes().filter(|&b| b != b'-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut uuid = [0u8; 16];
    for (byte, pair) in uuid.iter_mut().zip(hex.chunks(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *byte = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(uuid)
}

fn parse_byte_order(
    value: &PropertyValue,
    native: Option<ByteOrder>,
    scope: &str,
    property: &str,
) -> MetadataResult<ByteOrder> {
    let order = match value.as_text() {
        Some("le" | "little_endian") => Some(ByteOrder::Little),
        Some("be" | "big_endian" | "network") => Some(ByteOrder::Big),
        Some("native") => native,
        _ => None,
    };
    order.ok_or_else(|| MetadataError::property_type(scope, property, "byte order", value))
}

struct TypeCompiler {
    /// Trace byte order, used for `native` and unspecified byte orders.
    byte_order: ByteOrder,
}

impl<'a> CompileType<'a> for TypeCompiler {
    fn compile_declared(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        owner: ScopeId,
        spec: &'a TypeSpecifier,
        dims: &'a [ArrayDimension],
    ) -> MetadataResult<TypeDescriptor> {
        let base = self.compile_spec(scopes, owner, spec)?;
        apply_dims(base, dims)
    }
}

impl TypeCompiler {
    /// Compiles the `name := struct {...}` assignment of a block, if present.
    fn scope_struct<'a>(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        scope: ScopeId,
        assignments: &HashMap<&'a str, &'a TypeSpecifier>,
        name: &str,
    ) -> MetadataResult<Option<StructType>> {
        let Some(&spec) = assignments.get(name) else {
            return Ok(None);
        };
        match self.compile_spec(scopes, scope, spec)? {
            TypeDescriptor::Struct(st) => Ok(Some(st)),
            other => Err(MetadataError::property_type(
                scopes.describe(scope),
                name,
                "struct",
                other.kind(),
            )),
        }
    }

    fn compile_spec<'a>(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        scope: ScopeId,
        spec: &'a TypeSpecifier,
    ) -> MetadataResult<TypeDescriptor> {
        match spec {
            TypeSpecifier::Integer(attrs) => {
                let context = format!("integer in {}", scopes.describe(scope));
                Ok(TypeDescriptor::Integer(Arc::new(self.integer(attrs, &context)?)))
            }
            TypeSpecifier::FloatingPoint(attrs) => {
                let context = format!("floating_point in {}", scopes.describe(scope));
                Ok(TypeDescriptor::Float(self.float(attrs, &context)?))
            }
            TypeSpecifier::String(attrs) => {
                let context = format!("string in {}", scopes.describe(scope));
                let mut string = StringType::default();
                for attr in attrs {
                    if attr.name == "encoding" {
                        string.encoding = parse_encoding(&attr.value, &context)?;
                    }
                }
                Ok(TypeDescriptor::String(string))
            }
            TypeSpecifier::Named(name) => scopes.resolve(scope, &TypeName::Alias(name.clone()), self),
            TypeSpecifier::Struct { name, body, align } => {
                let min_alignment = match align {
                    Some(align) => alignment_value(*align, &scopes.describe(scope), "align")?,
                    None => 1,
                };
                let Some(body) = body else {
                    let name = name.as_deref().ok_or_else(|| {
                        MetadataError::unsupported("struct without name or body")
                    })?;
                    let mut ty = scopes.resolve(scope, &TypeName::Struct(name.to_string()), self)?;
                    if let TypeDescriptor::Struct(st) = &mut ty {
                        st.alignment = st.alignment.max(min_alignment);
                    }
                    return Ok(ty);
                };
                let child = scopes.add_child(scope, name.as_deref().unwrap_or("struct"));
                let fields = self.compile_members(scopes, child, body)?;
                let ty = TypeDescriptor::Struct(StructType::new(fields, min_alignment));
                if let Some(name) = name {
                    self.declare_inline(scopes, scope, TypeName::Struct(name.clone()), &ty)?;
                }
                Ok(ty)
            }
            TypeSpecifier::Variant { name, tag, body } => {
                let tag = tag.as_deref().map(FieldPath::parse).transpose()?;
                let Some(body) = body else {
                    let name = name.as_deref().ok_or_else(|| {
                        MetadataError::unsupported("variant without name or body")
                    })?;
                    let mut ty = scopes.resolve(scope, &TypeName::Variant(name.to_string()), self)?;
                    if let (TypeDescriptor::Variant(variant), Some(tag)) = (&mut ty, tag) {
                        variant.tag = Some(tag);
                    }
                    return Ok(ty);
                };
                let child = scopes.add_child(scope, name.as_deref().unwrap_or("variant"));
                let options = self.compile_members(scopes, child, body)?;
                let ty = TypeDescriptor::Variant(VariantType { tag, options });
                if let Some(name) = name {
                    self.declare_inline(scopes, scope, TypeName::Variant(name.clone()), &ty)?;
                }
                Ok(ty)
            }
            TypeSpecifier::Enum {
                name,
                container,
                body,
            } => {
                let Some(body) = body else {
                    let name = name.as_deref().ok_or_else(|| {
                        MetadataError::unsupported("enum without name or body")
                    })?;
                    return scopes.resolve(scope, &TypeName::Enum(name.to_string()), self);
                };
                let label = name.as_deref().unwrap_or("<anonymous>");
                let container = match container {
                    Some(spec) => self.compile_spec(scopes, scope, spec)?,
                    None => scopes.resolve(scope, &TypeName::Alias("int".to_string()), self)?,
                };
                let container = match container {
                    TypeDescriptor::Integer(container) => container,
                    other => {
                        return Err(MetadataError::property_type(
                            format!("enum {label}"),
                            "container",
                            "integer",
                            other.kind(),
                        ))
                    }
                };
                let mappings = enum_mappings(body)?;
                let ty = TypeDescriptor::Enum(EnumType {
                    container,
                    mappings,
                });
                if let Some(name) = name {
                    self.declare_inline(scopes, scope, TypeName::Enum(name.clone()), &ty)?;
                }
                Ok(ty)
            }
        }
    }

    /// Named compound types defined inline become visible in the enclosing
    /// scope, unless the same definition was registered up front.
    fn declare_inline(
        &mut self,
        scopes: &mut ScopeTree<'_>,
        scope: ScopeId,
        name: TypeName,
        ty: &TypeDescriptor,
    ) -> MetadataResult<()> {
        if scopes.is_declared_locally(scope, &name) {
            return Ok(());
        }
        scopes.declare(scope, name, ty.clone())
    }

    fn compile_members<'a>(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        scope: ScopeId,
        body: &'a [StructEntry],
    ) -> MetadataResult<Vec<StructField>> {
        for entry in body {
            if let StructEntry::Type(decl) = entry {
                register_declaration(scopes, scope, decl)?;
            }
        }

        let mut fields: Vec<StructField> = Vec::new();
        for entry in body {
            let StructEntry::Field(field) = entry else {
                continue;
            };
            if fields.iter().any(|existing| existing.name == field.name) {
                return Err(MetadataError::DuplicateField {
                    field: field.name.clone(),
                    scope: scopes.describe(scope),
                });
            }
            let ty = self.compile_field(scopes, scope, field)?;
            fields.push(StructField {
                name: field.name.clone(),
                ty,
            });
        }
        Ok(fields)
    }

    fn compile_field<'a>(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        scope: ScopeId,
        field: &'a FieldDeclaration,
    ) -> MetadataResult<TypeDescriptor> {
        let base = self.compile_spec(scopes, scope, &field.ty)?;
        if let TypeDescriptor::Variant(VariantType { tag: None, .. }) = &base {
            return Err(MetadataError::UntaggedVariant {
                field: field.name.clone(),
            });
        }
        apply_dims(base, &field.dims)
    }

    fn integer(&self, attrs: &[Attribute], context: &str) -> MetadataResult<IntegerType> {
        let mut size = None;
        let mut signed = false;
        let mut byte_order = self.byte_order;
        let mut base = Base::Decimal;
        let mut alignment = None;
        let mut encoding = Encoding::None;
        let mut mapped_clock = None;

        for Attribute { name, value } in attrs {
            match name.as_str() {
                "size" => {
                    size = Some(
                        value
                            .as_u64()
                            .filter(|size| (1..=64).contains(size))
                            .ok_or_else(|| {
                                MetadataError::property_type(context, "size", "integer between 1 and 64", value)
                            })? as u32,
                    );
                }
                "signed" => {
                    signed = value
                        .as_bool()
                        .ok_or_else(|| MetadataError::property_type(context, "signed", "boolean", value))?;
                }
                "byte_order" => {
                    byte_order = parse_byte_order(value, Some(self.byte_order), context, "byte_order")?;
                }
                "align" => alignment = Some(alignment_property(value, context)?),
                "base" => base = parse_base(value, context)?,
                "encoding" => encoding = parse_encoding(value, context)?,
                "map" => mapped_clock = Some(parse_clock_map(value, context)?),
                other => debug!(attribute = other, context, "ignoring unknown integer attribute"),
            }
        }

        let size = size.ok_or_else(|| MetadataError::missing(context, "size"))?;
        Ok(IntegerType {
            size,
            signed,
            byte_order,
            base,
            alignment: alignment.unwrap_or_else(|| default_alignment(size)),
            encoding,
            mapped_clock,
        })
    }

    fn float(&self, attrs: &[Attribute], context: &str) -> MetadataResult<FloatType> {
        let mut exponent_bits = None;
        let mut mantissa_bits = None;
        let mut byte_order = self.byte_order;
        let mut alignment = None;

        for Attribute { name, value } in attrs {
            match name.as_str() {
                "exp_dig" => {
                    exponent_bits = Some(value.as_u64().ok_or_else(|| {
                        MetadataError::property_type(context, "exp_dig", "unsigned integer", value)
                    })?);
                }
                "mant_dig" => {
                    mantissa_bits = Some(value.as_u64().ok_or_else(|| {
                        MetadataError::property_type(context, "mant_dig", "unsigned integer", value)
                    })?);
                }
                "byte_order" => {
                    byte_order = parse_byte_order(value, Some(self.byte_order), context, "byte_order")?;
                }
                "align" => alignment = Some(alignment_property(value, context)?),
                other => debug!(attribute = other, context, "ignoring unknown floating_point attribute"),
            }
        }

        let exponent_bits = exponent_bits.ok_or_else(|| MetadataError::missing(context, "exp_dig"))?;
        let mantissa_bits = mantissa_bits.ok_or_else(|| MetadataError::missing(context, "mant_dig"))?;
        if !matches!((exponent_bits, mantissa_bits), (8, 24) | (11, 53)) {
            return Err(MetadataError::unsupported(format!(
                "floating point layout exp_dig={exponent_bits} mant_dig={mantissa_bits} in {context}"
            )));
        }
        let size = (exponent_bits + mantissa_bits) as u32;
        Ok(FloatType {
            exponent_bits: exponent_bits as u32,
            mantissa_bits: mantissa_bits as u32,
            byte_order,
            alignment: alignment.unwrap_or_else(|| default_alignment(size)),
        })
    }
}

fn apply_dims(base: TypeDescriptor, dims: &[ArrayDimension]) -> MetadataResult<TypeDescriptor> {
    let mut ty = base;
    for dim in dims.iter().rev() {
        let length = match dim {
            ArrayDimension::Fixed(len) => ArrayLength::Fixed(*len),
            ArrayDimension::Dynamic(expression) => ArrayLength::Dynamic(FieldPath::parse(expression)?),
        };
        ty = TypeDescriptor::Array(ArrayType {
            element: Box::new(ty),
            length,
        });
    }
    Ok(ty)
}

fn enum_mappings(body: &[ast::Enumerator]) -> MetadataResult<Vec<EnumMapping>> {
    let mut mappings: Vec<EnumMapping> = Vec::with_capacity(body.len());
    let mut next = 0i128;
    for enumerator in body {
        let bound = |value: &PropertyValue| {
            value.as_i128().ok_or_else(|| {
                MetadataError::property_type(
                    format!("enumerator `{}`", enumerator.label),
                    "value",
                    "integer",
                    value,
                )
            })
        };
        let (start, end) = match &enumerator.value {
            None => (next, next),
            Some(EnumeratorValue::Single(value)) => {
                let value = bound(value)?;
                (value, value)
            }
            Some(EnumeratorValue::Range(start, stop)) => (bound(start)?, bound(stop)?),
        };
        if start > end {
            return Err(MetadataError::InvalidEnumRange {
                label: enumerator.label.clone(),
                start,
                stop: end,
            });
        }
        if let Some(other) = mappings.iter().find(|m| m.start <= end && start <= m.end) {
            return Err(MetadataError::OverlappingEnumRange {
                label: enumerator.label.clone(),
                other: other.label.clone(),
            });
        }
        mappings.push(EnumMapping {
            label: enumerator.label.clone(),
            start,
            end,
        });
        next = end + 1;
    }
    Ok(mappings)
}

fn alignment_value(align: u64, context: &str, property: &str) -> MetadataResult<u32> {
    if align == 0 || !align.is_power_of_two() || align > u64::from(u32::MAX) {
        return Err(MetadataError::property_type(context, property, "power of two", align));
    }
    Ok(align as u32)
}

fn alignment_property(value: &PropertyValue, context: &str) -> MetadataResult<u32> {
    let align = value
        .as_u64()
        .ok_or_else(|| MetadataError::property_type(context, "align", "power of two", value))?;
    alignment_value(align, context, "align")
}

fn parse_base(value: &PropertyValue, context: &str) -> MetadataResult<Base> {
    let base = match value {
        PropertyValue::UInt(2) | PropertyValue::Int(2) => Some(Base::Binary),
        PropertyValue::UInt(8) | PropertyValue::Int(8) => Some(Base::Octal),
        PropertyValue::UInt(10) | PropertyValue::Int(10) => Some(Base::Decimal),
        PropertyValue::UInt(16) | PropertyValue::Int(16) => Some(Base::Hexadecimal),
        other => match other.as_text() {
            Some("binary" | "b") => Some(Base::Binary),
            Some("octal" | "oct" | "o") => Some(Base::Octal),
            Some("decimal" | "dec" | "d" | "i" | "u") => Some(Base::Decimal),
            Some("hexadecimal" | "hex" | "x" | "X" | "p") => Some(Base::Hexadecimal),
            _ => None,
        },
    };
    base.ok_or_else(|| MetadataError::property_type(context, "base", "display base", value))
}

fn parse_encoding(value: &PropertyValue, context: &str) -> MetadataResult<Encoding> {
    let encoding = value.as_text().and_then(|text| match text.to_ascii_lowercase().as_str() {
        "none" => Some(Encoding::None),
        "utf8" => Some(Encoding::Utf8),
        "ascii" => Some(Encoding::Ascii),
        _ => None,
    });
    encoding.ok_or_else(|| MetadataError::property_type(context, "encoding", "none, UTF8 or ASCII", value))
}

/// `clock.<name>.value` → `<name>`.
fn parse_clock_map(value: &PropertyValue, context: &str) -> MetadataResult<String> {
    value
        .as_text()
        .and_then(|text| text.strip_prefix("clock."))
        .and_then(|rest| rest.strip_suffix(".value"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MetadataError::property_type(context, "map", "clock.<name>.value", value))
}
