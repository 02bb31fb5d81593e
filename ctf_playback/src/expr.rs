//! Dynamic field references: array lengths and variant tags that name a
//! field decoded earlier in the same packet or event.
//!
//! A reference is either rooted at one of the well-known scopes
//! (`trace.packet.header`, `stream.packet.context`, `stream.event.header`,
//! `stream.event.context`, `event.context`, `event.fields`) or relative, in
//! which case its first segment names a field of the innermost enclosing
//! struct that has one.

use std::fmt;

use crate::{
    error::{MetadataError, MetadataResult, PlaybackError, PlaybackResult},
    value::{FieldValue, StructValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRoot {
    TracePacketHeader,
    StreamPacketContext,
    StreamEventHeader,
    StreamEventContext,
    EventContext,
    EventFields,
    Relative,
}

const ROOTS: [(PathRoot, &[&str]); 6] = [
    (PathRoot::TracePacketHeader, &["trace", "packet", "header"]),
    (PathRoot::StreamPacketContext, &["stream", "packet", "context"]),
    (PathRoot::StreamEventHeader, &["stream", "event", "header"]),
    (PathRoot::StreamEventContext, &["stream", "event", "context"]),
    (PathRoot::EventContext, &["event", "context"]),
    (PathRoot::EventFields, &["event", "fields"]),
];

impl PathRoot {
    pub fn prefix(self) -> &'static str {
        match self {
            PathRoot::TracePacketHeader => "trace.packet.header",
            PathRoot::StreamPacketContext => "stream.packet.context",
            PathRoot::StreamEventHeader => "stream.event.header",
            PathRoot::StreamEventContext => "stream.event.context",
            PathRoot::EventContext => "event.context",
            PathRoot::EventFields => "event.fields",
            PathRoot::Relative => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Field(String),
    Index(usize),
}

/// Parsed postfix expression such as `stream.event.header.v.id` or
/// `lens[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    root: PathRoot,
    steps: Vec<PathStep>,
    text: String,
}

impl FieldPath {
    pub fn parse(expression: &str) -> MetadataResult<Self> {
        let text = expression.trim();
        let invalid = |reason: &str| MetadataError::InvalidFieldPath {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let mut rest = text;
        let mut expect_name = true;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                if expect_name {
                    return Err(invalid("index without a field"));
                }
                let close = after.find(']').ok_or_else(|| invalid("unterminated index"))?;
                let index = after[..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index is not a non-negative integer"))?;
                steps.push(PathStep::Index(index));
                rest = &after[close + 1..];
            } else if let Some(after) = rest.strip_prefix('.') {
                if expect_name {
                    return Err(invalid("empty segment"));
                }
                expect_name = true;
                rest = after;
            } else {
                if !expect_name {
                    return Err(invalid("missing `.` between segments"));
                }
                let end = rest
                    .find(|c: char| c == '.' || c == '[')
                    .unwrap_or(rest.len());
                let name = rest[..end].trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(invalid("segment is not an identifier"));
                }
                steps.push(PathStep::Field(name.to_string()));
                expect_name = false;
                rest = &rest[end..];
            }
        }
        if expect_name {
            return Err(invalid("expression must end with a field or index"));
        }

        let mut root = PathRoot::Relative;
        for (candidate, prefix) in ROOTS {
            let matches = steps.len() >= prefix.len()
                && prefix
                    .iter()
                    .zip(&steps)
                    .all(|(want, step)| matches!(step, PathStep::Field(name) if name == want));
            if matches {
                if steps.len() == prefix.len() {
                    return Err(invalid("expression names a scope, not a field"));
                }
                steps.drain(..prefix.len());
                root = candidate;
                break;
            }
        }
        if !matches!(steps.first(), Some(PathStep::Field(_))) {
            return Err(invalid("expression must start with a field name"));
        }

        Ok(Self {
            root,
            steps,
            text: text.to_string(),
        })
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Already decoded well-known scopes visible to the record being decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeValues<'a> {
    pub trace_packet_header: Option<&'a StructValue>,
    pub stream_packet_context: Option<&'a StructValue>,
    pub stream_event_header: Option<&'a StructValue>,
    pub stream_event_context: Option<&'a StructValue>,
    pub event_context: Option<&'a StructValue>,
}

impl<'a> ScopeValues<'a> {
    fn get(&self, root: PathRoot) -> Option<&'a StructValue> {
        match root {
            PathRoot::TracePacketHeader => self.trace_packet_header,
            PathRoot::StreamPacketContext => self.stream_packet_context,
            PathRoot::StreamEventHeader => self.stream_event_header,
            PathRoot::StreamEventContext => self.stream_event_context,
            PathRoot::EventContext => self.event_context,
            PathRoot::EventFields | PathRoot::Relative => None,
        }
    }
}

/// The in-progress record: completed scopes plus one frame per struct
/// currently being decoded. Frames only ever grow, so a reference can only
/// observe fields that are already committed.
#[derive(Debug)]
pub struct DecodeContext<'a> {
    scopes: ScopeValues<'a>,
    current: PathRoot,
    frames: Vec<Vec<(String, FieldValue)>>,
    names: Vec<String>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(scopes: ScopeValues<'a>, current: PathRoot) -> Self {
        Self {
            scopes,
            current,
            frames: Vec::new(),
            names: Vec::new(),
        }
    }

    pub fn enter_struct(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn commit(&mut self, name: &str, value: FieldValue) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_string(), value));
        }
    }

    pub fn exit_struct(&mut self) -> StructValue {
        StructValue::new(self.frames.pop().unwrap_or_default())
    }

    pub fn push_name(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    pub fn pop_name(&mut self) {
        self.names.pop();
    }

    /// Dotted path of the field being decoded, for diagnostics.
    pub fn field_path(&self) -> String {
        let mut path = self.current.prefix().to_string();
        for name in &self.names {
            if !path.is_empty() && !name.starts_with('[') {
                path.push('.');
            }
            path.push_str(name);
        }
        path
    }

    /// Looks `path` up among values committed so far.
    pub fn resolve(&self, path: &FieldPath, byte_offset: u64) -> PlaybackResult<&FieldValue> {
        self.lookup(path)
            .ok_or_else(|| PlaybackError::unresolved(path, byte_offset))
    }

    /// Resolves an array length reference to an element count.
    pub fn resolve_length(&self, path: &FieldPath, byte_offset: u64) -> PlaybackResult<u64> {
        self.resolve(path, byte_offset)?
            .as_integer()
            .and_then(|int| int.as_u64())
            .ok_or_else(|| PlaybackError::NotAnInteger {
                path: path.to_string(),
                byte_offset,
            })
    }

    fn lookup(&self, path: &FieldPath) -> Option<&FieldValue> {
        let (first, rest) = match path.steps.split_first()? {
            (PathStep::Field(name), rest) => (name.as_str(), rest),
            (PathStep::Index(_), _) => return None,
        };

        let start = match path.root {
            PathRoot::Relative => self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame_field(frame, first))?,
            root if root == self.current => frame_field(self.frames.first()?, first)?,
            root => self.scopes.get(root)?.field(first)?,
        };
        walk(start, rest)
    }
}

fn frame_field<'v>(frame: &'v [(String, FieldValue)], name: &str) -> Option<&'v FieldValue> {
    frame
        .iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value)
}

fn walk<'v>(mut value: &'v FieldValue, steps: &[PathStep]) -> Option<&'v FieldValue> {
    for step in steps {
        if let FieldValue::Variant(variant) = value {
            value = variant.value.as_ref();
        }
        value = match step {
            PathStep::Field(name) => value.as_struct()?.field(name)?,
            PathStep::Index(index) => value.as_array()?.get(*index)?,
        };
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use std::sync::Arc;

    use super::*;
    use crate::{
        types::{ByteOrder, IntegerType},
        value::IntegerValue,
    };

    fn uint(raw: u64) -> FieldValue {
        FieldValue::Integer(IntegerValue::new(
            raw,
            Arc::new(IntegerType::unsigned(8, ByteOrder::Little)),
        ))
    }

    #[test]
    fn test_parse__well_known_root__then_strips_prefix() {
        let path = FieldPath::parse("stream.event.header.v.id").unwrap();
        assert_eq!(path.root(), PathRoot::StreamEventHeader);
        assert_eq!(
            path.steps(),
            &[PathStep::Field("v".into()), PathStep::Field("id".into())]
        );
        assert_eq!(path.to_string(), "stream.event.header.v.id");
    }

    #[test]
    fn test_parse__relative_with_index__then_postfix_steps() {
        let path = FieldPath::parse("lens[2].n").unwrap();
        assert_eq!(path.root(), PathRoot::Relative);
        assert_eq!(
            path.steps(),
            &[
                PathStep::Field("lens".into()),
                PathStep::Index(2),
                PathStep::Field("n".into())
            ]
        );
    }

    #[test]
    fn test_parse__malformed__then_metadata_error() {
        for bad in ["", "a..b", "[1]", "a[x]", "a[1", "event.fields", "a.", "a b"] {
            assert!(
                matches!(FieldPath::parse(bad), Err(MetadataError::InvalidFieldPath { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve__sibling_field__then_found() {
        let mut ctx = DecodeContext::new(ScopeValues::default(), PathRoot::EventFields);
        ctx.enter_struct();
        ctx.commit("len", uint(3));
        let path = FieldPath::parse("len").unwrap();
        assert_eq!(ctx.resolve_length(&path, 0).unwrap(), 3);

        let absolute = FieldPath::parse("event.fields.len").unwrap();
        assert_eq!(ctx.resolve_length(&absolute, 0).unwrap(), 3);
    }

    #[test]
    fn test_resolve__forward_reference__then_playback_error() {
        let mut ctx = DecodeContext::new(ScopeValues::default(), PathRoot::EventFields);
        ctx.enter_struct();
        let path = FieldPath::parse("len").unwrap();
        let err = ctx.resolve(&path, 17).unwrap_err();
        assert!(matches!(err, PlaybackError::UnresolvedPath { byte_offset: 17, .. }));
    }

    #[test]
    fn test_resolve__outer_frame__then_innermost_wins() {
        let mut ctx = DecodeContext::new(ScopeValues::default(), PathRoot::EventFields);
        ctx.enter_struct();
        ctx.commit("n", uint(1));
        ctx.commit("m", uint(9));
        ctx.enter_struct();
        ctx.commit("n", uint(2));
        let n = FieldPath::parse("n").unwrap();
        let m = FieldPath::parse("m").unwrap();
        assert_eq!(ctx.resolve_length(&n, 0).unwrap(), 2);
        assert_eq!(ctx.resolve_length(&m, 0).unwrap(), 9);
        let inner = ctx.exit_struct();
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_resolve__completed_scope_with_index__then_walks_array() {
        let context = StructValue::new(vec![(
            "sizes".into(),
            FieldValue::Array(vec![uint(4), uint(7)]),
        )]);
        let scopes = ScopeValues {
            stream_packet_context: Some(&context),
            ..ScopeValues::default()
        };
        let ctx = DecodeContext::new(scopes, PathRoot::EventFields);
        let path = FieldPath::parse("stream.packet.context.sizes[1]").unwrap();
        assert_eq!(ctx.resolve_length(&path, 0).unwrap(), 7);

        let missing = FieldPath::parse("event.context.sizes").unwrap();
        assert!(ctx.resolve(&missing, 0).is_err());
    }

    #[test]
    fn test_resolve_length__string_value__then_not_an_integer() {
        let mut ctx = DecodeContext::new(ScopeValues::default(), PathRoot::EventFields);
        ctx.enter_struct();
        ctx.commit("name", FieldValue::String("x".into()));
        let path = FieldPath::parse("name").unwrap();
        assert!(matches!(
            ctx.resolve_length(&path, 0),
            Err(PlaybackError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn test_field_path__nested_names__then_dotted() {
        let mut ctx = DecodeContext::new(ScopeValues::default(), PathRoot::EventFields);
        ctx.push_name("outer");
        ctx.push_name("items");
        ctx.push_name("[2]");
        assert_eq!(ctx.field_path(), "event.fields.outer.items[2]");
    }
}
