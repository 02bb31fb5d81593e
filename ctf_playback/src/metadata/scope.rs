//! Lexical scopes used while compiling metadata.
//!
//! Scopes live in an arena and refer to their parent by [`ScopeId`], so the
//! tree has no ownership cycles. Declared types start out *pending* (holding
//! their syntax) and are compiled the first time somebody resolves them,
//! which lets a declaration refer to names declared later in the same or an
//! enclosing scope.

use std::{collections::BTreeMap, fmt};

use crate::{
    error::{MetadataError, MetadataResult},
    metadata::ast::{ArrayDimension, PropertyValue, TypeSpecifier},
    types::TypeDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

/// Type names live in four separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeName {
    Alias(String),
    Struct(String),
    Variant(String),
    Enum(String),
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Alias(name) => write!(f, "{name}"),
            TypeName::Struct(name) => write!(f, "struct {name}"),
            TypeName::Variant(name) => write!(f, "variant {name}"),
            TypeName::Enum(name) => write!(f, "enum {name}"),
        }
    }
}

#[derive(Debug)]
enum TypeEntry<'a> {
    Pending {
        spec: &'a TypeSpecifier,
        dims: &'a [ArrayDimension],
    },
    Resolving,
    Resolved(TypeDescriptor),
}

#[derive(Debug)]
struct ScopeNode<'a> {
    name: String,
    parent: Option<ScopeId>,
    children: BTreeMap<String, ScopeId>,
    types: BTreeMap<TypeName, TypeEntry<'a>>,
    properties: BTreeMap<String, &'a PropertyValue>,
}

/// Compiles the syntax of a pending declaration inside the scope that
/// declared it.
pub trait CompileType<'a> {
    fn compile_declared(
        &mut self,
        scopes: &mut ScopeTree<'a>,
        owner: ScopeId,
        spec: &'a TypeSpecifier,
        dims: &'a [ArrayDimension],
    ) -> MetadataResult<TypeDescriptor>;
}

#[derive(Debug)]
pub struct ScopeTree<'a> {
    nodes: Vec<ScopeNode<'a>>,
}

impl Default for ScopeTree<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ScopeTree<'a> {
    pub fn new() -> Self {
        Self {
            nodes: vec![ScopeNode {
                name: "global".to_string(),
                parent: None,
                children: BTreeMap::new(),
                types: BTreeMap::new(),
                properties: BTreeMap::new(),
            }],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Creates a child scope. Repeated names get a numeric suffix.
    pub fn add_child(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        let id = ScopeId(self.nodes.len());
        let mut key = name.to_string();
        let mut suffix = 1;
        while self.nodes[parent.0].children.contains_key(&key) {
            suffix += 1;
            key = format!("{name}#{suffix}");
        }
        self.nodes[parent.0].children.insert(key.clone(), id);
        self.nodes.push(ScopeNode {
            name: key,
            parent: Some(parent),
            children: BTreeMap::new(),
            types: BTreeMap::new(),
            properties: BTreeMap::new(),
        });
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.nodes[scope.0].parent
    }

    pub fn child(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        self.nodes[scope.0].children.get(name).copied()
    }

    /// Dotted path from the root, used in diagnostics.
    pub fn describe(&self, scope: ScopeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            names.push(self.nodes[id.0].name.as_str());
            current = self.nodes[id.0].parent;
        }
        if names.len() > 1 {
            names.pop();
        }
        names.reverse();
        names.join(".")
    }

    fn insert(&mut self, scope: ScopeId, name: TypeName, entry: TypeEntry<'a>) -> MetadataResult<()> {
        if self.nodes[scope.0].types.contains_key(&name) {
            return Err(MetadataError::DuplicateType {
                name: name.to_string(),
                scope: self.describe(scope),
            });
        }
        self.nodes[scope.0].types.insert(name, entry);
        Ok(())
    }

    /// Registers a declaration whose body is compiled on first use.
    pub fn declare_pending(
        &mut self,
        scope: ScopeId,
        name: TypeName,
        spec: &'a TypeSpecifier,
        dims: &'a [ArrayDimension],
    ) -> MetadataResult<()> {
        self.insert(scope, name, TypeEntry::Pending { spec, dims })
    }

    pub fn declare(&mut self, scope: ScopeId, name: TypeName, ty: TypeDescriptor) -> MetadataResult<()> {
        self.insert(scope, name, TypeEntry::Resolved(ty))
    }

    pub fn is_declared_locally(&self, scope: ScopeId, name: &TypeName) -> bool {
        self.nodes[scope.0].types.contains_key(name)
    }

    fn owner_of(&self, scope: ScopeId, name: &TypeName) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.nodes[id.0].types.contains_key(name) {
                return Some(id);
            }
            current = self.nodes[id.0].parent;
        }
        None
    }

    /// Finds `name` in `scope` or its nearest ancestor declaring it and
    /// compiles it there if it is still pending.
    pub fn resolve<C>(&mut self, scope: ScopeId, name: &TypeName, compiler: &mut C) -> MetadataResult<TypeDescriptor>
    where
        C: CompileType<'a>,
    {
        let owner = self
            .owner_of(scope, name)
            .ok_or_else(|| MetadataError::UnresolvedType {
                name: name.to_string(),
                scope: self.describe(scope),
            })?;

        let entry = self.nodes[owner.0]
            .types
            .get_mut(name)
            .map(|entry| std::mem::replace(entry, TypeEntry::Resolving));
        let (spec, dims) = match entry {
            Some(TypeEntry::Resolved(ty)) => {
                self.store(owner, name, ty.clone());
                return Ok(ty);
            }
            Some(TypeEntry::Pending { spec, dims }) => (spec, dims),
            Some(TypeEntry::Resolving) | None => {
                return Err(MetadataError::CyclicType {
                    name: name.to_string(),
                })
            }
        };

        let ty = compiler.compile_declared(self, owner, spec, dims)?;
        self.store(owner, name, ty.clone());
        Ok(ty)
    }

    fn store(&mut self, owner: ScopeId, name: &TypeName, ty: TypeDescriptor) {
        if let Some(entry) = self.nodes[owner.0].types.get_mut(name) {
            *entry = TypeEntry::Resolved(ty);
        }
    }

    pub fn set_property(&mut self, scope: ScopeId, name: &str, value: &'a PropertyValue) -> MetadataResult<()> {
        if self.nodes[scope.0].properties.contains_key(name) {
            return Err(MetadataError::DuplicateField {
                field: name.to_string(),
                scope: self.describe(scope),
            });
        }
        self.nodes[scope.0].properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Raw value of a property declared directly in `scope`.
    pub fn property(&self, scope: ScopeId, name: &str) -> Option<&'a PropertyValue> {
        self.nodes[scope.0].properties.get(name).copied()
    }

    pub fn properties(&self, scope: ScopeId) -> impl Iterator<Item = (&str, &'a PropertyValue)> + '_ {
        self.nodes[scope.0]
            .properties
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }
}
