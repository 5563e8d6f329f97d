//! User-declared particle attributes.
//!
//! The schema is fixed before particles exist. Every declared attribute
//! becomes one typed column in the [`ParticleStore`](crate::ParticleStore).

use glam::Vec2;

use crate::error::{Result, SimError};

/// Names reserved for the built-in columns.
pub const BUILTIN_ATTRIBUTES: &[&str] = &["position", "velocity", "force", "size", "color", "mass"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar,
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeValue {
    Scalar(f32),
    Vector(Vec2),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Scalar(_) => AttributeKind::Scalar,
            AttributeValue::Vector(_) => AttributeKind::Vector,
        }
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Scalar(value)
    }
}

impl From<Vec2> for AttributeValue {
    fn from(value: Vec2) -> Self {
        AttributeValue::Vector(value)
    }
}

/// A single extra attribute declaration
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub name: String,
    pub default: AttributeValue,
    /// Particles must provide a value on creation.
    pub required: bool,
}

impl AttributeDecl {
    pub fn scalar(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default: AttributeValue::Scalar(default),
            required: false,
        }
    }

    pub fn vector(name: impl Into<String>, default: Vec2) -> Self {
        Self {
            name: name.into(),
            default: AttributeValue::Vector(default),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn kind(&self) -> AttributeKind {
        self.default.kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSchema {
    attributes: Vec<AttributeDecl>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration, see [`AttributeSchema::declare`].
    pub fn with(mut self, decl: AttributeDecl) -> Result<Self> {
        self.declare(decl)?;
        Ok(self)
    }

    pub fn declare(&mut self, decl: AttributeDecl) -> Result<()> {
        if decl.name.is_empty() {
            return Err(SimError::schema("attribute name cannot be empty"));
        }
        if BUILTIN_ATTRIBUTES.contains(&decl.name.as_str()) {
            return Err(SimError::schema(format!(
                "'{}' is a built-in attribute",
                decl.name
            )));
        }
        if self.index_of(&decl.name).is_some() {
            return Err(SimError::schema(format!(
                "attribute '{}' is declared twice",
                decl.name
            )));
        }
        self.attributes.push(decl);
        Ok(())
    }

    pub fn attributes(&self) -> &[AttributeDecl] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Look up an attribute and check it has the expected kind.
    pub(crate) fn lookup(&self, name: &str, kind: AttributeKind) -> Result<usize> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| SimError::schema(format!("unknown attribute '{}'", name)))?;
        if self.attributes[idx].kind() != kind {
            return Err(SimError::schema(format!(
                "attribute '{}' is {:?}, not {:?}",
                name,
                self.attributes[idx].kind(),
                kind
            )));
        }
        Ok(idx)
    }

    /// Resolve the value of every declared attribute for a new particle,
    /// in declaration order.
    pub(crate) fn resolve(&self, provided: &[(String, AttributeValue)]) -> Result<Vec<AttributeValue>> {
        for (name, value) in provided {
            self.lookup(name, value.kind())?;
        }

        self.attributes
            .iter()
            .map(|decl| {
                match provided.iter().rev().find(|(name, _)| *name == decl.name) {
                    Some((_, value)) => Ok(*value),
                    None if decl.required => Err(SimError::schema(format!(
                        "missing required attribute '{}'",
                        decl.name
                    ))),
                    None => Ok(decl.default),
                }
            })
            .collect()
    }
}
