//! Declarative resource manifest: typed declarations, output bindings, and
//! the dependency graph between them.
//!
//! A manifest is parsed from TOML, validated (unknown references, self
//! references, cycles), and ordered topologically so convergence can create
//! dependencies before dependents and tear them down in reverse.

pub mod expr;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vars::VarDecl;
use expr::ExprSegment;

/// A scalar attribute value: string, integer, or boolean.
///
/// String values may embed `${var.NAME}` and `${ref.RESOURCE.ATTRIBUTE}`
/// expressions until resolution.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Number(i64),
    /// UTF-8 text, possibly containing expressions before resolution.
    String(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value}"),
        }
    }
}

/// A named, typed description of one desired cloud object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceDecl {
    /// Logical name, unique within the manifest.
    pub name: String,
    /// Provider resource kind (for example `network` or `instance`).
    pub kind: String,
    /// Desired attributes; string values may contain expressions.
    pub attrs: BTreeMap<String, AttrValue>,
}

impl ResourceDecl {
    /// Returns the logical names of declarations this one references.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut targets = BTreeSet::new();
        for segments in self.parsed_attrs() {
            for segment in segments {
                if let ExprSegment::Ref { resource, .. } = segment {
                    targets.insert(resource);
                }
            }
        }
        targets
    }

    /// Returns the variable names referenced by this declaration.
    #[must_use]
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for segments in self.parsed_attrs() {
            for segment in segments {
                if let ExprSegment::Var(name) = segment {
                    names.insert(name);
                }
            }
        }
        names
    }

    fn parsed_attrs(&self) -> impl Iterator<Item = Vec<ExprSegment>> + '_ {
        self.attrs.values().filter_map(|value| match value {
            AttrValue::String(raw) => expr::parse(raw).ok(),
            AttrValue::Bool(_) | AttrValue::Number(_) => None,
        })
    }
}

/// A named value derived from a declaration's runtime attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputSpec {
    /// Output name, unique within the manifest.
    pub name: String,
    /// Logical name of the owning declaration.
    pub resource: String,
    /// Attribute read from the owning declaration's snapshot.
    pub attribute: String,
}

/// Errors raised while loading or validating a manifest.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// Raised when the manifest file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the manifest TOML cannot be parsed.
    #[error("failed to parse manifest: {0}")]
    Parse(String),
    /// Raised when a declaration has an empty kind.
    #[error("declaration {declaration} has an empty kind")]
    EmptyKind {
        /// Declaration with the missing kind.
        declaration: String,
    },
    /// Raised when an attribute expression cannot be parsed.
    #[error("invalid expression in {declaration}.{attribute}: {message}")]
    Expression {
        /// Declaration holding the attribute.
        declaration: String,
        /// Attribute holding the expression.
        attribute: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a declaration references an undeclared resource.
    #[error("{declaration} references unknown resource {target}")]
    UnknownReference {
        /// Declaration holding the reference.
        declaration: String,
        /// Logical name that is not declared.
        target: String,
    },
    /// Raised when a declaration references itself.
    #[error("{declaration} references itself")]
    SelfReference {
        /// Declaration holding the self reference.
        declaration: String,
    },
    /// Raised when the reference graph contains a cycle.
    #[error("declaration cycle involving: {}", involved.join(", "))]
    Cycle {
        /// Declarations that could not be ordered.
        involved: Vec<String>,
    },
    /// Raised when an output names an undeclared resource.
    #[error("output {output} reads from unknown resource {resource}")]
    UnknownOutputResource {
        /// Output holding the dangling reference.
        output: String,
        /// Logical name that is not declared.
        resource: String,
    },
}

/// A validated, topologically ordered resource manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    resources: Vec<ResourceDecl>,
    outputs: Vec<OutputSpec>,
    vars: BTreeMap<String, VarDecl>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestDoc {
    #[serde(default)]
    resource: BTreeMap<String, ResourceDoc>,
    #[serde(default)]
    output: BTreeMap<String, OutputDoc>,
    #[serde(default)]
    var: BTreeMap<String, VarDecl>,
}

#[derive(Debug, Deserialize)]
struct ResourceDoc {
    kind: String,
    #[serde(default)]
    attrs: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Deserialize)]
struct OutputDoc {
    resource: String,
    attribute: String,
}

impl Manifest {
    /// Parses and validates a manifest from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when parsing fails, a reference dangles, or
    /// the declarations cannot be ordered.
    pub fn from_toml_str(contents: &str) -> Result<Self, GraphError> {
        let doc: ManifestDoc =
            toml::from_str(contents).map_err(|err| GraphError::Parse(err.to_string()))?;

        let declared: Vec<ResourceDecl> = doc
            .resource
            .into_iter()
            .map(|(name, resource)| ResourceDecl {
                name,
                kind: resource.kind.trim().to_owned(),
                attrs: resource.attrs,
            })
            .collect();

        let outputs: Vec<OutputSpec> = doc
            .output
            .into_iter()
            .map(|(name, output)| OutputSpec {
                name,
                resource: output.resource,
                attribute: output.attribute,
            })
            .collect();

        let manifest = Self {
            resources: order_declarations(declared)?,
            outputs,
            vars: doc.var,
        };
        manifest.validate_outputs()?;
        Ok(manifest)
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Io`] when the file cannot be read, plus any
    /// error from [`Manifest::from_toml_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, GraphError> {
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path.file_name().ok_or_else(|| GraphError::Io {
            path: path.to_path_buf(),
            message: String::from("manifest path is missing a filename"),
        })?;

        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
            GraphError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let contents = dir.read_to_string(file_name).map_err(|err| GraphError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        Self::from_toml_str(&contents)
    }

    /// Declarations in dependency order (dependencies before dependents).
    #[must_use]
    pub fn resources(&self) -> &[ResourceDecl] {
        &self.resources
    }

    /// Declared output bindings.
    #[must_use]
    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    /// Declared variables and their defaults.
    #[must_use]
    pub const fn vars(&self) -> &BTreeMap<String, VarDecl> {
        &self.vars
    }

    /// Looks up one declaration by logical name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|decl| decl.name == name)
    }

    /// All variable names referenced anywhere in the manifest.
    #[must_use]
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .flat_map(ResourceDecl::referenced_variables)
            .collect()
    }

    fn validate_outputs(&self) -> Result<(), GraphError> {
        for output in &self.outputs {
            if self.resource(&output.resource).is_none() {
                return Err(GraphError::UnknownOutputResource {
                    output: output.name.clone(),
                    resource: output.resource.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Validates references and returns declarations in topological order.
///
/// Ordering is deterministic: among declarations whose dependencies are all
/// satisfied, the lexicographically smallest name is emitted first.
fn order_declarations(declared: Vec<ResourceDecl>) -> Result<Vec<ResourceDecl>, GraphError> {
    let names: BTreeSet<String> = declared.iter().map(|decl| decl.name.clone()).collect();

    let mut by_name = BTreeMap::new();
    let mut pending_deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for decl in declared {
        validate_expressions(&decl)?;
        if decl.kind.is_empty() {
            return Err(GraphError::EmptyKind {
                declaration: decl.name.clone(),
            });
        }

        let deps = decl.dependencies();
        for target in &deps {
            if *target == decl.name {
                return Err(GraphError::SelfReference {
                    declaration: decl.name.clone(),
                });
            }
            if !names.contains(target) {
                return Err(GraphError::UnknownReference {
                    declaration: decl.name.clone(),
                    target: target.clone(),
                });
            }
        }
        pending_deps.insert(decl.name.clone(), deps);
        by_name.insert(decl.name.clone(), decl);
    }

    let mut ordered = Vec::with_capacity(by_name.len());
    while !pending_deps.is_empty() {
        let ready: Option<String> = pending_deps
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(name, _)| name.clone());

        let Some(name) = ready else {
            return Err(GraphError::Cycle {
                involved: pending_deps.keys().cloned().collect(),
            });
        };

        pending_deps.remove(&name);
        for deps in pending_deps.values_mut() {
            deps.remove(&name);
        }
        if let Some(decl) = by_name.remove(&name) {
            ordered.push(decl);
        }
    }

    Ok(ordered)
}

fn validate_expressions(decl: &ResourceDecl) -> Result<(), GraphError> {
    for (attribute, value) in &decl.attrs {
        if let AttrValue::String(raw) = value
            && let Err(err) = expr::parse(raw)
        {
            return Err(GraphError::Expression {
                declaration: decl.name.clone(),
                attribute: attribute.clone(),
                message: err.to_string(),
            });
        }
    }
    Ok(())
}
