//! The immutable registry of permitted commands.
//!
//! Built once from the configuration document before any connection is
//! accepted, then shared read-only with every session.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CatalogError;
use crate::types::ArgType;

/// Schema for one named argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    /// Empty when the configuration omitted it; reported per request.
    pub name: String,
    /// `None` means the argument is untyped.
    pub arg_type: Option<ArgType>,
    pub required: bool,
    /// Applied to string values only.
    pub pattern: Option<Regex>,
}

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub script: String,
    pub args: Vec<ArgSpec>,
    pub force_uid: Option<u32>,
    pub force_gid: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ArgSpecDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    arg_type: Option<ArgType>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    regex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandSpecDoc {
    script: String,
    #[serde(default)]
    args: Vec<ArgSpecDoc>,
    #[serde(default)]
    force_uid: Option<u32>,
    #[serde(default)]
    force_gid: Option<u32>,
}

/// Zero in a UID/GID field means "no override".
pub(crate) fn non_zero(id: Option<u32>) -> Option<u32> {
    id.filter(|&id| id != 0)
}

impl CommandSpec {
    /// Parse and check one command definition.
    ///
    /// # Errors
    ///
    /// Returns an error when the definition is malformed, the script is
    /// empty, an argument name repeats, or a regex does not compile.
    pub fn from_json(command: &str, value: Value) -> Result<Self, CatalogError> {
        let doc: CommandSpecDoc =
            serde_json::from_value(value).map_err(|source| CatalogError::InvalidCommand {
                command: command.to_string(),
                source,
            })?;

        if doc.script.trim().is_empty() {
            return Err(CatalogError::EmptyScript(command.to_string()));
        }

        let mut seen = HashSet::new();
        let mut args = Vec::with_capacity(doc.args.len());
        for arg in doc.args {
            let name = arg.name.unwrap_or_default();
            if !name.is_empty() && !seen.insert(name.clone()) {
                return Err(CatalogError::DuplicateArgument {
                    command: command.to_string(),
                    arg: name,
                });
            }
            let pattern = arg
                .regex
                .as_deref()
                .filter(|re| !re.is_empty())
                .map(Regex::new)
                .transpose()
                .map_err(|source| CatalogError::InvalidPattern {
                    command: command.to_string(),
                    arg: name.clone(),
                    source,
                })?;
            args.push(ArgSpec {
                name,
                arg_type: arg.arg_type,
                required: arg.required,
                pattern,
            });
        }

        Ok(Self {
            script: doc.script,
            args,
            force_uid: non_zero(doc.force_uid),
            force_gid: non_zero(doc.force_gid),
        })
    }

    /// Indices of arguments declared without a name.
    pub fn unnamed_args(&self) -> impl Iterator<Item = usize> + '_ {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.name.is_empty())
            .map(|(i, _)| i)
    }
}

/// Mapping from command name to its definition plus the catalog-wide
/// privilege defaults.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    commands: BTreeMap<String, CommandSpec>,
    default_uid: Option<u32>,
    default_gid: Option<u32>,
}

impl CommandCatalog {
    #[must_use]
    pub fn new(default_uid: Option<u32>, default_gid: Option<u32>) -> Self {
        Self {
            commands: BTreeMap::new(),
            default_uid: non_zero(default_uid),
            default_gid: non_zero(default_gid),
        }
    }

    /// Add or replace a command; only used while building the catalog.
    #[must_use]
    pub fn with_command(mut self, name: impl Into<String>, spec: CommandSpec) -> Self {
        self.commands.insert(name.into(), spec);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandSpec)> {
        self.commands.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn default_uid(&self) -> Option<u32> {
        self.default_uid
    }

    #[must_use]
    pub fn default_gid(&self) -> Option<u32> {
        self.default_gid
    }
}
