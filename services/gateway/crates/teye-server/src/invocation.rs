//! Resolution of a validated request into a concrete invocation.

use teye_common::{ArgValue, CommandCatalog, CommandSpec};

/// A resolved command, ready to be handed to a [`ProcessSpawner`].
///
/// Arguments are discrete vector elements; nothing here is ever passed
/// through a shell.
///
/// [`ProcessSpawner`]: crate::runner::ProcessSpawner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Catalog name the client asked for.
    pub command: String,
    pub program: String,
    pub args: Vec<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Invocation {
    /// Build an invocation from validated values.
    ///
    /// UID and GID fall back to the catalog defaults when the command does
    /// not override them.
    #[must_use]
    pub fn build(
        command: &str,
        spec: &CommandSpec,
        values: &[ArgValue],
        catalog: &CommandCatalog,
    ) -> Self {
        Self {
            command: command.to_string(),
            program: spec.script.clone(),
            args: values.iter().map(ArgValue::to_arg).collect(),
            uid: spec.force_uid.or(catalog.default_uid()),
            gid: spec.force_gid.or(catalog.default_gid()),
        }
    }

    /// Human-readable command line for logs. Never executed.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
