use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::catalog::{CommandCatalog, CommandSpec, non_zero};
use crate::error::CatalogError;

/// Name of the reserved top-level section holding service settings.
pub const SETTINGS_SECTION: &str = "terminal_eye";

/// Keys accepted at top level besides command definitions.
const TOP_LEVEL_DEFAULT_KEYS: &[&str] = &["default_force_uid", "default_force_gid"];

/// Port used when neither the command line nor the document sets one.
pub const DEFAULT_PORT: u16 = 1234;

/// Service-wide settings from the `terminal_eye` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSettings {
    /// Listen port (default: 1234)
    #[serde(default)]
    pub port: Option<u16>,

    /// Serve HTTPS/WSS instead of plain HTTP/WS.
    #[serde(default)]
    pub ssl: bool,

    /// PEM private key, required when `ssl` is set.
    #[serde(default)]
    pub ssl_key: Option<PathBuf>,

    /// PEM certificate chain, required when `ssl` is set.
    #[serde(default)]
    pub ssl_cert: Option<PathBuf>,

    #[serde(default)]
    pub default_force_uid: Option<u32>,

    #[serde(default)]
    pub default_force_gid: Option<u32>,
}

impl ServiceSettings {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// The parsed configuration document.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub settings: ServiceSettings,
    pub catalog: CommandCatalog,
}

impl GatewayConfig {
    /// Parse a configuration document.
    ///
    /// Every top-level key other than `terminal_eye` and the
    /// `default_force_*` keys is a command definition.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON, a malformed settings section or
    /// any invalid command definition.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let Value::Object(mut doc) = serde_json::from_str::<Value>(text)? else {
            return Err(CatalogError::NotAnObject);
        };

        let settings: ServiceSettings = match doc.remove(SETTINGS_SECTION) {
            Some(section) => {
                serde_json::from_value(section).map_err(CatalogError::InvalidSettings)?
            }
            None => ServiceSettings::default(),
        };

        let top_uid = take_id(&mut doc, TOP_LEVEL_DEFAULT_KEYS[0])?;
        let top_gid = take_id(&mut doc, TOP_LEVEL_DEFAULT_KEYS[1])?;

        let default_uid = non_zero(settings.default_force_uid).or(non_zero(top_uid));
        let default_gid = non_zero(settings.default_force_gid).or(non_zero(top_gid));

        let mut catalog = CommandCatalog::new(default_uid, default_gid);
        for (name, definition) in doc {
            let spec = CommandSpec::from_json(&name, definition)?;
            catalog = catalog.with_command(name, spec);
        }

        Ok(Self { settings, catalog })
    }
}

fn take_id(doc: &mut Map<String, Value>, key: &str) -> Result<Option<u32>, CatalogError> {
    doc.remove(key)
        .map(serde_json::from_value::<u32>)
        .transpose()
        .map_err(CatalogError::InvalidSettings)
}
