//! Shared types for the Terminal Eye command gateway: the command catalog,
//! the wire protocol and the argument schema validator.

pub mod catalog;
pub mod config;
pub mod error;
pub mod schema;
pub mod types;

pub use catalog::{ArgSpec, CommandCatalog, CommandSpec};
pub use config::{GatewayConfig, ServiceSettings};
pub use error::{CatalogError, Expected, RequestError, ValidationError};
pub use schema::validate;
pub use types::*;
