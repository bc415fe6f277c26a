//! TOML configuration loading.
//!
//! The core crates never read the environment; the embedding process decides
//! where configuration comes from and hands the parsed structs down.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Parse a TOML document into `T`.
///
/// # Errors
///
/// Returns `Error::TomlParseFailed` if the document is not valid for `T`.
pub fn parse_toml<T: DeserializeOwned>(origin: &Path, content: &str) -> Result<T> {
    toml::from_str(content).map_err(|e| Error::toml_parse_failed(origin, e.to_string()))
}

/// Read and parse a TOML file into `T`.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be read, or
/// `Error::TomlParseFailed` if its content does not match `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!(path = %path.display(), "Loading configuration");
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_toml(path, &content)
}
