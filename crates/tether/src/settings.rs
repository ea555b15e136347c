//! Bridge settings

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime and bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Joins a composite member's name with the names it flattens (`P1` + `X`).
    pub field_separator: String,
    pub open_std_libs: bool,
    /// Register record types on first exposure when the host has not.
    pub auto_register_structs: bool,
    /// Heap cap for the runtime, in bytes.
    pub memory_limit: Option<usize>,
    pub chunk_name: String,
}

impl Settings {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            field_separator: "_".to_string(),
            open_std_libs: true,
            auto_register_structs: true,
            memory_limit: None,
            chunk_name: "tether".to_string(),
        }
    }
}
