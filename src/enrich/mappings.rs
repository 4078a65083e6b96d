//! Code-to-name lookup tables.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const BUNDLED_MAPPINGS: &str = include_str!("../../data/mapping_properties.json");

/// Display names for `UserType` and `RecordType` codes
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MappingTables {
    #[serde(rename = "UserType", default)]
    user_type: HashMap<String, String>,
    #[serde(rename = "RecordType", default)]
    record_type: HashMap<String, String>,
}

impl MappingTables {
    /// Tables shipped with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_MAPPINGS)
    }

    /// Parse tables from JSON (`{"UserType": {...}, "RecordType": {...}}`)
    pub fn from_json(json: &str) -> Result<Self> {
        let tables: Self = serde_json::from_str(json)?;
        if tables.user_type.is_empty() && tables.record_type.is_empty() {
            return Err(Error::config(
                "AuditLogMappingsFile",
                "mapping file defines neither UserType nor RecordType",
            ));
        }
        Ok(tables)
    }

    /// Load from `path`, or the bundled tables when no path is configured
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                Self::from_json(&json)
            }
            None => Self::bundled(),
        }
    }

    /// Name for a user type code
    pub fn user_type_name(&self, code: &str) -> Option<&str> {
        self.user_type.get(code.trim()).map(String::as_str)
    }

    /// Name for a record type code
    pub fn record_type_name(&self, code: &str) -> Option<&str> {
        self.record_type.get(code.trim()).map(String::as_str)
    }
}
