//! Loads table definitions from JSON files
//!
//! Each `*.json` file under the schema directory describes one table:
//!
//! ```json
//! {
//!   "name": "dogs",
//!   "primary_key": "id",
//!   "schema": { "type": "object", "required": ["id"] }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::registry::SchemaRegistry;
use crate::schema::SchemaDefinition;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    name: String,
    primary_key: String,
    #[serde(default = "empty_object")]
    schema: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Reads table definitions from a directory tree
pub struct SchemaLoader {
    root: PathBuf,
}

impl SchemaLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse every definition file, in path order. A missing directory yields nothing.
    pub fn load(&self) -> Result<Vec<SchemaDefinition>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path.to_path_buf());
            }
        }
        paths.sort();

        paths.iter().map(|path| load_file(path)).collect()
    }

    /// Load all definitions into `registry`, stopping at the first duplicate
    pub fn load_into(&self, registry: &mut SchemaRegistry) -> Result<usize> {
        let definitions = self.load()?;
        let count = definitions.len();
        registry.register_many(definitions)?;
        Ok(count)
    }
}

fn load_file(path: &Path) -> Result<SchemaDefinition> {
    let content = fs::read_to_string(path)?;
    let file: SchemaFile = serde_json::from_str(&content).map_err(|e| StoreError::InvalidSchema {
        name: path.display().to_string(),
        reason: e.to_string(),
    })?;

    debug!(path = %path.display(), table = %file.name, "loaded schema file");
    SchemaDefinition::from_json_schema(file.name, file.primary_key, file.schema)
}
