//! Schema Registry
//!
//! Maps table names to their definitions. Registration is append-only: a table
//! name can be registered once and there is no unregistration.

use tracing::info;

use crate::error::{Result, StoreError};
use crate::schema::SchemaDefinition;

/// In-memory table name → definition mapping, kept in registration order
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    definitions: Vec<SchemaDefinition>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Fails if the table name is already taken.
    pub fn register(&mut self, definition: SchemaDefinition) -> Result<()> {
        if self.contains(definition.name()) {
            return Err(StoreError::DuplicateSchema {
                name: definition.name().to_string(),
            });
        }

        info!(table = definition.name(), primary_key = definition.primary_key(), "registered schema");
        self.definitions.push(definition);
        Ok(())
    }

    /// Register each definition in order, stopping at the first duplicate.
    ///
    /// Definitions registered before the failing one stay registered.
    pub fn register_many<I>(&mut self, definitions: I) -> Result<()>
    where
        I: IntoIterator<Item = SchemaDefinition>,
    {
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(())
    }

    /// Get the definition of `table`
    pub fn lookup(&self, table: &str) -> Result<&SchemaDefinition> {
        self.definitions
            .iter()
            .find(|d| d.name() == table)
            .ok_or_else(|| StoreError::UnregisteredSchema {
                name: table.to_string(),
            })
    }

    /// All definitions, in registration order
    pub fn list(&self) -> &[SchemaDefinition] {
        &self.definitions
    }

    pub fn contains(&self, table: &str) -> bool {
        self.definitions.iter().any(|d| d.name() == table)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
