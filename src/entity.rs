//! Per-type table identity: entity name, primary key, required fields and
//! timestamp policy, resolved once per type and cached.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// A record specialization, usually a unit struct naming one table.
///
/// ```
/// use rust_datalayer::{Entity, EntityConfig};
///
/// struct User;
///
/// impl Entity for User {
///     fn config() -> EntityConfig {
///         EntityConfig::new().required(["name", "email"])
///     }
/// }
/// ```
pub trait Entity: 'static {
    /// Values this specialization supplies. Anything left unset falls back
    /// to the defaults in [`Schema::resolve`].
    fn config() -> EntityConfig {
        EntityConfig::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityConfig {
    pub entity: Option<String>,
    pub primary: Option<String>,
    pub required: Option<Vec<String>>,
    pub timestamps: Option<bool>,
}

impl EntityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, name: impl Into<String>) -> Self {
        self.entity = Some(name.into());
        self
    }

    pub fn primary(mut self, column: impl Into<String>) -> Self {
        self.primary = Some(column.into());
        self
    }

    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = Some(enabled);
        self
    }
}

/// Resolved table identity for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub entity: String,
    pub primary: String,
    pub required: Vec<String>,
    /// Whether created/updated columns are expected. Informational only.
    pub timestamps: bool,
}

impl Schema {
    /// Fill in defaults, in order: entity, required, timestamps, primary.
    ///
    /// Empty strings count as unset. Resolving an already resolved schema
    /// yields the same schema.
    pub fn resolve(config: EntityConfig, type_name: &str) -> Schema {
        let entity = config
            .entity
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| entity_name(type_name));
        let required = config.required.unwrap_or_default();
        let timestamps = config.timestamps.unwrap_or(true);
        let primary = config
            .primary
            .filter(|column| !column.is_empty())
            .unwrap_or_else(|| "id".to_string());

        Schema {
            entity,
            primary,
            required,
            timestamps,
        }
    }

    /// Schema for `E`, resolved on first use and cached for the process.
    pub fn of<E: Entity>() -> Arc<Schema> {
        static REGISTRY: OnceLock<Mutex<HashMap<TypeId, Arc<Schema>>>> = OnceLock::new();
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let key = TypeId::of::<E>();

        if let Some(schema) = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(schema);
        }

        // Resolve outside the lock; `E::config()` is user code.
        let schema = Arc::new(Schema::resolve(E::config(), type_name::<E>()));
        tracing::debug!(
            entity = %schema.entity,
            primary = %schema.primary,
            required = ?schema.required,
            timestamps = schema.timestamps,
            "resolved entity schema"
        );

        // If another thread won the race, keep its value.
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(registry.entry(key).or_insert(schema))
    }
}

impl From<&Schema> for EntityConfig {
    fn from(schema: &Schema) -> Self {
        EntityConfig {
            entity: Some(schema.entity.clone()),
            primary: Some(schema.primary.clone()),
            required: Some(schema.required.clone()),
            timestamps: Some(schema.timestamps),
        }
    }
}

/// Lower-cased last path segment of a type name, generics dropped.
fn entity_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::")
        .next()
        .unwrap_or(base)
        .to_lowercase()
}
