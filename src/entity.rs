//! Capability traits for values that need custom rendering in logs.
//!
//! Instead of inspecting types at runtime, domain types opt in by
//! implementing [`LoggableEntity`] (persisted objects, logged as
//! `<key>_id`) or [`LoggableId`] (typed identifier wrappers, logged as
//! their text form).

use crate::error::EntityError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

/// A persisted domain object that should be logged by identifier only.
///
/// Events are processed after the unit of work that loaded the object may
/// have finished, so implementations must answer from state that is
/// already in memory. Never issue a query or lazy load from
/// [`detached_id`](LoggableEntity::detached_id).
pub trait LoggableEntity: Send + Sync {
    /// Short type name, e.g. `User`.
    fn entity_name(&self) -> &str;

    /// Primary key read from already-loaded state.
    ///
    /// `Ok(None)` means the key was never loaded (e.g. an unsaved object).
    fn detached_id(&self) -> Result<Option<String>, EntityError>;
}

/// A typed identifier such as `UserId` or a prefixed type id.
pub trait LoggableId: fmt::Display + Send + Sync {}

/// Attribute snapshot kept by an entity after it has been loaded.
///
/// Persistence layers that keep a per-object map of loaded attributes can
/// embed this to implement [`LoggableEntity::detached_id`] without
/// touching the database. An expired snapshot answers with
/// [`EntityError::Expired`] rather than reloading.
#[derive(Debug, Default)]
pub struct CachedAttributes {
    values: RwLock<BTreeMap<String, String>>,
    expired: RwLock<bool>,
}

impl CachedAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = attributes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        CachedAttributes {
            values: RwLock::new(values),
            expired: RwLock::new(false),
        }
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(name.into(), value.into());
        }
    }

    /// Mark the snapshot stale, as a session does after a commit.
    pub fn expire(&self) {
        if let Ok(mut expired) = self.expired.write() {
            *expired = true;
        }
    }

    /// Read a loaded attribute. Missing attributes are `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<String>, EntityError> {
        let values = self.values.read().map_err(|_| EntityError::Poisoned)?;
        Ok(values.get(name).cloned())
    }

    /// Read a loaded attribute, refusing if the snapshot was expired and
    /// the attribute is gone.
    pub fn get_fresh(&self, name: &str) -> Result<Option<String>, EntityError> {
        let expired = *self.expired.read().map_err(|_| EntityError::Poisoned)?;
        match self.get(name)? {
            Some(value) => Ok(Some(value)),
            None if expired => Err(EntityError::Expired(name.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_attributes_read_without_reload() {
        let attrs = CachedAttributes::with([("id", "42")]);
        attrs.expire();
        assert_eq!(attrs.get("id").unwrap(), Some("42".to_string()));
        assert_eq!(attrs.get_fresh("id").unwrap(), Some("42".to_string()));
    }

    #[test]
    fn expired_missing_attribute_is_an_error() {
        let attrs = CachedAttributes::new();
        assert_eq!(attrs.get_fresh("id").unwrap(), None);
        attrs.expire();
        assert!(matches!(attrs.get_fresh("id"), Err(EntityError::Expired(_))));
    }
}
