//! Index specifications shared by every backend.

use std::time::Duration;

use crate::{
    error::{StoreError, StoreResult},
    query::SortDirection,
};

/// An index over one or more fields.
///
/// # Example
///
/// ```ignore
/// let spec = IndexSpec::new([("category", SortDirection::Asc), ("value", SortDirection::Desc)]);
/// assert_eq!(spec.resolved_name(), "category_1_value_-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub keys: Vec<(String, SortDirection)>,
    pub name: Option<String>,
    pub background: bool,
    /// Expiry of a TTL index. Only valid on single-field indexes.
    pub ttl: Option<Duration>,
}

impl IndexSpec {
    pub fn new<K, I>(keys: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SortDirection)>,
    {
        Self {
            keys: keys.into_iter().map(|(field, direction)| (field.into(), direction)).collect(),
            name: None,
            background: false,
            ttl: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Turns this into a TTL index expiring entries `ttl` after the indexed time.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_ttl(&self) -> bool {
        self.ttl.is_some()
    }

    /// The explicit name, or one derived from the keys (`field_1_other_-1`).
    pub fn resolved_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .keys
                .iter()
                .map(|(field, direction)| format!("{field}_{}", direction.as_i32()))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an index without keys, with an empty field
    /// name, or a TTL index over more than one key.
    pub fn validate(&self) -> StoreResult<()> {
        if self.keys.is_empty() {
            return Err(StoreError::validation("index needs at least one key"));
        }

        if self.keys.iter().any(|(field, _)| field.is_empty()) {
            return Err(StoreError::validation("index key names must not be empty"));
        }

        if self.is_ttl() && self.keys.len() > 1 {
            return Err(StoreError::validation("a TTL index must have exactly one key"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_name_follows_keys() {
        let spec = IndexSpec::new([("category", SortDirection::Asc), ("value", SortDirection::Desc)]);
        assert_eq!(spec.resolved_name(), "category_1_value_-1");
        assert_eq!(spec.clone().name("by_cat").resolved_name(), "by_cat");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn invalid_specs() {
        let empty = IndexSpec::new(Vec::<(String, SortDirection)>::new());
        assert!(matches!(empty.validate(), Err(StoreError::Validation(_))));

        let compound_ttl = IndexSpec::new([("a", SortDirection::Asc), ("b", SortDirection::Asc)])
            .ttl(Duration::from_secs(60));
        assert!(matches!(compound_ttl.validate(), Err(StoreError::Validation(_))));

        let ttl = IndexSpec::new([("expires_at", SortDirection::Asc)]).ttl(Duration::from_secs(60));
        assert!(ttl.validate().is_ok());
    }
}
