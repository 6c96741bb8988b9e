//! Fact-type and role identifiers.
//!
//! The compiler consults a schema to decide whether a type or role can
//! possibly have facts. A missing entry makes the branch unsatisfiable.

use std::collections::HashMap;

use crate::fact::Fact;

/// Read access to the identifiers known to a store.
pub trait Schema {
    /// Identifier of a fact type, if any fact of that type was ever stored.
    fn fact_type_id(&self, name: &str) -> Option<i64>;

    /// Identifier of a role declared by the fact type `defining_type_id`.
    fn role_id(&self, defining_type_id: i64, role: &str) -> Option<i64>;
}

/// An owned snapshot of fact-type and role identifiers.
///
/// Population is append-only: identifiers are never reassigned, so a
/// snapshot taken at any moment stays consistent with later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMap {
    fact_types: HashMap<String, i64>,
    roles: HashMap<(i64, String), i64>,
}

impl SchemaMap {
    /// An empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier for `name`, allocating one if needed.
    pub fn ensure_fact_type(&mut self, name: &str) -> i64 {
        if let Some(id) = self.fact_types.get(name) {
            return *id;
        }
        let id = next_id(self.fact_types.len());
        self.fact_types.insert(name.to_string(), id);
        id
    }

    /// Identifier for `role` on `defining_type_id`, allocating one if needed.
    pub fn ensure_role(&mut self, defining_type_id: i64, role: &str) -> i64 {
        let key = (defining_type_id, role.to_string());
        if let Some(id) = self.roles.get(&key) {
            return *id;
        }
        let id = next_id(self.roles.len());
        self.roles.insert(key, id);
        id
    }

    /// Register the type of `fact`, the types of its predecessors, and its roles.
    pub fn register_fact(&mut self, fact: &Fact) {
        let type_id = self.ensure_fact_type(fact.fact_type());
        for (role, predecessor) in fact.predecessor_references() {
            self.ensure_fact_type(&predecessor.fact_type);
            self.ensure_role(type_id, role);
        }
    }

    /// Number of fact types seen so far.
    #[must_use]
    pub fn fact_type_count(&self) -> usize {
        self.fact_types.len()
    }

    /// Number of roles seen so far.
    #[must_use]
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }
}

fn next_id(len: usize) -> i64 {
    i64::try_from(len).map_or(i64::MAX, |n| n + 1)
}

impl Schema for SchemaMap {
    fn fact_type_id(&self, name: &str) -> Option<i64> {
        self.fact_types.get(name).copied()
    }

    fn role_id(&self, defining_type_id: i64, role: &str) -> Option<i64> {
        self.roles.get(&(defining_type_id, role.to_string())).copied()
    }
}
