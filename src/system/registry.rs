use std::collections::HashMap;

use crate::common::AbstractionId;

use super::abstraction::AbstractionKind;

/// Every abstraction a process hosts, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    pub abstractions: HashMap<AbstractionId, AbstractionKind>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            abstractions: HashMap::new(),
        }
    }

    /// Inserts `abstraction` unless its id is already taken. Returns whether
    /// it was inserted.
    pub fn add(&mut self, abstraction: AbstractionKind) -> bool {
        let id = abstraction.id().clone();
        if self.abstractions.contains_key(&id) {
            return false;
        }
        self.abstractions.insert(id, abstraction);
        true
    }

    pub fn contains(&self, id: &AbstractionId) -> bool {
        self.abstractions.contains_key(id)
    }

    pub fn get(&self, id: &AbstractionId) -> Option<&AbstractionKind> {
        self.abstractions.get(id)
    }

    pub fn get_mut(&mut self, id: &AbstractionId) -> Option<&mut AbstractionKind> {
        self.abstractions.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.abstractions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abstractions.is_empty()
    }

    /// Registered ids in lexical order, which keeps every child right after
    /// its parent.
    pub fn ids(&self) -> Vec<&AbstractionId> {
        let mut ids: Vec<_> = self.abstractions.keys().collect();
        ids.sort();
        ids
    }

    pub fn clear(&mut self) {
        self.abstractions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::PerfectLink;

    #[test]
    fn test_add_is_insert_if_absent() {
        let mut registry = Registry::new();
        let id = AbstractionId::from("app.pl");
        assert!(registry.add(PerfectLink::new(id.clone()).into()));
        assert!(!registry.add(PerfectLink::new(id.clone()).into()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).map(|a| a.kind()), Some("pl"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_sorted() {
        let mut registry = Registry::new();
        for raw in ["app.pl", "app", "app.beb.pl", "app.beb"] {
            registry.add(PerfectLink::new(AbstractionId::from(raw)).into());
        }
        let ids: Vec<_> = registry.ids().into_iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["app", "app.beb", "app.beb.pl", "app.pl"]);
    }
}
