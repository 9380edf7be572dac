use indexmap::IndexMap;

use crate::device::types::{PeripheralId, PeripheralRef};

/// Peripherals discovered during the current scan, unique by id and kept in first-seen order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    discovered: IndexMap<PeripheralId, PeripheralRef>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the peripheral was added. The name must match `name_filter` exactly.
    pub fn on_advertisement(&mut self, peripheral: PeripheralRef, name_filter: &str) -> bool {
        if peripheral.name != name_filter || self.discovered.contains_key(&peripheral.id) {
            return false;
        }

        self.discovered.insert(peripheral.id.clone(), peripheral);
        true
    }

    pub fn reset(&mut self) {
        self.discovered.clear();
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&PeripheralRef> {
        self.discovered.get(id)
    }

    pub fn list(&self) -> Vec<PeripheralRef> {
        self.discovered.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_by_exact_name() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.on_advertisement(PeripheralRef::new("a", "SYNC"), "SYNC"));
        assert!(!registry.on_advertisement(PeripheralRef::new("b", "OTHER"), "SYNC"));
        assert!(!registry.on_advertisement(PeripheralRef::new("c", "sync"), "SYNC"));
        assert!(!registry.on_advertisement(PeripheralRef::new("d", "SYNC "), "SYNC"));

        assert_eq!(registry.list(), vec![PeripheralRef::new("a", "SYNC")]);
    }

    #[test]
    fn test_deduplicates_and_keeps_first_seen_order() {
        let mut registry = DeviceRegistry::new();
        let events = ["c", "a", "c", "b", "a", "c", "b"];
        for id in events {
            registry.on_advertisement(PeripheralRef::new(id, "SYNC"), "SYNC");
        }

        let ids: Vec<String> = registry.list().into_iter().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reset_clears() {
        let mut registry = DeviceRegistry::new();
        registry.on_advertisement(PeripheralRef::new("a", "SYNC"), "SYNC");
        registry.reset();
        assert!(registry.list().is_empty());
        assert!(registry.get(&PeripheralId::new("a")).is_none());

        // the same peripheral may be discovered again after a reset
        assert!(registry.on_advertisement(PeripheralRef::new("a", "SYNC"), "SYNC"));
    }
}
