// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Live bindings shared between the engine task and its handles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::event::DeviceId;
use crate::proxy::ProxyBinding;

/// Current binding of every known device, indexed by address and name.
///
/// Written only by the engine task; handles read it to hand out proxies.
#[derive(Debug, Default)]
pub(crate) struct DeviceTable {
    bindings: RwLock<HashMap<DeviceId, Arc<ProxyBinding>>>,
    names: RwLock<HashMap<String, DeviceId>>,
    changed: Notify,
}

impl DeviceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs a binding, returning the one it replaces.
    pub(crate) fn insert(&self, binding: Arc<ProxyBinding>) -> Option<Arc<ProxyBinding>> {
        let id = binding.descriptor().id().clone();
        let name = binding.descriptor().friendly_name().to_string();

        let previous = self.bindings.write().insert(id.clone(), binding);
        {
            let mut names = self.names.write();
            // Another device may already have taken over the old name
            if let Some(old) = &previous
                && names.get(old.descriptor().friendly_name()) == Some(&id)
            {
                names.remove(old.descriptor().friendly_name());
            }
            names.insert(name, id);
        }
        self.changed.notify_waiters();
        previous
    }

    pub(crate) fn remove(&self, device: &DeviceId) -> Option<Arc<ProxyBinding>> {
        let removed = self.bindings.write().remove(device)?;
        let mut names = self.names.write();
        if names.get(removed.descriptor().friendly_name()) == Some(device) {
            names.remove(removed.descriptor().friendly_name());
        }
        drop(names);
        self.changed.notify_waiters();
        Some(removed)
    }

    pub(crate) fn binding(&self, device: &DeviceId) -> Option<Arc<ProxyBinding>> {
        self.bindings.read().get(device).cloned()
    }

    pub(crate) fn by_name(&self, friendly_name: &str) -> Option<Arc<ProxyBinding>> {
        let id = self.names.read().get(friendly_name).cloned()?;
        self.binding(&id)
    }

    /// Looks a device up by IEEE address first, then by friendly name.
    pub(crate) fn resolve(&self, selector: &str) -> Option<Arc<ProxyBinding>> {
        let by_address = self.bindings.read().get(selector).cloned();
        by_address.or_else(|| self.by_name(selector))
    }

    pub(crate) fn ids(&self) -> Vec<DeviceId> {
        self.bindings.read().keys().cloned().collect()
    }

    pub(crate) fn all(&self) -> Vec<Arc<ProxyBinding>> {
        let mut bindings: Vec<_> = self.bindings.read().values().cloned().collect();
        bindings.sort_by(|a, b| a.descriptor().friendly_name().cmp(b.descriptor().friendly_name()));
        bindings
    }

    pub(crate) fn changed(&self) -> &Notify {
        &self.changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Access, Capability, DeviceDescriptor};
    use crate::proxy::generate;
    use crate::sync::TopicScheme;

    fn binding(id: &str, name: &str, epoch: u64) -> Arc<ProxyBinding> {
        let descriptor = DeviceDescriptor::new(
            id,
            name,
            vec![Capability::binary("state", Access::ALL)],
        )
        .unwrap();
        generate(Arc::new(descriptor), epoch, &TopicScheme::default())
    }

    #[test]
    fn resolves_by_address_and_name() {
        let table = DeviceTable::new();
        table.insert(binding("0x01", "lamp", 1));

        assert_eq!(table.resolve("0x01").unwrap().epoch(), 1);
        assert_eq!(table.resolve("lamp").unwrap().epoch(), 1);
        assert!(table.resolve("plug").is_none());
    }

    #[test]
    fn rename_drops_old_name() {
        let table = DeviceTable::new();
        table.insert(binding("0x01", "lamp", 1));
        let previous = table.insert(binding("0x01", "desk_lamp", 2));

        assert_eq!(previous.unwrap().epoch(), 1);
        assert!(table.by_name("lamp").is_none());
        assert_eq!(table.by_name("desk_lamp").unwrap().epoch(), 2);
        assert_eq!(table.ids().len(), 1);
    }

    #[test]
    fn swapped_names_keep_both_entries() {
        let table = DeviceTable::new();
        table.insert(binding("0x01", "lamp", 1));
        table.insert(binding("0x02", "plug", 2));

        table.insert(binding("0x01", "plug", 3));
        table.insert(binding("0x02", "lamp", 4));

        assert_eq!(table.by_name("plug").unwrap().epoch(), 3);
        assert_eq!(table.by_name("lamp").unwrap().epoch(), 4);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let table = DeviceTable::new();
        table.insert(binding("0x01", "lamp", 1));
        table.insert(binding("0x02", "plug", 2));

        assert!(table.remove(&DeviceId::new("0x01")).is_some());
        assert!(table.resolve("lamp").is_none());
        assert_eq!(table.all().len(), 1);
        assert!(table.remove(&DeviceId::new("0x01")).is_none());
    }

    #[test]
    fn all_is_sorted_by_name() {
        let table = DeviceTable::new();
        table.insert(binding("0x02", "plug", 1));
        table.insert(binding("0x01", "lamp", 2));

        let names: Vec<_> = table
            .all()
            .iter()
            .map(|b| b.descriptor().friendly_name().to_string())
            .collect();
        assert_eq!(names, ["lamp", "plug"]);
    }
}
