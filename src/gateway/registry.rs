//! Device registry: the ordered table of known device identities.
//!
//! Ids are positions at insertion time and are never reused while an entry
//! exists; id 0 is the gateway itself, inserted exactly once at
//! construction. Deactivated entries keep their slot (the table is never
//! compacted) so a returning device gets its old id back.

use log::{debug, info};

/// Reserved id of the gateway itself.
pub const GATEWAY_ID: u16 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: u16,
    pub identity: u32,
    pub active: bool,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First time this identity was seen; a fresh id was assigned.
    New(u16),
    /// Identity already present and active; id unchanged.
    Existing(u16),
    /// Identity present but deactivated; its old slot was reactivated.
    Reactivated(u16),
}

impl Registration {
    pub fn id(&self) -> u16 {
        match *self {
            Registration::New(id) | Registration::Existing(id) | Registration::Reactivated(id) => {
                id
            }
        }
    }
}

#[derive(Debug)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    /// Build a registry seeded with the gateway's own identity at id 0.
    pub fn new(gateway_identity: u32) -> Self {
        Self {
            entries: vec![DeviceEntry {
                id: GATEWAY_ID,
                identity: gateway_identity,
                active: true,
            }],
        }
    }

    /// Register an identity. Idempotent: a known active identity keeps its
    /// id; a deactivated one gets its original slot back. The caller emits
    /// the `setId` notification (idempotently, in every case).
    pub fn register(&mut self, identity: u32) -> Registration {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == identity) {
            if entry.active {
                debug!("Re-registration of 0x{:08X} -> id {} (no-op)", identity, entry.id);
                return Registration::Existing(entry.id);
            }
            entry.active = true;
            info!("Reactivated device 0x{:08X} as id {}", identity, entry.id);
            return Registration::Reactivated(entry.id);
        }
        let id = self.entries.len() as u16;
        self.entries.push(DeviceEntry {
            id,
            identity,
            active: true,
        });
        info!("Registered device 0x{:08X} as id {}", identity, id);
        Registration::New(id)
    }

    /// Deactivate an identity. Returns true only on an active→inactive
    /// transition; repeating it (or naming an unknown identity) is a no-op.
    pub fn deactivate(&mut self, identity: u32) -> bool {
        match self.entries.iter_mut().find(|e| e.identity == identity) {
            Some(entry) if entry.active && entry.id != GATEWAY_ID => {
                entry.active = false;
                info!("Deactivated device 0x{:08X} (id {})", identity, entry.id);
                true
            }
            _ => false,
        }
    }

    /// Pure lookup by identity.
    pub fn lookup(&self, identity: u32) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.identity == identity)
            .map(|e| e.id)
    }

    pub fn get(&self, id: u16) -> Option<&DeviceEntry> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }

    /// Next active entry after `cursor`, wrapping through id 0. The gateway
    /// entry is always active, so this terminates.
    pub fn next_active_after(&self, cursor: u16) -> &DeviceEntry {
        let n = self.entries.len() as u16;
        let mut id = cursor;
        loop {
            id = (id + 1) % n;
            let entry = &self.entries[id as usize];
            if entry.active {
                return entry;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_occupies_id_zero() {
        let reg = DeviceRegistry::new(0xAA);
        assert_eq!(reg.lookup(0xAA), Some(0));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ids_are_insertion_positions() {
        let mut reg = DeviceRegistry::new(1);
        assert_eq!(reg.register(100), Registration::New(1));
        assert_eq!(reg.register(200), Registration::New(2));
        assert_eq!(reg.register(100), Registration::Existing(1));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn deactivation_keeps_the_slot() {
        let mut reg = DeviceRegistry::new(1);
        reg.register(100);
        reg.register(200);
        assert!(reg.deactivate(100));
        assert!(!reg.deactivate(100), "second deactivate must be a no-op");
        assert_eq!(reg.lookup(100), Some(1), "slot retained while inactive");
        assert_eq!(reg.register(100), Registration::Reactivated(1));
        assert_eq!(reg.register(300), Registration::New(3));
    }

    #[test]
    fn gateway_cannot_be_deactivated() {
        let mut reg = DeviceRegistry::new(0xAA);
        assert!(!reg.deactivate(0xAA));
    }

    #[test]
    fn cursor_skips_inactive_entries() {
        let mut reg = DeviceRegistry::new(1);
        reg.register(100); // id 1
        reg.register(200); // id 2
        reg.deactivate(100);
        assert_eq!(reg.next_active_after(0).id, 2);
        assert_eq!(reg.next_active_after(2).id, 0);
    }
}
