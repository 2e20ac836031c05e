//! Per-VM tap slot allocation.
//!
//! Slot 1 is the VM's primary interface and is never handed out. Every link
//! endpoint (group edge, bus membership or interconnection) takes the lowest
//! free slot from 2 upwards.

use std::collections::{BTreeSet, HashMap};

/// Slot reserved for the interface the VM boots with.
pub const PRIMARY_SLOT: u32 = 1;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL).
pub const MAX_IFNAME_LEN: usize = 15;

/// Tap device name for a slot of a VM.
///
/// `tap_name("br-int-VM1-tap", 2)` is `br-int-VM1-tap2`.
pub fn tap_name(tap_base: &str, slot: u32) -> String {
    format!("{}{}", tap_base, slot)
}

/// Tracks which tap slots are bound on each VM.
#[derive(Debug, Clone, Default)]
pub struct TapAllocator {
    used: HashMap<String, BTreeSet<u32>>,
}

impl TapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves and returns the lowest slot >= 2 not yet bound to `vm`.
    pub fn next_slot(&mut self, vm: &str) -> u32 {
        let used = self.used.entry(vm.to_string()).or_default();
        let slot = lowest_free(used);
        used.insert(slot);
        slot
    }

    /// The slots the next `count` calls to [`TapAllocator::next_slot`] would
    /// return for `vm`, without binding them.
    pub fn preview_slots(&self, vm: &str, count: usize) -> Vec<u32> {
        let mut used = self.used.get(vm).cloned().unwrap_or_default();
        (0..count)
            .map(|_| {
                let slot = lowest_free(&used);
                used.insert(slot);
                slot
            })
            .collect()
    }

    /// Marks a slot as bound, e.g. for a tap that could not be removed.
    ///
    /// Returns `false` if the slot was already bound or is the primary slot.
    pub fn mark_used(&mut self, vm: &str, slot: u32) -> bool {
        if slot <= PRIMARY_SLOT {
            return false;
        }
        self.used.entry(vm.to_string()).or_default().insert(slot)
    }

    /// Slots bound on `vm`, ascending.
    pub fn slots(&self, vm: &str) -> Vec<u32> {
        self.used
            .get(vm)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total bound slots across all VMs.
    pub fn bound_count(&self) -> usize {
        self.used.values().map(BTreeSet::len).sum()
    }

    pub fn reset(&mut self) {
        self.used.clear();
    }
}

fn lowest_free(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = PRIMARY_SLOT + 1;
    for &slot in used.range(candidate..) {
        if slot != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}
