//! Monotonic VLAN id allocation.

use super::AllocError;

/// 802.1Q VLAN identifier.
pub type VlanId = u16;

/// First id handed out by a fresh allocator.
pub const DEFAULT_VLAN_START: VlanId = 100;

/// Highest usable 802.1Q id.
pub const MAX_VLAN_ID: VlanId = 4094;

/// Hands out VLAN ids in strictly increasing order.
///
/// Ids are never reused within a session, even when the link they were
/// allocated for failed to apply. Only [`VlanAllocator::reset`] rewinds it.
#[derive(Debug, Clone)]
pub struct VlanAllocator {
    start: VlanId,
    next: u32,
}

impl VlanAllocator {
    pub fn new(start: VlanId) -> Self {
        VlanAllocator {
            start,
            next: start as u32,
        }
    }

    /// Returns the current id and advances the counter.
    pub fn next(&mut self) -> Result<VlanId, AllocError> {
        self.reserve(1)?;
        let id = self.next as VlanId;
        self.next += 1;
        Ok(id)
    }

    /// Checks that `count` more ids are available without consuming them.
    pub fn reserve(&self, count: usize) -> Result<(), AllocError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(AllocError::VlanExhausted {
                requested: count,
                remaining,
            });
        }
        Ok(())
    }

    /// Number of ids still available.
    pub fn remaining(&self) -> usize {
        (MAX_VLAN_ID as u32 + 1).saturating_sub(self.next) as usize
    }

    /// The id the next call to [`VlanAllocator::next`] would return.
    pub fn peek(&self) -> Option<VlanId> {
        (self.remaining() > 0).then_some(self.next as VlanId)
    }

    /// Number of ids handed out since creation or the last reset.
    pub fn issued(&self) -> usize {
        (self.next - self.start as u32) as usize
    }

    pub fn reset(&mut self) {
        self.next = self.start as u32;
    }
}

impl Default for VlanAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_VLAN_START)
    }
}
