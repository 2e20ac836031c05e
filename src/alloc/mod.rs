//! VLAN id and tap slot allocation.
//!
//! Both allocators are plain state owned by one engine instance.

pub mod tap;
pub mod vlan;

pub use tap::{tap_name, TapAllocator, MAX_IFNAME_LEN, PRIMARY_SLOT};
pub use vlan::{VlanAllocator, VlanId, DEFAULT_VLAN_START, MAX_VLAN_ID};

/// Allocation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("VLAN space exhausted: {requested} ids requested, {remaining} left")]
    VlanExhausted { requested: usize, remaining: usize },
}
