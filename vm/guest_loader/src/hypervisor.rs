// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The primitives the loader consumes from the underlying hypervisor.

use bitfield_struct::bitfield;
use std::fmt;

/// The guest page size.
pub const PAGE_SIZE: u64 = 4096;
pub const PAGE_SIZE_USIZE: usize = 4096;

/// Opaque identifier of a guest execution context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestHandle(u32);

impl GuestHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Access permissions for a page installed into a guest.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct PagePermissions {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    #[bits(5)]
    _reserved: u8,
}

impl PagePermissions {
    /// Present, writable, and user accessible: used for all loaded image
    /// pages.
    pub const GUEST_DATA: Self = Self::new()
        .with_present(true)
        .with_writable(true)
        .with_user(true);
}

/// Guest lifecycle and memory primitives provided by the hypervisor.
///
/// Guests are created in a non-runnable state. The loader populates memory
/// with [`Hypervisor::install_guest_page`] and only then calls
/// [`Hypervisor::set_guest_runnable`].
pub trait Hypervisor {
    /// Allocates a guest with `memory_size` bytes of physical memory whose
    /// initial instruction pointer is `entry_address`.
    fn create_guest(
        &mut self,
        memory_size: u64,
        entry_address: u64,
    ) -> anyhow::Result<GuestHandle>;

    /// Copies `page` into the guest's physical memory at `gpa`.
    ///
    /// The contents are copied; the caller keeps ownership of `page` and may
    /// reuse it immediately.
    fn install_guest_page(
        &mut self,
        page: &[u8; PAGE_SIZE_USIZE],
        guest: GuestHandle,
        gpa: u64,
        permissions: PagePermissions,
    ) -> anyhow::Result<()>;

    /// Transitions the guest into a schedulable state.
    fn set_guest_runnable(&mut self, guest: GuestHandle) -> anyhow::Result<()>;

    /// Blocks until the guest exits.
    fn wait_for_guest(&mut self, guest: GuestHandle);

    /// Returns a fresh number used to name a per-guest disk image.
    fn allocate_disk_index(&mut self) -> anyhow::Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_data_permissions() {
        let perms = PagePermissions::GUEST_DATA;
        assert!(perms.present());
        assert!(perms.writable());
        assert!(perms.user());
        assert_eq!(u8::from(perms), 0b111);
    }

    #[test]
    fn handle_display() {
        assert_eq!(GuestHandle::new(0x1001).to_string(), "0x1001");
    }
}
