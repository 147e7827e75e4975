// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A hypervisor backend that keeps guest physical memory in loader process
//! memory.
//!
//! There are no virtual processors, so a guest "runs" only in the sense that
//! it moves through the same lifecycle states a real guest would. This is
//! useful for producing flat memory images and for exercising the loader.

use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use crate::hypervisor::PagePermissions;
use crate::hypervisor::PAGE_SIZE;
use crate::hypervisor::PAGE_SIZE_USIZE;
use anyhow::Context as _;
use std::collections::BTreeMap;
use std::io::Write;

/// Default cap on guest memory size.
pub const DEFAULT_MAX_MEMORY_SIZE: u64 = 4 << 30;

/// Handle values start here so that zero is never a valid guest.
const FIRST_GUEST_HANDLE: u32 = 0x1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuestStatus {
    NotRunnable,
    Runnable,
    Exited,
}

struct Page {
    data: Box<[u8; PAGE_SIZE_USIZE]>,
    permissions: PagePermissions,
}

struct GuestState {
    memory_size: u64,
    entry_address: u64,
    status: GuestStatus,
    /// Populated pages, keyed by guest page number.
    pages: BTreeMap<u64, Page>,
    installs: Vec<u64>,
}

pub struct InMemoryHypervisor {
    guests: Vec<GuestState>,
    max_memory_size: u64,
    next_disk_index: u32,
}

impl InMemoryHypervisor {
    pub fn new() -> Self {
        Self::with_max_memory_size(DEFAULT_MAX_MEMORY_SIZE)
    }

    pub fn with_max_memory_size(max_memory_size: u64) -> Self {
        Self {
            guests: Vec::new(),
            max_memory_size,
            next_disk_index: 0,
        }
    }

    fn guest(&self, guest: GuestHandle) -> anyhow::Result<&GuestState> {
        guest
            .raw()
            .checked_sub(FIRST_GUEST_HANDLE)
            .and_then(|index| self.guests.get(index as usize))
            .with_context(|| format!("unknown guest {guest}"))
    }

    fn guest_mut(&mut self, guest: GuestHandle) -> anyhow::Result<&mut GuestState> {
        guest
            .raw()
            .checked_sub(FIRST_GUEST_HANDLE)
            .and_then(|index| self.guests.get_mut(index as usize))
            .with_context(|| format!("unknown guest {guest}"))
    }

    /// Returns the lifecycle state of `guest`, if it exists.
    pub fn status(&self, guest: GuestHandle) -> Option<GuestStatus> {
        self.guest(guest).ok().map(|g| g.status)
    }

    /// Returns the entry address `guest` was created with, if it exists.
    pub fn entry_address(&self, guest: GuestHandle) -> Option<u64> {
        self.guest(guest).ok().map(|g| g.entry_address)
    }

    /// Returns the number of page installs performed on `guest`.
    pub fn install_count(&self, guest: GuestHandle) -> usize {
        self.installed_addresses(guest).len()
    }

    /// Returns the guest physical address of every install, in order.
    pub fn installed_addresses(&self, guest: GuestHandle) -> &[u64] {
        match self.guest(guest) {
            Ok(state) => &state.installs,
            Err(_) => &[],
        }
    }

    /// Returns the permissions of the page containing `gpa`, if populated.
    pub fn page_permissions(&self, guest: GuestHandle, gpa: u64) -> Option<PagePermissions> {
        let state = self.guest(guest).ok()?;
        state.pages.get(&(gpa / PAGE_SIZE)).map(|p| p.permissions)
    }

    /// Reads `len` bytes of guest memory at `gpa`. Unpopulated memory and
    /// memory past the end of the guest read as zero.
    pub fn read_guest(&self, guest: GuestHandle, gpa: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        let Ok(state) = self.guest(guest) else {
            return out;
        };
        let mut done = 0;
        while done < len {
            let addr = gpa + done as u64;
            let page_offset = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE_USIZE - page_offset).min(len - done);
            if let Some(page) = state.pages.get(&(addr / PAGE_SIZE)) {
                out[done..done + chunk]
                    .copy_from_slice(&page.data[page_offset..page_offset + chunk]);
            }
            done += chunk;
        }
        out
    }

    /// Writes the full physical memory of `guest` to `writer` as a flat
    /// image.
    pub fn write_memory_image(
        &self,
        guest: GuestHandle,
        writer: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let state = self.guest(guest)?;
        let zero_page = [0; PAGE_SIZE_USIZE];
        for gpn in 0..state.memory_size / PAGE_SIZE {
            let data = state.pages.get(&gpn).map_or(&zero_page, |p| &*p.data);
            writer
                .write_all(data)
                .with_context(|| format!("failed to write page {gpn:#x}"))?;
        }
        Ok(())
    }
}

impl Default for InMemoryHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor for InMemoryHypervisor {
    fn create_guest(
        &mut self,
        memory_size: u64,
        entry_address: u64,
    ) -> anyhow::Result<GuestHandle> {
        if memory_size == 0 || memory_size % PAGE_SIZE != 0 {
            anyhow::bail!(
                "guest memory size {memory_size:#x} is not a non-zero multiple of the page size"
            );
        }
        if memory_size > self.max_memory_size {
            anyhow::bail!(
                "guest memory size {memory_size:#x} exceeds the maximum {:#x}",
                self.max_memory_size
            );
        }
        if entry_address >= memory_size {
            anyhow::bail!("entry address {entry_address:#x} is outside guest memory");
        }

        let index = u32::try_from(self.guests.len())
            .ok()
            .and_then(|index| index.checked_add(FIRST_GUEST_HANDLE))
            .context("too many guests")?;
        self.guests.push(GuestState {
            memory_size,
            entry_address,
            status: GuestStatus::NotRunnable,
            pages: BTreeMap::new(),
            installs: Vec::new(),
        });

        let guest = GuestHandle::new(index);
        tracing::debug!(%guest, memory_size, entry_address, "created guest");
        Ok(guest)
    }

    fn install_guest_page(
        &mut self,
        page: &[u8; PAGE_SIZE_USIZE],
        guest: GuestHandle,
        gpa: u64,
        permissions: PagePermissions,
    ) -> anyhow::Result<()> {
        let state = self.guest_mut(guest)?;
        if state.status != GuestStatus::NotRunnable {
            anyhow::bail!("guest {guest} is {:?}, pages can no longer be installed", state.status);
        }
        if gpa % PAGE_SIZE != 0 {
            anyhow::bail!("guest address {gpa:#x} is not page aligned");
        }
        if gpa >= state.memory_size {
            anyhow::bail!(
                "guest address {gpa:#x} is beyond guest memory size {:#x}",
                state.memory_size
            );
        }

        state.pages.insert(
            gpa / PAGE_SIZE,
            Page {
                data: Box::new(*page),
                permissions,
            },
        );
        state.installs.push(gpa);
        Ok(())
    }

    fn set_guest_runnable(&mut self, guest: GuestHandle) -> anyhow::Result<()> {
        let state = self.guest_mut(guest)?;
        if state.status != GuestStatus::NotRunnable {
            anyhow::bail!("guest {guest} is already {:?}", state.status);
        }
        state.status = GuestStatus::Runnable;
        Ok(())
    }

    fn wait_for_guest(&mut self, guest: GuestHandle) {
        match self.guest_mut(guest) {
            Ok(state) if state.status == GuestStatus::Runnable => {
                // Nothing to execute the guest, so it exits immediately.
                state.status = GuestStatus::Exited;
                tracing::info!(%guest, "guest exited");
            }
            Ok(state) => {
                tracing::warn!(
                    %guest,
                    status = ?state.status,
                    "waiting on a guest that is not running"
                );
            }
            Err(err) => {
                tracing::warn!(error = &*err as &dyn std::error::Error, "wait failed");
            }
        }
    }

    fn allocate_disk_index(&mut self) -> anyhow::Result<u32> {
        self.next_disk_index = self
            .next_disk_index
            .checked_add(1)
            .context("disk numbers exhausted")?;
        Ok(self.next_disk_index)
    }
}
