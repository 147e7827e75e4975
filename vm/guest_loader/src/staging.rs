// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounce buffer for moving file data into guest memory.

use crate::hypervisor::PAGE_SIZE_USIZE;

/// A single page of loader-owned memory.
///
/// The hypervisor copies out of this buffer on every install, so one page can
/// be reused serially for every transfer of a segment. Its contents between
/// transfers are unspecified.
pub struct StagingPage {
    buf: Box<[u8; PAGE_SIZE_USIZE]>,
}

impl StagingPage {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0; PAGE_SIZE_USIZE]),
        }
    }

    pub fn as_page(&self) -> &[u8; PAGE_SIZE_USIZE] {
        &self.buf
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    pub fn zero(&mut self) {
        self.buf.fill(0);
    }
}

impl Default for StagingPage {
    fn default() -> Self {
        Self::new()
    }
}
