// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-page transfers from a source file into guest memory.

use crate::error::Error;
use crate::error::Result;
use crate::hypervisor::GuestHandle;
use crate::hypervisor::Hypervisor;
use crate::hypervisor::PagePermissions;
use crate::hypervisor::PAGE_SIZE;
use crate::staging::StagingPage;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

/// Copies `byte_count` bytes at `file_offset` of `source` into the guest page
/// at `gpa`.
///
/// `byte_count` must be non-zero and at most one page. The rest of the page
/// is zeroed before installation, so the guest never sees bytes left over in
/// `staging` from an earlier transfer.
pub fn transfer_page<F>(
    hv: &mut dyn Hypervisor,
    staging: &mut StagingPage,
    source: &mut F,
    file_offset: u64,
    guest: GuestHandle,
    gpa: u64,
    byte_count: u64,
) -> Result<()>
where
    F: Read + Seek,
{
    if byte_count == 0 || byte_count > PAGE_SIZE {
        return Err(Error::InvalidTransferLength(byte_count));
    }

    seek_to(source, file_offset)?;

    let len = byte_count as usize;
    let buf = staging.as_mut_bytes();
    let actual = read_full(source, &mut buf[..len]).map_err(|err| Error::Read {
        offset: file_offset,
        len: byte_count,
        err,
    })?;
    if actual < len {
        return Err(Error::TruncatedRead {
            offset: file_offset,
            expected: byte_count,
            actual: actual as u64,
        });
    }
    buf[len..].fill(0);

    tracing::trace!(%guest, gpa, file_offset, byte_count, "transferring page");
    install(hv, staging, guest, gpa)
}

/// Installs an all-zero page into the guest at `gpa`.
pub fn install_zero_page(
    hv: &mut dyn Hypervisor,
    staging: &mut StagingPage,
    guest: GuestHandle,
    gpa: u64,
) -> Result<()> {
    staging.zero();
    tracing::trace!(%guest, gpa, "installing zero page");
    install(hv, staging, guest, gpa)
}

fn install(
    hv: &mut dyn Hypervisor,
    staging: &StagingPage,
    guest: GuestHandle,
    gpa: u64,
) -> Result<()> {
    hv.install_guest_page(staging.as_page(), guest, gpa, PagePermissions::GUEST_DATA)
        .map_err(|err| Error::Mapping { guest, gpa, err })
}

pub(crate) fn seek_to<F: Seek>(source: &mut F, offset: u64) -> Result<()> {
    source
        .seek(SeekFrom::Start(offset))
        .map_err(|err| Error::Seek { offset, err })?;
    Ok(())
}

/// Returns the total length of `source`.
pub(crate) fn source_len<F: Seek>(source: &mut F) -> Result<u64> {
    source.seek(SeekFrom::End(0)).map_err(Error::ImageLength)
}

/// Reads until `buf` is full or the source hits end of file, returning the
/// number of bytes read.
pub(crate) fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::InMemoryHypervisor;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::patterned;
    use std::io::Cursor;

    fn new_guest(hv: &mut InMemoryHypervisor) -> GuestHandle {
        hv.create_guest(0x10000, 0).unwrap()
    }

    #[test]
    fn full_page() {
        init_tracing();
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let data = patterned(0x3000);
        let mut staging = StagingPage::new();

        transfer_page(
            &mut hv,
            &mut staging,
            &mut Cursor::new(&data),
            0x1000,
            guest,
            0x4000,
            PAGE_SIZE,
        )
        .unwrap();

        assert_eq!(hv.installed_addresses(guest), [0x4000]);
        assert_eq!(hv.read_guest(guest, 0x4000, 0x1000), data[0x1000..0x2000]);
    }

    #[test]
    fn partial_page_clears_stale_bytes() {
        init_tracing();
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let data = patterned(0x2000);
        let mut source = Cursor::new(&data);
        let mut staging = StagingPage::new();

        transfer_page(&mut hv, &mut staging, &mut source, 0, guest, 0, PAGE_SIZE).unwrap();
        transfer_page(&mut hv, &mut staging, &mut source, 0x1000, guest, 0x1000, 0x10).unwrap();

        let page = hv.read_guest(guest, 0x1000, 0x1000);
        assert_eq!(page[..0x10], data[0x1000..0x1010]);
        assert!(page[0x10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_read() {
        init_tracing();
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let data = patterned(0x800);

        let err = transfer_page(
            &mut hv,
            &mut StagingPage::new(),
            &mut Cursor::new(&data),
            0x400,
            guest,
            0,
            0x800,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TruncatedRead);
        assert!(matches!(
            err,
            Error::TruncatedRead {
                offset: 0x400,
                expected: 0x800,
                actual: 0x400
            }
        ));
        assert_eq!(hv.install_count(guest), 0);
    }

    #[test]
    fn invalid_length() {
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let data = patterned(0x2000);

        for len in [0, PAGE_SIZE + 1] {
            let err = transfer_page(
                &mut hv,
                &mut StagingPage::new(),
                &mut Cursor::new(&data),
                0,
                guest,
                0,
                len,
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(hv.install_count(guest), 0);
    }

    #[test]
    fn mapping_rejected() {
        init_tracing();
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let data = patterned(0x1000);

        let err = transfer_page(
            &mut hv,
            &mut StagingPage::new(),
            &mut Cursor::new(&data),
            0,
            guest,
            0x10000,
            PAGE_SIZE,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MappingFailure);
    }

    #[test]
    fn zero_page() {
        let mut hv = InMemoryHypervisor::new();
        let guest = new_guest(&mut hv);
        let mut staging = StagingPage::new();
        staging.as_mut_bytes().fill(0xcc);

        install_zero_page(&mut hv, &mut staging, guest, 0x2000).unwrap();

        assert_eq!(hv.installed_addresses(guest), [0x2000]);
        assert!(hv.read_guest(guest, 0x2000, 0x1000).iter().all(|&b| b == 0));
    }
}
