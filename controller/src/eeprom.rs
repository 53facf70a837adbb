// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Access to the SFF-8472 EEPROM of the optical transceiver.

use crate::config::EepromPaths;
use crate::Error;
use slog::debug;
use slog::Logger;
use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;

/// The size of one EEPROM page.
pub const PAGE_SIZE: usize = 256;

/// An SFF-8472 two-wire address, each exposing one page.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Page {
    /// Serial ID, at address A0h.
    A0,
    /// Diagnostics and user-writable registers, at address A2h.
    A2,
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Page::A0 => write!(f, "A0h"),
            Page::A2 => write!(f, "A2h"),
        }
    }
}

// Check that an access lies within a page.
fn check_range(page: Page, offset: u8, len: usize) -> Result<(), Error> {
    if usize::from(offset) + len > PAGE_SIZE {
        return Err(Error::OutOfRange(format!(
            "{len} bytes at offset {offset} of page {page}"
        )));
    }
    Ok(())
}

/// Byte-level access to the transceiver EEPROM.
pub trait Eeprom: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, page: Page, offset: u8, buf: &mut [u8]) -> Result<(), Error>;

    /// Write `data` starting at `offset`.
    fn write(&self, page: Page, offset: u8, data: &[u8]) -> Result<(), Error>;
}

/// An EEPROM exposed as one file per page, as by the kernel's SFP drivers.
#[derive(Debug)]
pub struct FileEeprom {
    a0: File,
    a2: File,
}

impl FileEeprom {
    pub fn open(paths: &EepromPaths) -> Result<Self, Error> {
        let open = |path: &Path| OpenOptions::new().read(true).write(true).open(path);
        Ok(Self {
            a0: open(&paths.a0)?,
            a2: open(&paths.a2)?,
        })
    }

    fn file(&self, page: Page) -> &File {
        match page {
            Page::A0 => &self.a0,
            Page::A2 => &self.a2,
        }
    }
}

impl Eeprom for FileEeprom {
    fn read(&self, page: Page, offset: u8, buf: &mut [u8]) -> Result<(), Error> {
        check_range(page, offset, buf.len())?;
        self.file(page)
            .read_exact_at(buf, u64::from(offset))
            .map_err(Error::from)
    }

    fn write(&self, page: Page, offset: u8, data: &[u8]) -> Result<(), Error> {
        check_range(page, offset, data.len())?;
        self.file(page)
            .write_all_at(data, u64::from(offset))
            .map_err(Error::from)
    }
}

/// An EEPROM held in memory.
///
/// Every write is logged, which makes this useful when no transceiver is
/// attached.
pub struct MemoryEeprom {
    log: Logger,
    pages: Mutex<[[u8; PAGE_SIZE]; 2]>,
}

impl MemoryEeprom {
    pub fn new(log: Logger) -> Self {
        Self {
            log,
            pages: Mutex::new([[0; PAGE_SIZE]; 2]),
        }
    }

    const fn index(page: Page) -> usize {
        match page {
            Page::A0 => 0,
            Page::A2 => 1,
        }
    }
}

impl Eeprom for MemoryEeprom {
    fn read(&self, page: Page, offset: u8, buf: &mut [u8]) -> Result<(), Error> {
        check_range(page, offset, buf.len())?;
        let pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::from(offset);
        buf.copy_from_slice(&pages[Self::index(page)][start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, page: Page, offset: u8, data: &[u8]) -> Result<(), Error> {
        check_range(page, offset, data.len())?;
        debug!(
            self.log,
            "EEPROM write";
            "page" => %page,
            "offset" => offset,
            "data" => ?data,
        );
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::from(offset);
        pages[Self::index(page)][start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Eeprom;
    use super::FileEeprom;
    use super::MemoryEeprom;
    use super::Page;
    use super::PAGE_SIZE;
    use crate::config::EepromPaths;
    use crate::test_utils::test_logger;
    use crate::ErrorKind;

    #[test]
    fn test_memory_eeprom() {
        let eeprom = MemoryEeprom::new(test_logger());
        eeprom.write(Page::A2, 127, &[0x02]).unwrap();
        eeprom.write(Page::A2, 144, &[0x00, 0x03]).unwrap();
        let mut buf = [0u8; 2];
        eeprom.read(Page::A2, 144, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x03]);
        eeprom.read(Page::A0, 144, &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn test_access_past_end_of_page() {
        let eeprom = MemoryEeprom::new(test_logger());
        let mut buf = [0u8; 2];
        let err = eeprom.read(Page::A2, 255, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(eeprom.write(Page::A0, 255, &[0]).is_ok());
    }

    #[test]
    fn test_file_eeprom() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EepromPaths {
            a0: dir.path().join("a0"),
            a2: dir.path().join("a2"),
        };
        std::fs::write(&paths.a0, vec![0xaa; PAGE_SIZE]).unwrap();
        std::fs::write(&paths.a2, vec![0u8; PAGE_SIZE]).unwrap();
        let eeprom = FileEeprom::open(&paths).unwrap();
        eeprom.write(Page::A2, 96, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        eeprom.read(Page::A2, 96, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        eeprom.read(Page::A0, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xaa; 3]);
    }
}
