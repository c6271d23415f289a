//! Paged I/O over a single file.
//!
//! The Pager owns the file descriptor, the negotiated page size, and the
//! page count. It hands out owned page buffers (`MemPage`) and writes them
//! back on request; it never interprets node contents. Every acquired page
//! is expected to be consumed (moved) by its caller, which is how Rust
//! enforces the "release on every exit path" discipline the design calls
//! for without needing an explicit free-list of checked-out pages.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, trace};

use crate::error::{Error, Result};

pub const FILE_HEADER_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 1024;
pub const VALID_PAGE_SIZES: [u32; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

/// An owned, checked-out page buffer. Dropping or moving past the point of
/// no return (without calling `write_page`) discards any in-place edits,
/// since nothing but the Pager persists bytes to disk.
#[derive(Debug, Clone)]
pub struct MemPage {
    pub page_number: u32,
    pub buf: Vec<u8>,
}

impl MemPage {
    fn zeroed(page_number: u32, page_size: u32) -> Self {
        MemPage {
            page_number,
            buf: vec![0u8; page_size as usize],
        }
    }
}

#[derive(Debug)]
pub struct Pager {
    file: File,
    page_size: u32,
    page_count: u32,
}

impl Pager {
    /// Opens `path` for read/write, creating it if absent. Does not
    /// interpret the file header; page size defaults to 1024 until
    /// `set_page_size` is called.
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let page_size = DEFAULT_PAGE_SIZE;
        let page_count = if len == 0 { 0 } else { (len / page_size as u64) as u32 };
        debug!("opened pager on {path} ({page_count} pages at {page_size} bytes)");
        Ok(Pager {
            file,
            page_size,
            page_count,
        })
    }

    pub fn close(self) -> Result<()> {
        // `File` flushes and releases its descriptor on drop; nothing else
        // to release since the Pager keeps no page cache.
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Sets the page size. Must be called before any page read on a
    /// non-empty file, and must match the size recorded in that file's
    /// header.
    pub fn set_page_size(&mut self, size: u32) -> Result<()> {
        if !VALID_PAGE_SIZES.contains(&size) {
            return Err(Error::Misuse("page size must be a supported power of two"));
        }
        let len = self.file.metadata()?.len();
        self.page_size = size;
        self.page_count = if len == 0 { 0 } else { (len / size as u64) as u32 };
        Ok(())
    }

    /// Reads the first 100 bytes of the file without constructing a node
    /// view over them.
    pub fn read_header(&mut self) -> Result<[u8; FILE_HEADER_SIZE]> {
        let mut out = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut out)?;
        Ok(out)
    }

    pub fn write_header(&mut self, header: &[u8; FILE_HEADER_SIZE]) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(header)?;
        Ok(())
    }

    /// Extends the file by one zero-initialized page, returning its
    /// (1-based) page number.
    pub fn allocate_page(&mut self) -> Result<MemPage> {
        let npage = self.page_count + 1;
        let page = MemPage::zeroed(npage, self.page_size);
        self.write_page(&page)?;
        self.page_count = npage;
        trace!("allocated page {npage}");
        Ok(page)
    }

    /// Reads a page buffer. `EPAGENO`-equivalent (`Error::PageNumber`) if
    /// `npage` is out of `[1, page_count]`.
    pub fn read_page(&mut self, npage: u32) -> Result<MemPage> {
        if npage < 1 || npage > self.page_count {
            return Err(Error::PageNumber(npage));
        }
        let offset = (npage as u64 - 1) * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        trace!("read page {npage}");
        Ok(MemPage {
            page_number: npage,
            buf,
        })
    }

    /// Writes a page buffer back at its offset.
    pub fn write_page(&mut self, page: &MemPage) -> Result<()> {
        let offset = (page.page_number as u64 - 1) * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.buf)?;
        trace!("wrote page {}", page.page_number);
        Ok(())
    }

    /// Returns the buffer to the pager. Rust's ownership rules already
    /// prevent the caller from touching `page` afterwards, since this
    /// consumes it, expressing release-on-every-exit-path as a move
    /// instead of a runtime check.
    pub fn release_mem_page(&mut self, page: MemPage) -> Result<()> {
        drop(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> String {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_str().unwrap().to_string();
        // Drop immediately: we want the path, not an open handle racing ours.
        drop(f);
        path
    }

    #[test]
    fn opening_nonexistent_file_starts_empty() {
        let path = temp_path();
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.page_count(), 0);
        assert_eq!(pager.page_size(), DEFAULT_PAGE_SIZE);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn allocate_then_read_round_trips() {
        let path = temp_path();
        let mut pager = Pager::open(&path).unwrap();
        let mut page = pager.allocate_page().unwrap();
        assert_eq!(page.page_number, 1);
        page.buf[0] = 0xAB;
        pager.write_page(&page).unwrap();
        let reread = pager.read_page(1).unwrap();
        assert_eq!(reread.buf[0], 0xAB);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reading_out_of_range_page_errors() {
        let path = temp_path();
        let mut pager = Pager::open(&path).unwrap();
        pager.allocate_page().unwrap();
        assert!(matches!(pager.read_page(0), Err(Error::PageNumber(0))));
        assert!(matches!(pager.read_page(2), Err(Error::PageNumber(2))));
        std::fs::remove_file(&path).ok();
    }
}
