//! Blob file: a random-access file of fixed-size pages. One file per index
//! or relation. Page N lives at offset (N-1) * PAGE_SIZE; page 0 is the
//! "no page" sentinel and is never allocated.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::page::{PageNo, PAGE_SIZE};

pub struct BlobFile {
    path: PathBuf,
    file: File,
    num_pages: PageNo,
}

impl BlobFile {
    /// Create a new blob file. Fails with `FileExists` if the path is taken.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::FileExists(path.clone()),
                _ => Error::Io(e),
            })?;
        tracing::debug!(path = %path.display(), "blob file created");
        Ok(Self {
            path,
            file,
            num_pages: 0,
        })
    }

    /// Open an existing blob file. Fails with `FileNotFound` if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::FileNotFound(path.clone()),
                _ => Error::Io(e),
            })?;
        let len = file.metadata()?.len();
        if len % (PAGE_SIZE as u64) != 0 {
            return Err(Error::CorruptPage(format!(
                "blob file {} length {} not a multiple of page size",
                path.display(),
                len
            )));
        }
        let num_pages = (len / (PAGE_SIZE as u64)) as PageNo;
        tracing::debug!(path = %path.display(), num_pages, "blob file opened");
        Ok(Self {
            path,
            file,
            num_pages,
        })
    }

    /// Allocate the next page, extending the file with zeroes. The first
    /// allocation returns page 1.
    pub fn allocate_page(&mut self) -> Result<PageNo> {
        let page_no = self.num_pages + 1;
        self.write_page(page_no, &[0u8; PAGE_SIZE])?;
        Ok(page_no)
    }

    /// Read page `page_no` into `buf` (exactly one page).
    pub fn read_page(&self, page_no: PageNo, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if page_no == 0 || page_no > self.num_pages {
            return Err(Error::CorruptPage(format!(
                "page {} out of range for {} ({} pages)",
                page_no,
                self.path.display(),
                self.num_pages
            )));
        }
        self.file.read_exact_at(buf, Self::offset(page_no))?;
        Ok(())
    }

    /// Write page `page_no` from `buf` (exactly one page).
    pub fn write_page(&mut self, page_no: PageNo, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        debug_assert_ne!(page_no, 0);
        self.file.write_all_at(buf, Self::offset(page_no))?;
        if page_no > self.num_pages {
            self.num_pages = page_no;
        }
        Ok(())
    }

    pub fn num_pages(&self) -> PageNo {
        self.num_pages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn offset(page_no: PageNo) -> u64 {
        (page_no as u64 - 1) * PAGE_SIZE as u64
    }
}
