//! Relation file: slotted pages of raw records, plus a sequential scanner.
//!
//! Page format: `[n_slots: u16][free_end: u16][slot dir: (offset u16, len u16)*]`
//! with record bytes packed downward from the end of the page. Slots are
//! numbered from 0 within their page; a record's id is `(page_no, slot_no)`.

use std::path::Path;
use std::rc::Rc;

use crate::buffer::{BufMgr, FileId, PageGuard};
use crate::error::{Error, Result};

use super::blob::BlobFile;
use super::page::{PageNo, RecordId, PAGE_SIZE};

const SLOT_DIR_START: usize = 4;
const SLOT_SIZE: usize = 4;

fn n_slots(page: &[u8]) -> u16 {
    u16::from_le_bytes(page[0..2].try_into().unwrap())
}

fn set_n_slots(page: &mut [u8], n: u16) {
    page[0..2].copy_from_slice(&n.to_le_bytes());
}

fn free_end(page: &[u8]) -> u16 {
    u16::from_le_bytes(page[2..4].try_into().unwrap())
}

fn set_free_end(page: &mut [u8], v: u16) {
    page[2..4].copy_from_slice(&v.to_le_bytes());
}

fn slot(page: &[u8], slot_no: u16) -> (usize, usize) {
    let pos = SLOT_DIR_START + slot_no as usize * SLOT_SIZE;
    let offset = u16::from_le_bytes(page[pos..pos + 2].try_into().unwrap()) as usize;
    let len = u16::from_le_bytes(page[pos + 2..pos + 4].try_into().unwrap()) as usize;
    (offset, len)
}

fn free_space(page: &[u8]) -> usize {
    let dir_end = SLOT_DIR_START + n_slots(page) as usize * SLOT_SIZE;
    let start = free_end(page) as usize;
    if start <= dir_end {
        0
    } else {
        start - dir_end
    }
}

/// Append a record to a (format-initialized) page. Returns the slot number,
/// or `None` when the record plus its slot entry does not fit.
fn page_insert(page: &mut [u8], record: &[u8]) -> Option<u16> {
    if free_space(page) < record.len() + SLOT_SIZE {
        return None;
    }
    let n = n_slots(page);
    let offset = free_end(page) as usize - record.len();
    page[offset..offset + record.len()].copy_from_slice(record);
    let pos = SLOT_DIR_START + n as usize * SLOT_SIZE;
    page[pos..pos + 2].copy_from_slice(&(offset as u16).to_le_bytes());
    page[pos + 2..pos + 4].copy_from_slice(&(record.len() as u16).to_le_bytes());
    set_n_slots(page, n + 1);
    set_free_end(page, offset as u16);
    Some(n)
}

fn init_page(page: &mut [u8]) {
    set_n_slots(page, 0);
    set_free_end(page, PAGE_SIZE as u16);
}

/// Writer for building a relation file through the buffer manager.
pub struct RelationFile {
    pool: Rc<BufMgr>,
    file: FileId,
    tail_page: PageNo,
}

impl RelationFile {
    /// Create a new relation file at `path`.
    pub fn create<P: AsRef<Path>>(pool: &Rc<BufMgr>, path: P) -> Result<Self> {
        let blob = BlobFile::create(path)?;
        let file = pool.register_file(blob);
        Ok(Self {
            pool: Rc::clone(pool),
            file,
            tail_page: 0,
        })
    }

    /// Append a raw record, returning its id.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        if record.len() + SLOT_SIZE > PAGE_SIZE - SLOT_DIR_START {
            return Err(Error::CorruptPage(format!(
                "record of {} bytes exceeds page capacity",
                record.len()
            )));
        }
        if self.tail_page != 0 {
            let guard = self.pool.fetch_page(self.file, self.tail_page)?;
            let slot_no = page_insert(&mut guard.data_mut(), record);
            if let Some(slot_no) = slot_no {
                return Ok(RecordId::new(self.tail_page, slot_no));
            }
        }
        let guard = self.pool.alloc_page(self.file)?;
        self.tail_page = guard.page_no();
        let mut data = guard.data_mut();
        init_page(&mut data);
        let slot_no = page_insert(&mut data, record).expect("record fits in an empty page");
        Ok(RecordId::new(self.tail_page, slot_no))
    }

    /// Flush the relation and release the file from the buffer manager.
    pub fn finish(self) -> Result<()> {
        self.pool.close_file(self.file)
    }
}

/// Sequential scanner over a relation file registered with the buffer
/// manager. Keeps at most one page pinned; yields `EndOfFile` past the
/// last record.
pub struct RelationScan {
    pool: Rc<BufMgr>,
    file: FileId,
    num_pages: PageNo,
    page: Option<PageGuard>,
    page_no: PageNo,
    slot_no: u16,
}

impl RelationScan {
    pub fn new(pool: Rc<BufMgr>, file: FileId) -> Result<Self> {
        let num_pages = pool.file_num_pages(file);
        Ok(Self {
            pool,
            file,
            num_pages,
            page: None,
            page_no: 0,
            slot_no: 0,
        })
    }

    /// Next `(record id, record bytes)` pair, in file order.
    pub fn scan_next(&mut self) -> Result<(RecordId, Vec<u8>)> {
        loop {
            if self.page.is_none() {
                if self.page_no >= self.num_pages {
                    return Err(Error::EndOfFile);
                }
                self.page_no += 1;
                self.slot_no = 0;
                self.page = Some(self.pool.fetch_page(self.file, self.page_no)?);
            }
            let guard = self.page.as_ref().unwrap();
            let record = {
                let data = guard.data();
                if self.slot_no >= n_slots(&data) {
                    None
                } else {
                    let (offset, len) = slot(&data, self.slot_no);
                    Some(data[offset..offset + len].to_vec())
                }
            };
            match record {
                Some(bytes) => {
                    let rid = RecordId::new(self.page_no, self.slot_no);
                    self.slot_no += 1;
                    return Ok((rid, bytes));
                }
                None => {
                    // Page exhausted; drop the pin before moving on.
                    self.page = None;
                }
            }
        }
    }
}
