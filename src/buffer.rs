//! Paged buffer manager. Frames are keyed by `(FileId, PageNo)` over blob
//! files registered with the pool. Fetching or allocating a page pins its
//! frame and hands back a [`PageGuard`]; the guard unpins on drop, on every
//! exit path, carrying the dirty flag accumulated by the holder.
//!
//! Single-threaded by design; interior mutability lets guards release
//! themselves without threading `&mut` through every caller.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::storage::blob::BlobFile;
use crate::storage::page::{PageNo, PAGE_SIZE};

pub type FileId = u32;

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    file: FileId,
    page_no: PageNo,
    pin_count: u32,
    dirty: bool,
    referenced: bool,
    valid: bool,
}

impl Frame {
    fn empty() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            file: 0,
            page_no: 0,
            pin_count: 0,
            dirty: false,
            referenced: false,
            valid: false,
        }
    }
}

struct Pool {
    frames: Vec<Frame>,
    page_table: HashMap<(FileId, PageNo), usize>,
    files: HashMap<FileId, BlobFile>,
    next_file_id: FileId,
    clock_hand: usize,
}

impl Pool {
    /// Clock (second chance) victim selection. Pinned frames are never
    /// evicted; a dirty victim is written back before reuse.
    fn victim(&mut self) -> Result<usize> {
        let n = self.frames.len();
        for _ in 0..2 * n {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % n;
            if !self.frames[idx].valid {
                return Ok(idx);
            }
            if self.frames[idx].pin_count > 0 {
                continue;
            }
            if self.frames[idx].referenced {
                self.frames[idx].referenced = false;
                continue;
            }
            self.write_back(idx)?;
            let frame = &mut self.frames[idx];
            self.page_table.remove(&(frame.file, frame.page_no));
            frame.valid = false;
            tracing::debug!(file = frame.file, page_no = frame.page_no, "evicted page");
            return Ok(idx);
        }
        Err(Error::BufferExhausted)
    }

    fn write_back(&mut self, idx: usize) -> Result<()> {
        if !self.frames[idx].valid || !self.frames[idx].dirty {
            return Ok(());
        }
        let (file_id, page_no) = (self.frames[idx].file, self.frames[idx].page_no);
        let file = self
            .files
            .get_mut(&file_id)
            .expect("frame refers to an unregistered file");
        file.write_page(page_no, &self.frames[idx].data[..])?;
        self.frames[idx].dirty = false;
        Ok(())
    }

    fn install(&mut self, idx: usize, file: FileId, page_no: PageNo) {
        let frame = &mut self.frames[idx];
        frame.file = file;
        frame.page_no = page_no;
        frame.pin_count = 1;
        frame.dirty = false;
        frame.referenced = true;
        frame.valid = true;
        self.page_table.insert((file, page_no), idx);
    }
}

pub struct BufMgr {
    inner: RefCell<Pool>,
}

impl BufMgr {
    pub fn new(pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool must have at least one frame");
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        Self {
            inner: RefCell::new(Pool {
                frames,
                page_table: HashMap::new(),
                files: HashMap::new(),
                next_file_id: 1,
                clock_hand: 0,
            }),
        }
    }

    /// Register a blob file with the pool; all page traffic for it goes
    /// through the returned id from here on.
    pub fn register_file(&self, file: BlobFile) -> FileId {
        let mut pool = self.inner.borrow_mut();
        let id = pool.next_file_id;
        pool.next_file_id += 1;
        pool.files.insert(id, file);
        id
    }

    pub fn file_num_pages(&self, file: FileId) -> PageNo {
        self.inner
            .borrow()
            .files
            .get(&file)
            .expect("file not registered")
            .num_pages()
    }

    /// Allocate a fresh page in `file` (zeroed, pinned). Never returns page 0.
    pub fn alloc_page(self: &Rc<Self>, file: FileId) -> Result<PageGuard> {
        let mut pool = self.inner.borrow_mut();
        let page_no = pool
            .files
            .get_mut(&file)
            .expect("file not registered")
            .allocate_page()?;
        let idx = pool.victim()?;
        pool.frames[idx].data.fill(0);
        pool.install(idx, file, page_no);
        drop(pool);
        Ok(PageGuard::new(Rc::clone(self), file, page_no))
    }

    /// Fetch `page_no` of `file`, reading from disk on a miss. Pins the frame.
    pub fn fetch_page(self: &Rc<Self>, file: FileId, page_no: PageNo) -> Result<PageGuard> {
        let mut pool = self.inner.borrow_mut();
        if let Some(&idx) = pool.page_table.get(&(file, page_no)) {
            pool.frames[idx].pin_count += 1;
            pool.frames[idx].referenced = true;
        } else {
            let idx = pool.victim()?;
            {
                // Read into the frame before publishing it in the table.
                let Pool { frames, files, .. } = &mut *pool;
                let blob = files.get(&file).expect("file not registered");
                blob.read_page(page_no, &mut frames[idx].data[..])?;
            }
            pool.install(idx, file, page_no);
        }
        drop(pool);
        Ok(PageGuard::new(Rc::clone(self), file, page_no))
    }

    /// Drop one pin on a page. `dirty` marks the frame for write-back.
    pub fn unpin(&self, file: FileId, page_no: PageNo, dirty: bool) -> Result<()> {
        let mut pool = self.inner.borrow_mut();
        let idx = match pool.page_table.get(&(file, page_no)) {
            Some(&idx) => idx,
            None => return Err(Error::PageNotCached { file, page_no }),
        };
        let frame = &mut pool.frames[idx];
        if frame.pin_count == 0 {
            return Err(Error::PageNotPinned { file, page_no });
        }
        frame.pin_count -= 1;
        frame.dirty |= dirty;
        Ok(())
    }

    /// Write all dirty frames of `file` back and sync it.
    pub fn flush_file(&self, file: FileId) -> Result<()> {
        let mut pool = self.inner.borrow_mut();
        for idx in 0..pool.frames.len() {
            if pool.frames[idx].valid && pool.frames[idx].file == file {
                pool.write_back(idx)?;
            }
        }
        pool.files
            .get(&file)
            .expect("file not registered")
            .sync()?;
        Ok(())
    }

    /// Flush `file`, drop its frames, and release the underlying handle.
    pub fn close_file(&self, file: FileId) -> Result<()> {
        self.flush_file(file)?;
        let mut pool = self.inner.borrow_mut();
        for idx in 0..pool.frames.len() {
            if pool.frames[idx].valid && pool.frames[idx].file == file {
                if pool.frames[idx].pin_count > 0 {
                    tracing::warn!(
                        file,
                        page_no = pool.frames[idx].page_no,
                        "closing file with pinned page"
                    );
                }
                let key = (file, pool.frames[idx].page_no);
                pool.page_table.remove(&key);
                pool.frames[idx].valid = false;
            }
        }
        pool.files.remove(&file);
        Ok(())
    }

    /// Pin count of one page; 0 when the page is not resident.
    pub fn pin_count(&self, file: FileId, page_no: PageNo) -> u32 {
        let pool = self.inner.borrow();
        match pool.page_table.get(&(file, page_no)) {
            Some(&idx) => pool.frames[idx].pin_count,
            None => 0,
        }
    }

    /// Total pins held on pages of `file`.
    pub fn pinned_pages(&self, file: FileId) -> u32 {
        let pool = self.inner.borrow();
        pool.frames
            .iter()
            .filter(|f| f.valid && f.file == file)
            .map(|f| f.pin_count)
            .sum()
    }
}

/// A pinned page. Dropping the guard releases the pin on every exit path,
/// reporting the dirty flag accumulated through [`PageGuard::data_mut`].
/// Release-site errors of the "already unpinned" kind are absorbed here.
pub struct PageGuard {
    pool: Rc<BufMgr>,
    file: FileId,
    page_no: PageNo,
    dirty: Cell<bool>,
}

impl PageGuard {
    fn new(pool: Rc<BufMgr>, file: FileId, page_no: PageNo) -> Self {
        Self {
            pool,
            file,
            page_no,
            dirty: Cell::new(false),
        }
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    /// Borrow the page bytes. The borrow must end before any other pool
    /// call (fetch, alloc, unpin) on the same pool.
    pub fn data(&self) -> Ref<'_, [u8]> {
        let pool = self.pool.inner.borrow();
        Ref::map(pool, |p| {
            let idx = p.page_table[&(self.file, self.page_no)];
            &p.frames[idx].data[..]
        })
    }

    /// Mutably borrow the page bytes and mark the page dirty.
    pub fn data_mut(&self) -> RefMut<'_, [u8]> {
        self.dirty.set(true);
        let pool = self.pool.inner.borrow_mut();
        RefMut::map(pool, |p| {
            let idx = p.page_table[&(self.file, self.page_no)];
            &mut p.frames[idx].data[..]
        })
    }

    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin(self.file, self.page_no, self.dirty.get()) {
            if !e.is_unpin_noise() {
                tracing::warn!(file = self.file, page_no = self.page_no, error = %e, "unpin failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_with_file(frames: usize) -> (Rc<BufMgr>, FileId, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let blob = BlobFile::create(dir.path().join("t.blob")).unwrap();
        let pool = Rc::new(BufMgr::new(frames));
        let file = pool.register_file(blob);
        (pool, file, dir)
    }

    #[test]
    fn alloc_pins_and_drop_unpins() {
        let (pool, file, _dir) = pool_with_file(4);
        let page = pool.alloc_page(file).unwrap();
        assert_eq!(page.page_no(), 1);
        assert_eq!(pool.pin_count(file, 1), 1);
        drop(page);
        assert_eq!(pool.pin_count(file, 1), 0);
    }

    #[test]
    fn data_survives_eviction() {
        let (pool, file, _dir) = pool_with_file(2);
        {
            let page = pool.alloc_page(file).unwrap();
            page.data_mut()[0] = 0x5A;
        }
        // Force the first page out of the pool.
        for _ in 0..4 {
            let _ = pool.alloc_page(file).unwrap();
        }
        let page = pool.fetch_page(file, 1).unwrap();
        assert_eq!(page.data()[0], 0x5A);
    }

    #[test]
    fn pinned_pages_block_eviction() {
        let (pool, file, _dir) = pool_with_file(2);
        let a = pool.alloc_page(file).unwrap();
        let b = pool.alloc_page(file).unwrap();
        assert!(matches!(
            pool.alloc_page(file),
            Err(Error::BufferExhausted)
        ));
        drop(a);
        let c = pool.alloc_page(file).unwrap();
        assert_eq!(c.page_no(), 4);
        drop(b);
        drop(c);
    }

    #[test]
    fn unpin_unpinned_reports() {
        let (pool, file, _dir) = pool_with_file(2);
        let page = pool.alloc_page(file).unwrap();
        let no = page.page_no();
        drop(page);
        assert!(matches!(
            pool.unpin(file, no, false),
            Err(Error::PageNotPinned { .. })
        ));
        assert!(matches!(
            pool.unpin(file, 99, false),
            Err(Error::PageNotCached { .. })
        ));
    }

    #[test]
    fn flush_then_reopen_sees_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.blob");
        {
            let pool = Rc::new(BufMgr::new(4));
            let file = pool.register_file(BlobFile::create(&path).unwrap());
            let page = pool.alloc_page(file).unwrap();
            page.data_mut()[7] = 42;
            drop(page);
            pool.close_file(file).unwrap();
        }
        let pool = Rc::new(BufMgr::new(4));
        let file = pool.register_file(BlobFile::open(&path).unwrap());
        let page = pool.fetch_page(file, 1).unwrap();
        assert_eq!(page.data()[7], 42);
    }

    #[test]
    fn second_pin_on_cached_page() {
        let (pool, file, _dir) = pool_with_file(4);
        let a = pool.alloc_page(file).unwrap();
        let b = pool.fetch_page(file, a.page_no()).unwrap();
        assert_eq!(pool.pin_count(file, a.page_no()), 2);
        drop(a);
        assert_eq!(pool.pin_count(file, b.page_no()), 1);
        drop(b);
        assert_eq!(pool.pinned_pages(file), 0);
    }
}
