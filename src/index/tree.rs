//! The B+ tree index proper: create-or-open with bulk load from the
//! relation, recursive insert with split propagation and root promotion,
//! point lookup, and close.

use std::rc::Rc;

use crate::buffer::{BufMgr, FileId};
use crate::error::{Error, Result};
use crate::storage::blob::BlobFile;
use crate::storage::page::{PageNo, RecordId, NO_PAGE, PAGE_SIZE};
use crate::storage::relation::RelationScan;

use super::layout::{
    encode_relation_name, InternalMut, InternalView, LeafMut, LeafView, MetaMut, MetaView,
    INTERNAL_CAPACITY, LEAF_CAPACITY,
};
use super::node;
use super::scan::ScanState;
use super::Datatype;

/// The meta page is created first and therefore always page 1.
pub const META_PAGE_NO: PageNo = 1;

/// A disk-resident B+ tree over one integer attribute of a relation file.
/// Maps each key to the record id of the tuple it was extracted from.
pub struct BTreeIndex {
    pub(super) pool: Rc<BufMgr>,
    pub(super) file: FileId,
    pub(super) root_page_no: PageNo,
    pub(super) scan: Option<ScanState>,
    relation_name: String,
    attr_byte_offset: usize,
    closed: bool,
}

impl BTreeIndex {
    /// Open the index for `relation_name` over the integer attribute at
    /// `attr_byte_offset`. The index file is named
    /// `"<relation_name>.<attr_byte_offset>"`; if it does not exist yet it
    /// is created and bulk loaded from the relation. Reopening validates the
    /// stored metadata against the arguments and fails with `BadIndexInfo`
    /// on any mismatch.
    ///
    /// Returns the index and the index file name.
    pub fn open(
        pool: &Rc<BufMgr>,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: Datatype,
    ) -> Result<(Self, String)> {
        let index_name = format!("{}.{}", relation_name, attr_byte_offset);
        match BlobFile::create(&index_name) {
            Ok(blob) => {
                let file = pool.register_file(blob);
                let mut index = Self {
                    pool: Rc::clone(pool),
                    file,
                    root_page_no: NO_PAGE,
                    scan: None,
                    relation_name: relation_name.to_string(),
                    attr_byte_offset,
                    closed: false,
                };
                index.init_file(attr_type)?;
                tracing::info!(index = %index_name, "index file created");
                index.bulk_load()?;
                Ok((index, index_name))
            }
            Err(Error::FileExists(_)) => {
                let blob = BlobFile::open(&index_name)?;
                let file = pool.register_file(blob);
                let meta = pool.fetch_page(file, META_PAGE_NO)?;
                let (name, offset, ty, root) = {
                    let data = meta.data();
                    let view = MetaView(&data);
                    (
                        view.relation_name(),
                        view.attr_byte_offset(),
                        view.attr_type(),
                        view.root_page_no(),
                    )
                };
                // Read-only validation; the meta page goes back clean.
                drop(meta);
                if ty != attr_type as i32
                    || offset != attr_byte_offset as i32
                    || name != encode_relation_name(relation_name)
                {
                    pool.close_file(file)?;
                    return Err(Error::BadIndexInfo(format!(
                        "index {} was built over different parameters",
                        index_name
                    )));
                }
                tracing::info!(index = %index_name, root_page_no = root, "index file opened");
                Ok((
                    Self {
                        pool: Rc::clone(pool),
                        file,
                        root_page_no: root,
                        scan: None,
                        relation_name: relation_name.to_string(),
                        attr_byte_offset,
                        closed: false,
                    },
                    index_name,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Allocate and initialize the meta page and an empty level-1 root.
    fn init_file(&mut self, attr_type: Datatype) -> Result<()> {
        let meta = self.pool.alloc_page(self.file)?;
        debug_assert_eq!(meta.page_no(), META_PAGE_NO);
        let root = self.pool.alloc_page(self.file)?;
        {
            let mut data = meta.data_mut();
            let mut m = MetaMut(&mut data);
            m.init(
                &self.relation_name,
                self.attr_byte_offset as i32,
                attr_type as i32,
            );
            m.set_root_page_no(root.page_no());
        }
        // A fresh root is an internal node whose children are leaves; its
        // child slots stay zero until the first insert bootstraps a leaf.
        InternalMut(&mut root.data_mut()).set_level(1);
        self.root_page_no = root.page_no();
        Ok(())
    }

    /// Insert one entry for every record of the relation.
    fn bulk_load(&mut self) -> Result<()> {
        let rel = BlobFile::open(&self.relation_name)?;
        let rel_file = self.pool.register_file(rel);
        let mut scan = RelationScan::new(Rc::clone(&self.pool), rel_file)?;
        let mut records = 0u64;
        loop {
            match scan.scan_next() {
                Ok((rid, bytes)) => {
                    let key = self.extract_key(&bytes)?;
                    self.insert(key, rid)?;
                    records += 1;
                }
                Err(Error::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }
        drop(scan);
        self.pool.close_file(rel_file)?;
        tracing::info!(relation = %self.relation_name, records, "bulk load finished");
        Ok(())
    }

    fn extract_key(&self, record: &[u8]) -> Result<i32> {
        let off = self.attr_byte_offset;
        record
            .get(off..off + 4)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(|| {
                Error::CorruptPage(format!("record shorter than attribute offset {}", off))
            })
    }

    /// Insert `(key, rid)`. Splits propagate bottom-up; a split that reaches
    /// the root promotes a new root above it.
    pub fn insert(&mut self, key: i32, rid: RecordId) -> Result<()> {
        if let Some((pushed, right)) = self.descend(self.root_page_no, key, rid)? {
            self.promote_root(pushed, right)?;
        }
        Ok(())
    }

    /// Recursive insert through internal node `page_no`. Returns
    /// `Some((pushed_key, new_right_page))` when the child split and this
    /// node was itself full, `None` when the change was absorbed.
    fn descend(&mut self, page_no: PageNo, key: i32, rid: RecordId) -> Result<Option<(i32, PageNo)>> {
        let guard = self.pool.fetch_page(self.file, page_no)?;
        let (level, pos, child) = {
            let data = guard.data();
            let view = InternalView(&data);
            let pos = node::internal_child_pos(&view, key);
            (view.level(), pos, view.child(pos))
        };

        if child == NO_PAGE {
            // Tree without leaves: hang the very first leaf off slot 0.
            debug_assert_eq!(pos, 0);
            let leaf = self.pool.alloc_page(self.file)?;
            {
                let mut data = leaf.data_mut();
                let mut lm = LeafMut(&mut data);
                lm.set_entry(0, key, rid);
                lm.set_right_sib(NO_PAGE);
            }
            InternalMut(&mut guard.data_mut()).set_child(0, leaf.page_no());
            tracing::debug!(leaf = leaf.page_no(), "first leaf initialized");
            return Ok(None);
        }

        let split = if level == 1 {
            self.leaf_insert(child, key, rid)?
        } else {
            self.descend(child, key, rid)?
        };
        let Some((child_key, child_page)) = split else {
            return Ok(None);
        };

        let occ = node::internal_occupancy(&InternalView(&guard.data()));
        if occ < INTERNAL_CAPACITY {
            node::internal_insert_shift(&mut guard.data_mut(), pos, occ, child_key, child_page);
            return Ok(None);
        }

        let right = self.pool.alloc_page(self.file)?;
        let mut left_buf = vec![0u8; PAGE_SIZE];
        left_buf.copy_from_slice(&guard.data());
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let pushed = node::internal_split(&mut left_buf, &mut right_buf, pos, child_key, child_page);
        guard.data_mut().copy_from_slice(&left_buf);
        right.data_mut().copy_from_slice(&right_buf);
        tracing::debug!(
            left = page_no,
            right = right.page_no(),
            pushed,
            "internal node split"
        );
        Ok(Some((pushed, right.page_no())))
    }

    /// Leaf-level arm of the recursion.
    fn leaf_insert(&mut self, page_no: PageNo, key: i32, rid: RecordId) -> Result<Option<(i32, PageNo)>> {
        let guard = self.pool.fetch_page(self.file, page_no)?;
        let (pos, occ) = {
            let data = guard.data();
            let view = LeafView(&data);
            (node::leaf_insert_pos(&view, key), node::leaf_occupancy(&view))
        };
        if occ < LEAF_CAPACITY {
            node::leaf_insert_shift(&mut guard.data_mut(), pos, occ, key, rid);
            return Ok(None);
        }

        let right = self.pool.alloc_page(self.file)?;
        let mut left_buf = vec![0u8; PAGE_SIZE];
        left_buf.copy_from_slice(&guard.data());
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let pushed = node::leaf_split(
            &mut left_buf,
            &mut right_buf,
            right.page_no(),
            pos,
            key,
            rid,
        );
        guard.data_mut().copy_from_slice(&left_buf);
        right.data_mut().copy_from_slice(&right_buf);
        tracing::debug!(
            left = page_no,
            right = right.page_no(),
            pushed,
            "leaf split"
        );
        Ok(Some((pushed, right.page_no())))
    }

    /// Install a new root above the split halves of the old one and persist
    /// the new root number in the meta page in the same step.
    fn promote_root(&mut self, key: i32, right_child: PageNo) -> Result<()> {
        let old_root = self.root_page_no;
        let old_level = {
            let guard = self.pool.fetch_page(self.file, old_root)?;
            let level = InternalView(&guard.data()).level();
            level
        };
        let new_root = self.pool.alloc_page(self.file)?;
        {
            let mut data = new_root.data_mut();
            let mut nm = InternalMut(&mut data);
            nm.set_level(old_level + 1);
            nm.set_key(0, key);
            nm.set_child(0, old_root);
            nm.set_child(1, right_child);
        }
        self.root_page_no = new_root.page_no();
        let meta = self.pool.fetch_page(self.file, META_PAGE_NO)?;
        MetaMut(&mut meta.data_mut()).set_root_page_no(self.root_page_no);
        tracing::debug!(
            root = self.root_page_no,
            level = old_level + 1,
            "root promoted"
        );
        Ok(())
    }

    /// Descend to the leaf where keys >= `low` begin. `NO_PAGE` when the
    /// tree has no leaves yet.
    pub(super) fn find_leaf(&self, low: i32) -> Result<PageNo> {
        let mut page_no = self.root_page_no;
        loop {
            let guard = self.pool.fetch_page(self.file, page_no)?;
            let (level, child) = {
                let data = guard.data();
                let view = InternalView(&data);
                let pos = node::internal_child_pos(&view, low);
                (view.level(), view.child(pos))
            };
            if level == 1 {
                return Ok(child);
            }
            debug_assert_ne!(child, NO_PAGE);
            page_no = child;
        }
    }

    /// Equality probe: the record id of the first entry with exactly `key`,
    /// or `NoSuchKeyFound`.
    pub fn lookup(&self, key: i32) -> Result<RecordId> {
        let leaf_page = self.find_leaf(key)?;
        if leaf_page == NO_PAGE {
            return Err(Error::NoSuchKeyFound);
        }
        let mut guard = self.pool.fetch_page(self.file, leaf_page)?;
        let mut entry = 0usize;
        loop {
            enum Step {
                Jump(PageNo),
                Miss,
                Skip,
                Hit(RecordId),
            }
            let step = {
                let data = guard.data();
                let view = LeafView(&data);
                if entry == LEAF_CAPACITY || !view.is_occupied(entry) {
                    match view.right_sib() {
                        NO_PAGE => Step::Miss,
                        sib => Step::Jump(sib),
                    }
                } else if view.key(entry) < key {
                    Step::Skip
                } else if view.key(entry) == key {
                    Step::Hit(view.rid(entry))
                } else {
                    Step::Miss
                }
            };
            match step {
                Step::Jump(sib) => {
                    guard = self.pool.fetch_page(self.file, sib)?;
                    entry = 0;
                }
                Step::Skip => entry += 1,
                Step::Hit(rid) => return Ok(rid),
                Step::Miss => return Err(Error::NoSuchKeyFound),
            }
        }
    }

    /// End any active scan, flush every dirty page of the index, and close
    /// the file. The index is unusable afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // Releases the scan's pinned leaf; stale-pin errors are absorbed at
        // the guard's release site.
        self.scan = None;
        self.pool.close_file(self.file)?;
        self.closed = true;
        tracing::info!(relation = %self.relation_name, "index closed");
        Ok(())
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn root_page_no(&self) -> PageNo {
        self.root_page_no
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if !self.closed {
            self.scan = None;
            if let Err(e) = self.pool.close_file(self.file) {
                tracing::warn!(error = %e, "closing index on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::relation::RelationFile;
    use tempfile::tempdir;

    fn empty_relation(pool: &Rc<BufMgr>, path: &std::path::Path) {
        RelationFile::create(pool, path).unwrap().finish().unwrap();
    }

    #[test]
    fn create_names_the_file_after_relation_and_offset() {
        let dir = tempdir().unwrap();
        let pool = Rc::new(BufMgr::new(16));
        let rel = dir.path().join("orders.rel");
        empty_relation(&pool, &rel);
        let (mut index, name) =
            BTreeIndex::open(&pool, rel.to_str().unwrap(), 16, Datatype::Integer).unwrap();
        assert_eq!(name, format!("{}.16", rel.to_str().unwrap()));
        assert!(std::path::Path::new(&name).exists());
        index.close().unwrap();
    }

    #[test]
    fn insert_then_lookup() {
        let dir = tempdir().unwrap();
        let pool = Rc::new(BufMgr::new(16));
        let rel = dir.path().join("kv.rel");
        empty_relation(&pool, &rel);
        let (mut index, _) =
            BTreeIndex::open(&pool, rel.to_str().unwrap(), 0, Datatype::Integer).unwrap();

        index.insert(10, RecordId::new(1, 0)).unwrap();
        index.insert(20, RecordId::new(2, 1)).unwrap();
        index.insert(5, RecordId::new(3, 2)).unwrap();
        assert_eq!(index.lookup(10).unwrap(), RecordId::new(1, 0));
        assert_eq!(index.lookup(5).unwrap(), RecordId::new(3, 2));
        assert_eq!(index.lookup(20).unwrap(), RecordId::new(2, 1));
        assert!(matches!(index.lookup(7), Err(Error::NoSuchKeyFound)));
        assert_eq!(pool.pinned_pages(index.file()), 0);
        index.close().unwrap();
    }

    #[test]
    fn bulk_load_indexes_every_record() {
        let dir = tempdir().unwrap();
        let pool = Rc::new(BufMgr::new(16));
        let rel = dir.path().join("bulk.rel");
        let mut file = RelationFile::create(&pool, &rel).unwrap();
        for k in [3i32, 1, 2] {
            let mut rec = vec![0u8; 8];
            rec[0..4].copy_from_slice(&k.to_le_bytes());
            file.append(&rec).unwrap();
        }
        file.finish().unwrap();

        let (mut index, _) =
            BTreeIndex::open(&pool, rel.to_str().unwrap(), 0, Datatype::Integer).unwrap();
        for k in 1..=3 {
            index.lookup(k).unwrap();
        }
        index.close().unwrap();
    }
}
