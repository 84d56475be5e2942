//! Page-level constants and identifiers shared by the storage and index layers.

/// Fixed page size. Every node of the index and every relation page occupies
/// exactly one page.
pub const PAGE_SIZE: usize = 8192;

/// Pages are numbered from 1; 0 encodes "no page" throughout the on-disk format.
pub type PageNo = u32;

/// The "no page" sentinel. The allocator never hands this out.
pub const NO_PAGE: PageNo = 0;

/// Record identifier: addresses a tuple within the relation file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_no: PageNo,
    pub slot_no: u16,
}

impl RecordId {
    pub fn new(page_no: PageNo, slot_no: u16) -> Self {
        Self { page_no, slot_no }
    }
}
