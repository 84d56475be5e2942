//! Storage layer: pages, blob files, relation files.

pub mod blob;
pub mod page;
pub mod relation;

pub use blob::BlobFile;
pub use page::{PageNo, RecordId, NO_PAGE, PAGE_SIZE};
pub use relation::{RelationFile, RelationScan};
