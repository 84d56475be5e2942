//! B+ tree index: page layout, node operations, the tree, and range scans.

pub mod layout;
pub mod node;
pub mod scan;
pub mod tree;

pub use tree::BTreeIndex;

/// Attribute types an index can be built over. Only fixed-width integers
/// are supported; the discriminant is what the meta page stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer = 0,
}

/// Comparison operators for scan bounds: the low bound takes `Gt`/`Gte`,
/// the high bound `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Lte,
    Gt,
    Gte,
}
