pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod generic_key;

pub use btree_index::BPlusTree;
pub use btree_iterator::BPlusTreeIterator;
pub use btree_page::{
    HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef, NodeKind,
    NodePage, NodePageRef,
};
pub use generic_key::{BytewiseComparator, GenericKey, IntegerComparator, KeyComparator};
