pub mod cell_reader;
pub mod child_list;
pub mod error;
pub mod header;
pub mod hive;
pub mod node_key;
pub mod source;
pub mod tree;

#[cfg(test)]
mod testutil;

pub use cell_reader::CellReader;
pub use child_list::{ChildListCell, ChildSlots, read_child_slots};
pub use error::{HiveError, Result};
pub use header::{BaseBlock, CELL_BASE, HEADER_SIZE, ROOT_KEY_OFFSET};
pub use hive::{Hive, ParseOptions};
pub use node_key::{NodeKey, NO_CHILDREN, ROOT_FLAG};
pub use source::{FileSource, HiveSource, MemorySource};
pub use tree::{BuildOutcome, TreeBuilder};
