//! Paged area store for LatticeDB.
//!
//! Durable byte-addressable areas with stable ids, a coarse exclusive latch
//! for multi-area atomic groups, and an explicit flush boundary. The table
//! state store and large-object storage sit on top of this crate; row data
//! page formats do not live here.

pub mod file;
mod latch;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{AreaId, Store, StoreLatch};
