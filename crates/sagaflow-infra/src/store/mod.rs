//! Instance store backends.

mod memory;

pub use memory::MemoryInstanceStore;
