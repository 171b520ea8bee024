// slabpool - slab-backed node containers
// Amortized node allocation for ordered containers, lists and small vectors

#![warn(rust_2018_idioms)]

pub mod containers;
pub mod mempool;
pub mod slab;

// Re-exports for convenience
pub use containers::{SlabList, SlabMap, SlabMultimap, SlabMultiset, SlabSet, SlabVec};
pub use mempool::{Pool, PoolStats};
pub use slab::{SlabAllocator, SlabRef};

/// slabpool error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Out of memory: pool '{pool}' would exceed its {limit} byte limit (requested {requested} more)")]
        OutOfMemory {
            pool: String,
            requested: usize,
            limit: usize,
        },
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        // VERSION is a static string, always valid
        let _version: &str = VERSION;
        // Just ensure the constant is accessible
    }
}
