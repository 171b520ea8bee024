//! Mempool accounting
//!
//! Every slab-backed container is attached to a [`Pool`]. The pool does not
//! own any storage itself: it is the accounting and admission service the
//! allocators report to, so that a process can answer "how much memory do
//! my maps/sets/lists hold right now" per pool.
//!
//! # Architecture
//!
//! ```text
//! Pool "osd_cache"
//!   ├─→ slabs:       3          (inline slabs count too)
//!   ├─→ free_items:  9          (slots sitting on slab free lists)
//!   ├─→ inuse_items: 14         (live container nodes)
//!   └─→ free/inuse bytes        (same split, in bytes)
//!
//! SlabAllocator ──slab_new/slab_delete──→ Pool
//!               ──item_allocate/item_free─→ Pool
//! ```
//!
//! Counters are atomic: a pool may be shared by many containers on many
//! threads, even though each individual container is single-threaded.

pub mod pool;
pub mod stats;

pub use pool::Pool;
pub use stats::PoolStats;
