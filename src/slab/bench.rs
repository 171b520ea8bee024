//! Benchmarks for the slab allocation fast path
