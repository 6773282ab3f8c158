//! Criterion micro-benchmarks for the kernel crate. See `benches/`.
