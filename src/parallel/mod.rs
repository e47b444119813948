//! Parallel execution support for Kiln
//!
//! Methods are independent compilation units, so table building and
//! lowering fan out over a worker pool.

mod executor;

pub use executor::{lower_methods, parallel_map, ParallelConfig};
