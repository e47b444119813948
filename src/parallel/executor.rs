//! Parallel executor for per-method work
//!
//! Uses Rayon for work-stealing parallelism with configurable limits.

use crate::compiler::graph::Graph;
use crate::compiler::llvm::Function;
use crate::compiler::{lower_method, CompilationContext};
use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for parallel execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Maximum number of worker threads (default: num_cpus)
    pub max_parallelism: usize,
    /// Fail on the first error instead of collecting every result
    pub fail_fast: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            fail_fast: false,
        }
    }
}

/// Parallel map over a slice
///
/// # Returns
/// * `Ok(results)` - one result per item, in item order
/// * `Err(Error)` - the pool could not be built, or the first item error
///   when `fail_fast` is set
///
/// # Example
/// ```ignore
/// let sizes = parallel_map(&classes, |c| Ok(c.instance_size()), &ParallelConfig::default())?;
/// ```
pub fn parallel_map<T, R, F>(
    items: &[T],
    mapper: F,
    config: &ParallelConfig,
) -> Result<Vec<Result<R>>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Send + Sync,
{
    // Empty slice fast path
    if items.is_empty() {
        return Ok(Vec::new());
    }

    // Single item - no pool needed
    if items.len() == 1 {
        let result = mapper(&items[0]);
        if config.fail_fast {
            return Ok(vec![Ok(result?)]);
        }
        return Ok(vec![result]);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_parallelism.max(1).min(items.len()))
        .build()
        .map_err(|e| Error::ThreadPool(format!("Failed to create thread pool: {}", e)))?;

    pool.install(|| {
        if config.fail_fast {
            let values = items
                .par_iter()
                .map(|item| mapper(item))
                .collect::<Result<Vec<R>>>()?;
            Ok(values.into_iter().map(Ok).collect())
        } else {
            Ok(items.par_iter().map(|item| mapper(item)).collect())
        }
    })
}

/// Lower every graph on the pool configured in `ctx`
///
/// A structural failure aborts only the method it occurred in; its slot
/// holds the error.
pub fn lower_methods(ctx: &CompilationContext, graphs: &[Graph]) -> Result<Vec<Result<Function>>> {
    parallel_map(graphs, |graph| lower_method(ctx, graph), &ctx.options().parallel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_even(n: &i64) -> Result<i64> {
        if n % 2 == 0 {
            Ok(n * 2)
        } else {
            Err(Error::internal(format!("odd: {}", n)))
        }
    }

    #[test]
    fn test_parallel_map_basic() {
        let results = parallel_map(&[2i64, 4, 6], double_even, &ParallelConfig::default()).unwrap();
        let values: Vec<i64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![4, 8, 12]);
    }

    #[test]
    fn test_parallel_map_empty() {
        let items: Vec<i64> = vec![];
        let results = parallel_map(&items, double_even, &ParallelConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parallel_map_error_fail_fast() {
        let config = ParallelConfig {
            fail_fast: true,
            ..Default::default()
        };
        assert!(parallel_map(&[2i64, 3, 4], double_even, &config).is_err());
    }

    #[test]
    fn test_parallel_map_error_collect_all() {
        let config = ParallelConfig {
            max_parallelism: 2,
            fail_fast: false,
        };
        let results = parallel_map(&[2i64, 3, 4], double_even, &config).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), 8);
    }
}
