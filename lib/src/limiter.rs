use std::sync::Arc;
use std::num::NonZeroUsize;

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Chainable, Result};
use crate::compiler::CancelToken;

/// Runs tasks with a bound on how many are in flight at once.
///
/// The pool of `limit` threads is started by the first [`Limiter::run()`] and
/// shared by every later run, including those of clones.
#[derive(Debug, Clone)]
pub struct Limiter {
    limit: NonZeroUsize,
    pool: Arc<Mutex<Option<Arc<ThreadPool>>>>,
}

impl Limiter {
    pub fn new(limit: NonZeroUsize) -> Self {
        Limiter { limit, pool: Arc::default() }
    }

    pub fn limit(&self) -> NonZeroUsize {
        self.limit
    }

    fn pool(&self) -> Result<Arc<ThreadPool>> {
        let mut pool = self.pool.lock();
        if let Some(pool) = &*pool {
            return Ok(pool.clone());
        }

        let threads = self.limit.get();
        let started = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("plume-page-{i}"))
            .build()
            .chain_with(|| error! {
                "failed to start page build threads",
                "threads" => threads,
            })?;

        Ok(pool.insert(Arc::new(started)).clone())
    }

    /// Runs `f` on every task, at most `limit` at a time. Results are in task
    /// order. Tasks that haven't started when `cancel` fires yield `None`.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, cancel: &CancelToken, f: F) -> Result<Vec<Option<R>>>
        where T: Send, R: Send, F: Fn(T) -> R + Send + Sync
    {
        if tasks.is_empty() {
            return Ok(vec![]);
        }

        let results: Vec<Option<R>> = self.pool()?.install(|| tasks.into_par_iter()
            .map(|task| (!cancel.is_cancelled()).then(|| f(task)))
            .collect());

        Ok(results)
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Limiter::new(crate::config::Options::DEFAULT_CONCURRENCY)
    }
}
