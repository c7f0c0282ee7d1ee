use rayon::prelude::*;
use tracing::warn;

/// Where per-example forward/backward passes run.
///
/// Results are collected in input order on both devices, so a run is reproducible
/// regardless of which one is selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// Examples of a mini-batch are spread over the rayon thread pool.
    Parallel,
}

impl Device {
    /// Picks `Parallel` when acceleration is requested and more than one worker is available.
    pub fn select(accelerate: bool) -> Self {
        if !accelerate {
            return Self::Cpu;
        }

        if rayon::current_num_threads() > 1 {
            Self::Parallel
        } else {
            warn!("acceleration requested but only one worker thread is available, using cpu");
            Self::Cpu
        }
    }

    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match self {
            Self::Cpu => items.iter().map(f).collect(),
            Self::Parallel => items.par_iter().map(f).collect(),
        }
    }
}
