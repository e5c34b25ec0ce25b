use rayon::prelude::*;

/// Where IoU computation and per-class matching run.
///
/// Results are identical under every variant; only the scheduling differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionContext {
    #[default]
    Sequential,
    /// Spread work over the global rayon pool.
    Parallel,
}

impl ExecutionContext {
    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionContext::Parallel)
    }

    /// Maps `f` over `0..n`, keeping index order in the output.
    pub fn map_indices<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            ExecutionContext::Sequential => (0..n).map(f).collect(),
            ExecutionContext::Parallel => (0..n).into_par_iter().map(f).collect(),
        }
    }
}


#[cfg(test)]
mod tests {
    use crate::processing::context::ExecutionContext;

    #[test]
    fn test_map_indices_keeps_order() {
        let sequential = ExecutionContext::Sequential.map_indices(64, |i| i * i);
        let parallel = ExecutionContext::Parallel.map_indices(64, |i| i * i);
        assert_eq!(sequential, parallel);
        assert_eq!(parallel[7], 49);
    }
}
