/// Tunables for the hazard-pointer reclamation engine.
///
/// Built with the usual `Config::default().with_...()` chain and handed to
/// [`crate::init`]. Kept as a single struct rather than threading several
/// generic parameters through every type in the crate, per the
/// configuration-struct re-architecture the spec calls for.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of guards a single thread may hold at once.
    ///
    /// Default 8, minimum 2 (the Hamt needs two guards per traversal step:
    /// the parent's `main` and the current node's `main`).
    pub hazards_per_thread: usize,
    /// Capacity of a thread's retired-pointer list before a `scan()` is
    /// triggered automatically.
    pub retired_capacity: usize,
    /// Upper bound on the number of `ThreadRecord`s the registry will ever
    /// allocate. `ThreadRecord`s are recycled across threads, so this bounds
    /// peak concurrency, not total threads over the program's lifetime.
    /// Enforced in `attach_thread`: attaching once every record is owned and
    /// the registry is already at this count panics, the same contract-
    /// violation treatment as exhausting a thread's own guard budget.
    pub max_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hazards_per_thread: 8,
            retired_capacity: 256,
            max_threads: 256,
        }
    }
}

impl Config {
    /// Sets the per-thread hazard budget.
    pub fn with_hazards_per_thread(mut self, n: usize) -> Self {
        self.hazards_per_thread = n;
        self
    }

    /// Sets the retired-list capacity before an automatic scan.
    pub fn with_retired_capacity(mut self, n: usize) -> Self {
        self.retired_capacity = n;
        self
    }

    /// Sets the maximum number of concurrently live thread records.
    pub fn with_max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }
}
