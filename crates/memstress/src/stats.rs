use serde::Serialize;

/// Tallies accumulated over one run.
///
/// Passed by `&mut` through the gate, the load generator and the page
/// allocator, then returned to the caller for the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Times the memory gate reported free pages below the threshold.
    pub vetoes: u64,
    /// Failed route adds or page mappings.
    pub failures: u64,
    /// Successful route adds.
    pub adds: u64,
    /// Successful route deletes.
    pub deletes: u64,
    /// Pages mapped in memory mode.
    pub pages_mapped: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// The closing line printed after a run.
    pub fn summary(&self) -> String {
        format!(
            "would have vetoed {} times ({} failures)",
            self.vetoes, self.failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line() {
        let stats = RunStats {
            vetoes: 3,
            failures: 1,
            ..RunStats::default()
        };
        assert_eq!(stats.summary(), "would have vetoed 3 times (1 failures)");
    }
}
