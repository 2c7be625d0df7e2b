use std::time::Duration;

// ---------------------------------------------------------------------------
// LinkSimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process link adapter.
///
/// All fields default to a perfect adapter: attaches succeed immediately,
/// no operation ever fails.
#[derive(Debug, Clone)]
pub struct LinkSimConfig {
    // ---
    /// Delay before every `create_*` call resolves.
    pub attach_delay: Duration,

    /// If `Some`, every `create_*` call fails with this reason.
    pub attach_failure: Option<String>,

    /// Probability `[0.0, 1.0]` that any settle or send is rejected.
    pub op_failure_rate: f64,

    /// RNG seed for reproducible failure sequences. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl Default for LinkSimConfig {
    fn default() -> Self {
        // ---
        Self {
            attach_delay: Duration::ZERO,
            attach_failure: None,
            op_failure_rate: 0.0,
            seed: None,
        }
    }
}

// ---

impl LinkSimConfig {
    // ---
    /// Perfect adapter with no impairments. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Slow attaches and one operation in five rejected.
    pub fn flaky() -> Self {
        // ---
        Self {
            attach_delay: Duration::from_millis(50),
            op_failure_rate: 0.2,
            ..Default::default()
        }
    }

    // ---

    /// The remote end refuses every link.
    pub fn unreachable() -> Self {
        // ---
        Self {
            attach_failure: Some("remote refused link".into()),
            ..Default::default()
        }
    }
}
