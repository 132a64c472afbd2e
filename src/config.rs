//! Runtime configuration types.

/// Output format for code dumps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpFormat {
    /// Offset-prefixed hex listing
    #[default]
    Human,
    /// JSON object with length and hex code
    Json,
}

/// Runtime configuration for the JIT demo
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the code region in bytes
    pub code_capacity: usize,
    /// Capacity of the data region in bytes
    pub data_capacity: usize,
    /// Trace emission and launch events to stderr
    pub trace_jit: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            code_capacity: 4096,
            data_capacity: 4096,
            trace_jit: false,
        }
    }
}
