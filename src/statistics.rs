use std::time::Duration;

use serde::Serialize;

/// Execution counters accumulated across invocations until cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub instr_count: u64,
    pub host_call_count: u64,
    pub wasm_time: Duration,
    pub host_time: Duration,
}

impl Statistics {
    pub fn new() -> Self { Self::default() }

    pub fn total_time(&self) -> Duration { self.wasm_time + self.host_time }

    /// Instructions per second of guest time; zero before anything ran.
    pub fn instr_per_second(&self) -> f64 {
        let secs = self.wasm_time.as_secs_f64();
        if secs == 0.0 { 0.0 } else { self.instr_count as f64 / secs }
    }

    pub fn clear(&mut self) { *self = Self::default(); }
}
