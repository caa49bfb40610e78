//! Per-frame counters.

use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub triangles: u64,
    pub pipeline_binds: u32,
    /// CPU time spent recording the geometry pass.
    pub geometry_time: Duration,
}

impl FrameStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_draw(&mut self, index_count: u32) {
        self.draw_calls += 1;
        self.triangles += u64::from(index_count / 3);
    }

    pub fn record_pipeline_bind(&mut self) {
        self.pipeline_binds += 1;
    }

    pub fn geometry_time_ms(&self) -> f64 {
        self.geometry_time.as_secs_f64() * 1000.0
    }
}
