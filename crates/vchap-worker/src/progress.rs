//! Progress aggregation.
//!
//! Each pipeline phase owns a fixed window of the global 0-100 progress
//! scale. Phases report local progress in [0, 100] and the window maps it
//! into its slice, so the global number is monotone as long as phases run
//! in order and each phase's local progress is monotone.

/// A half-open slice [lo, hi] of the global progress scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWindow {
    lo: f64,
    hi: f64,
}

impl StageWindow {
    /// Transcription: audio extraction plus speech-to-text.
    pub const TRANSCRIPTION: StageWindow = StageWindow { lo: 0.0, hi: 50.0 };
    /// Chapter generation with the language model.
    pub const GENERATION: StageWindow = StageWindow { lo: 50.0, hi: 85.0 };
    /// Validation and persistence of results.
    pub const PERSISTENCE: StageWindow = StageWindow { lo: 85.0, hi: 100.0 };

    pub fn new(lo: f64, hi: f64) -> Self {
        debug_assert!(lo <= hi);
        Self { lo, hi }
    }

    /// Map local progress in [0, 100] into this window's global slice.
    /// Local values outside [0, 100] are clamped.
    pub fn map(&self, local: f64) -> f64 {
        let local = local.clamp(0.0, 100.0);
        self.lo + (self.hi - self.lo) * local / 100.0
    }

    /// Sub-window covering the [lo, hi] local percent range of this one.
    ///
    /// Lets a nested step (audio extraction inside transcription, say)
    /// report its own 0-100 without knowing where it sits globally.
    pub fn narrow(&self, lo: f64, hi: f64) -> StageWindow {
        StageWindow {
            lo: self.map(lo),
            hi: self.map(hi),
        }
    }

    pub fn start(&self) -> f64 {
        self.lo
    }

    pub fn end(&self) -> f64 {
        self.hi
    }
}
