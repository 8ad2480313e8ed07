use log::debug;
use crate::{
    config::{validate_compute_rate, DEFAULT_COMPUTE_RATE},
    error::EngineResult,
    lattice::Lattice,
    Float,
};

/// Per-step physics inputs, fixed for the duration of a batch of steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    /// BGK relaxation rate ω = 1/τ
    pub omega: Float,
    /// Free-stream speed held at the left and right columns; `None` closes the edges
    pub inflow_speed: Option<Float>,
}

/// Something that can advance a [`Lattice`] by whole time steps.
pub trait ComputeBackend {
    fn name(&self) -> &'static str;

    /// Advance `steps` steps. On return the lattice's front buffer holds the
    /// state after the last step.
    fn advance(&mut self, lattice: &mut Lattice, params: &StepParams, steps: usize) -> EngineResult<()>;
}

/// Decides how many steps each rendered frame performs.
#[derive(Debug, Clone)]
pub struct ComputeScheduler {
    compute_rate: u32,
    paused: bool,
    step_mode: bool,
    step_requested: bool,
}

impl Default for ComputeScheduler {
    fn default() -> Self {
        Self {
            compute_rate: DEFAULT_COMPUTE_RATE,
            paused: false,
            step_mode: false,
            step_requested: false,
        }
    }
}

impl ComputeScheduler {
    pub fn new(compute_rate: u32, paused: bool, step_mode: bool) -> EngineResult<Self> {
        Ok(Self {
            compute_rate: validate_compute_rate(compute_rate as i64)?,
            paused,
            step_mode,
            step_requested: false,
        })
    }

    pub fn compute_rate(&self) -> u32 {
        self.compute_rate
    }

    pub fn set_compute_rate(&mut self, rate: i64) -> EngineResult<()> {
        self.compute_rate = validate_compute_rate(rate)?;
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    pub fn is_step_mode(&self) -> bool {
        self.step_mode
    }

    pub fn set_step_mode(&mut self, enabled: bool) {
        self.step_mode = enabled;
        self.step_requested = false;
    }

    /// Queue a single step. Ignored (returns false) outside step mode.
    pub fn request_step(&mut self) -> bool {
        if !self.step_mode {
            debug!("step request ignored: not in step mode");
            return false;
        }
        self.step_requested = true;
        true
    }

    pub fn has_pending_step(&self) -> bool {
        self.step_requested
    }

    /// Number of steps to run this frame. Consumes a pending step request.
    pub fn steps_for_frame(&mut self) -> usize {
        if self.paused {
            return 0;
        }
        if self.step_mode {
            return if std::mem::take(&mut self.step_requested) { 1 } else { 0 };
        }
        self.compute_rate as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_COMPUTE_RATE;

    #[test]
    fn free_running_uses_compute_rate() {
        let mut scheduler = ComputeScheduler::new(7, false, false).unwrap();
        assert_eq!(scheduler.steps_for_frame(), 7);
        assert_eq!(scheduler.steps_for_frame(), 7);
    }

    #[test]
    fn paused_schedules_nothing() {
        let mut scheduler = ComputeScheduler::default();
        assert!(scheduler.toggle_pause());
        assert_eq!(scheduler.steps_for_frame(), 0);
        assert!(!scheduler.toggle_pause());
        assert_eq!(scheduler.steps_for_frame(), DEFAULT_COMPUTE_RATE as usize);
    }

    #[test]
    fn step_mode_runs_exactly_one_step_per_request() {
        let mut scheduler = ComputeScheduler::new(MAX_COMPUTE_RATE, false, true).unwrap();
        assert_eq!(scheduler.steps_for_frame(), 0);
        assert!(scheduler.request_step());
        assert_eq!(scheduler.steps_for_frame(), 1);
        assert_eq!(scheduler.steps_for_frame(), 0);
    }

    #[test]
    fn step_request_outside_step_mode_is_ignored() {
        let mut scheduler = ComputeScheduler::default();
        assert!(!scheduler.request_step());
        assert!(!scheduler.has_pending_step());
    }

    #[test]
    fn paused_step_mode_keeps_request_for_later() {
        let mut scheduler = ComputeScheduler::new(3, true, true).unwrap();
        scheduler.request_step();
        assert_eq!(scheduler.steps_for_frame(), 0);
        scheduler.toggle_pause();
        assert_eq!(scheduler.steps_for_frame(), 1);
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let mut scheduler = ComputeScheduler::default();
        assert!(scheduler.set_compute_rate(0).is_err());
        assert!(scheduler.set_compute_rate(-4).is_err());
        assert!(scheduler.set_compute_rate(MAX_COMPUTE_RATE as i64 + 1).is_err());
        assert!(scheduler.set_compute_rate(1).is_ok());
        assert!(scheduler.set_compute_rate(MAX_COMPUTE_RATE as i64).is_ok());
        assert_eq!(scheduler.compute_rate(), MAX_COMPUTE_RATE);
    }
}
