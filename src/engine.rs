use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::{
    config::{clamp_flow_speed, clamp_viscosity, BackendKind, Config, PresetConfig, SimulationParams},
    control::{self, Command, CommandQueue, ControlHandle, PointerEvent},
    cpu::CpuStepper,
    editor::{BarrierEditor, DrawTool},
    error::{EngineError, EngineResult},
    fields::{self, ColorMap, FieldBuffer, OutputField},
    gpu::GPUContext,
    lattice::{Lattice, StabilityLimits},
    presets::{BarrierPreset, FluidPreset},
    scheduler::{ComputeBackend, ComputeScheduler, StepParams},
    Float,
};

/// What one call to [`Engine::frame`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub steps: usize,
    /// Steps since the last fluid reset
    pub iteration: u64,
    pub elapsed: Duration,
}

/// The simulation engine: lattice, compute backend, parameters, barrier
/// editor and control queue. All mutation happens between steps, on the
/// thread that calls [`Engine::frame`].
pub struct Engine {
    lattice: Lattice,
    backend: Box<dyn ComputeBackend>,
    params: SimulationParams,
    scheduler: ComputeScheduler,
    editor: BarrierEditor,
    fluid_preset: FluidPreset,
    barrier_preset: BarrierPreset,
    limits: StabilityLimits,
    fault: Option<EngineError>,
    commands: CommandQueue,
    handle: ControlHandle,
    iteration: u64,
}

impl Engine {
    /// CPU-backed engine.
    pub fn new(nx: usize, ny: usize, params: SimulationParams, presets: PresetConfig) -> EngineResult<Self> {
        Self::with_backend(nx, ny, params, presets, Box::new(CpuStepper::new()))
    }

    pub fn with_backend(
        nx: usize,
        ny: usize,
        params: SimulationParams,
        presets: PresetConfig,
        backend: Box<dyn ComputeBackend>,
    ) -> EngineResult<Self> {
        let params = params.validated()?;
        let scheduler = ComputeScheduler::new(params.compute_rate, params.paused, params.step_mode)?;
        let mut lattice = Lattice::new(nx, ny)?;

        presets.barrier.apply(&mut lattice);
        presets.fluid.apply(&mut lattice, params.flow_speed);

        let mut editor = BarrierEditor::new(params.draw_tool);
        if !presets.barrier.is_interactive() {
            editor.set_read_only(Some(presets.barrier.name()));
        }

        let (handle, commands) = control::channel();
        info!(
            "engine ready: {}x{} cells on {} backend, τ = {:.4}",
            nx,
            ny,
            backend.name(),
            params.relaxation_time()
        );

        Ok(Self {
            lattice,
            backend,
            params,
            scheduler,
            editor,
            fluid_preset: presets.fluid,
            barrier_preset: presets.barrier,
            limits: StabilityLimits::default(),
            fault: None,
            commands,
            handle,
            iteration: 0,
        })
    }

    /// Size the grid from the config's resolution and viewport and bring up
    /// the configured backend.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let dims = config.dimensions()?;
        let backend: Box<dyn ComputeBackend> = match config.grid.backend {
            BackendKind::Cpu => Box::new(CpuStepper::new()),
            BackendKind::Gpu => Box::new(GPUContext::new(dims.nx, dims.ny).await?),
        };
        Ok(Self::with_backend(dims.nx, dims.ny, config.simulation, config.presets, backend)?)
    }

    /// A new handle onto this engine's command queue.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn presets(&self) -> PresetConfig {
        PresetConfig {
            fluid: self.fluid_preset,
            barrier: self.barrier_preset,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn fault(&self) -> Option<&EngineError> {
        self.fault.as_ref()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    pub fn is_step_mode(&self) -> bool {
        self.scheduler.is_step_mode()
    }

    pub fn has_undo(&self) -> bool {
        self.editor.has_undo()
    }

    pub fn set_stability_limits(&mut self, limits: StabilityLimits) {
        self.limits = limits;
    }

    /// Inputs for the next batch of steps.
    pub fn step_params(&self) -> StepParams {
        StepParams {
            omega: 1.0 / self.params.relaxation_time(),
            inflow_speed: self.fluid_preset.drives_inflow().then_some(self.params.flow_speed),
        }
    }

    pub fn set_output(&mut self, field: OutputField) {
        self.params.output = field;
    }

    pub fn set_draw_type(&mut self, tool: DrawTool) {
        self.params.draw_tool = tool;
        self.editor.set_tool(tool);
    }

    pub fn set_color_map(&mut self, map: ColorMap) {
        self.params.color_map = map;
    }

    pub fn color_map(&self) -> ColorMap {
        self.params.color_map
    }

    /// Returns the new paused state.
    pub fn toggle_pause(&mut self) -> bool {
        let paused = self.scheduler.toggle_pause();
        self.params.paused = paused;
        info!("simulation {}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn update_compute_rate(&mut self, rate: i64) -> EngineResult<()> {
        self.scheduler.set_compute_rate(rate)?;
        self.params.compute_rate = self.scheduler.compute_rate();
        Ok(())
    }

    /// Returns the viscosity actually applied after clamping.
    pub fn update_viscosity(&mut self, viscosity: Float) -> EngineResult<Float> {
        self.params.viscosity = clamp_viscosity(viscosity)?;
        debug!("viscosity {} (τ = {:.4})", self.params.viscosity, self.params.relaxation_time());
        Ok(self.params.viscosity)
    }

    /// Changes the inflow speed from the next step on; the fluid is not reset.
    pub fn update_flow_speed(&mut self, speed: Float) -> EngineResult<Float> {
        self.params.flow_speed = clamp_flow_speed(speed)?;
        Ok(self.params.flow_speed)
    }

    pub fn set_step_mode(&mut self) {
        self.scheduler.set_step_mode(true);
        self.params.step_mode = true;
    }

    pub fn release_step_mode(&mut self) {
        self.scheduler.set_step_mode(false);
        self.params.step_mode = false;
    }

    /// Request one step for the next frame. Outside step mode this does
    /// nothing and returns false.
    pub fn take_step(&mut self) -> bool {
        let accepted = self.scheduler.request_step();
        if !accepted {
            info!("take_step ignored outside step mode");
        }
        accepted
    }

    /// Revert the last barrier gesture. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.editor.undo(&mut self.lattice)
    }

    /// Reset the fluid. Also clears a divergence fault.
    pub fn change_fluid_preset(&mut self, preset: FluidPreset) {
        preset.apply(&mut self.lattice, self.params.flow_speed);
        self.fluid_preset = preset;
        self.iteration = 0;
        if self.fault.take().is_some() {
            info!("fault cleared by fluid preset {:?}", preset);
        }
    }

    /// Replace the barrier layout. Discards the undo snapshot.
    pub fn change_barrier_preset(&mut self, preset: BarrierPreset) {
        preset.apply(&mut self.lattice);
        self.barrier_preset = preset;
        self.editor.clear_history();
        self.editor
            .set_read_only((!preset.is_interactive()).then_some(preset.name()));
    }

    /// Feed a pointer event to the barrier editor. Returns whether barriers changed.
    pub fn pointer(&mut self, event: PointerEvent) -> EngineResult<bool> {
        match event {
            PointerEvent::Pressed(at) => self.editor.press(&mut self.lattice, at),
            PointerEvent::Moved(to) => self.editor.drag(&mut self.lattice, to),
            PointerEvent::Released => Ok(self.editor.release()),
        }
    }

    pub fn apply_command(&mut self, command: Command) -> EngineResult<()> {
        match command {
            Command::SetOutput(field) => self.set_output(field),
            Command::SetDrawType(tool) => self.set_draw_type(tool),
            Command::SetColorMap(map) => self.set_color_map(map),
            Command::TogglePause => {
                self.toggle_pause();
            }
            Command::UpdateComputeRate(rate) => self.update_compute_rate(rate as i64)?,
            Command::UpdateViscosity(viscosity) => {
                self.update_viscosity(viscosity)?;
            }
            Command::UpdateFlowSpeed(speed) => {
                self.update_flow_speed(speed)?;
            }
            Command::SetStepMode => self.set_step_mode(),
            Command::ReleaseStepMode => self.release_step_mode(),
            Command::TakeStep => {
                self.take_step();
            }
            Command::Undo => {
                self.undo();
            }
            Command::ChangeFluidPreset(preset) => self.change_fluid_preset(preset),
            Command::ChangeBarrierPreset(preset) => self.change_barrier_preset(preset),
            Command::Pointer(event) => {
                self.pointer(event)?;
            }
        }
        Ok(())
    }

    /// Apply everything queued on the control handles. A rejected command is
    /// logged and skipped; the rest still apply.
    pub fn process_commands(&mut self) -> usize {
        let commands = self.commands.drain();
        let count = commands.len();
        for command in commands {
            if let Err(e) = self.apply_command(command) {
                warn!("{:?} rejected: {}", command, e);
            }
        }
        count
    }

    /// Run one rendered frame: apply queued commands, then as many steps as
    /// the scheduler allows, then the stability scan.
    pub fn frame(&mut self) -> EngineResult<FrameReport> {
        let start_time = Instant::now();
        self.process_commands();

        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }

        let steps = self.scheduler.steps_for_frame();
        if steps > 0 {
            let params = self.step_params();
            self.backend.advance(&mut self.lattice, &params, steps)?;
            self.iteration += steps as u64;
            self.check_stability()?;
        }

        Ok(FrameReport {
            steps,
            iteration: self.iteration,
            elapsed: start_time.elapsed(),
        })
    }

    fn check_stability(&mut self) -> EngineResult<()> {
        let Some(site) = self.lattice.find_instability(&self.limits) else {
            return Ok(());
        };

        let fault = EngineError::Divergence {
            x: site.x,
            y: site.y,
            direction: site.direction,
            value: site.value,
            iteration: self.iteration,
        };
        warn!("{}", fault);
        self.fault = Some(fault.clone());
        Err(fault)
    }

    /// The currently selected output field.
    pub fn output(&self) -> FieldBuffer {
        fields::extract(&self.lattice, self.params.output)
    }

    pub fn field(&self, field: OutputField) -> FieldBuffer {
        fields::extract(&self.lattice, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridPoint;

    fn engine(nx: usize, ny: usize) -> Engine {
        Engine::new(nx, ny, SimulationParams::default(), PresetConfig::default()).unwrap()
    }

    /// Writes the given value into one slot of cell (5, 5) on every advance
    struct PoisonBackend(Float);

    impl ComputeBackend for PoisonBackend {
        fn name(&self) -> &'static str {
            "poison"
        }

        fn advance(&mut self, lattice: &mut Lattice, _params: &StepParams, _steps: usize) -> EngineResult<()> {
            let mut f = [0.1; 9];
            f[3] = self.0;
            lattice.set_distribution(5, 5, f);
            Ok(())
        }
    }

    #[test]
    fn frame_runs_compute_rate_steps() {
        let mut engine = engine(30, 16);
        engine.update_compute_rate(4).unwrap();
        let report = engine.frame().unwrap();
        assert_eq!(report.steps, 4);
        assert_eq!(engine.iteration(), 4);
    }

    #[test]
    fn paused_engine_does_not_step() {
        let mut engine = engine(30, 16);
        assert!(engine.toggle_pause());
        let before = engine.lattice().densities().to_vec();
        assert_eq!(engine.frame().unwrap().steps, 0);
        assert_eq!(engine.lattice().densities(), before.as_slice());
    }

    #[test]
    fn take_step_outside_step_mode_is_a_no_op() {
        let mut engine = engine(30, 16);
        assert!(!engine.take_step());
        engine.set_step_mode();
        assert!(engine.take_step());
        assert_eq!(engine.frame().unwrap().steps, 1);
        assert_eq!(engine.frame().unwrap().steps, 0);
    }

    #[test]
    fn handle_commands_land_before_the_next_frame() {
        let mut engine = engine(30, 16);
        let handle = engine.handle();
        handle.set_step_mode().unwrap();
        handle.set_output(OutputField::Speed).unwrap();
        handle.update_viscosity(0.02).unwrap();

        assert_eq!(engine.frame().unwrap().steps, 0);
        assert!(engine.is_step_mode());
        assert_eq!(engine.params().output, OutputField::Speed);
        assert_eq!(engine.params().viscosity, 0.02);
        assert_eq!(engine.output().field, OutputField::Speed);
    }

    #[test]
    fn rejected_command_does_not_block_the_queue() {
        let mut engine = engine(30, 16);
        let handle = engine.handle();
        handle.pointer(PointerEvent::Pressed(GridPoint::new(500, 2))).unwrap();
        handle.toggle_pause().unwrap();

        assert_eq!(engine.process_commands(), 2);
        assert!(engine.is_paused());
        assert_eq!(engine.lattice().barrier_count(), 60);
    }

    #[test]
    fn divergence_faults_until_fluid_reset() {
        let mut engine = Engine::with_backend(
            20,
            12,
            SimulationParams::default(),
            PresetConfig::default(),
            Box::new(PoisonBackend(Float::NAN)),
        )
        .unwrap();

        let err = engine.frame().unwrap_err();
        assert!(matches!(err, EngineError::Divergence { x: 5, y: 5, direction: 3, iteration: 15, .. }));
        assert!(engine.is_faulted());
        // stays faulted without stepping again
        assert!(matches!(engine.frame(), Err(EngineError::Divergence { iteration: 15, .. })));

        engine.change_fluid_preset(FluidPreset::Equilibrium);
        assert!(!engine.is_faulted());
        assert_eq!(engine.iteration(), 0);
    }

    fn poisoned(value: Float) -> Engine {
        Engine::with_backend(
            20,
            12,
            SimulationParams::default(),
            PresetConfig::default(),
            Box::new(PoisonBackend(value)),
        )
        .unwrap()
    }

    #[test]
    fn negative_density_is_a_divergence() {
        let mut engine = poisoned(-0.2);
        match engine.frame() {
            Err(EngineError::Divergence { x, y, direction, value, .. }) => {
                assert_eq!((x, y, direction), (5, 5, 3));
                assert_eq!(value, -0.2);
            }
            other => panic!("expected divergence, got {:?}", other),
        }
        assert!(engine.is_faulted());
    }

    #[test]
    fn stability_limits_can_be_tightened() {
        let mut engine = poisoned(50.0);
        assert!(engine.frame().is_ok());

        engine.set_stability_limits(StabilityLimits {
            min_value: 0.0,
            max_value: 10.0,
        });
        assert!(matches!(
            engine.frame(),
            Err(EngineError::Divergence { direction: 3, .. })
        ));
    }

    #[test]
    fn impulse_presets_close_the_edges() {
        let mut engine = engine(30, 16);
        assert!(engine.step_params().inflow_speed.is_some());
        engine.change_fluid_preset(FluidPreset::SingleEast);
        assert_eq!(engine.step_params().inflow_speed, None);
    }

    #[test]
    fn flow_speed_change_keeps_fluid_state() {
        let mut engine = engine(30, 16);
        let before = engine.lattice().densities().to_vec();
        assert_eq!(engine.update_flow_speed(0.2).unwrap(), 0.2);
        assert_eq!(engine.lattice().densities(), before.as_slice());
        assert_eq!(engine.step_params().inflow_speed, Some(0.2));
    }

    #[test]
    fn welcome_layout_rejects_pointer_edits() {
        let mut engine = engine(60, 30);
        engine.change_barrier_preset(BarrierPreset::Welcome);
        assert_eq!(
            engine.pointer(PointerEvent::Pressed(GridPoint::new(5, 5))),
            Err(EngineError::ReadOnlyLayout("welcome"))
        );

        engine.change_barrier_preset(BarrierPreset::Tunnel);
        assert!(engine.pointer(PointerEvent::Pressed(GridPoint::new(5, 5))).unwrap());
    }

    #[test]
    fn barrier_preset_discards_undo() {
        let mut engine = engine(40, 20);
        engine.pointer(PointerEvent::Pressed(GridPoint::new(10, 10))).unwrap();
        engine.pointer(PointerEvent::Released).unwrap();
        assert!(engine.has_undo());

        engine.change_barrier_preset(BarrierPreset::Curl);
        assert!(!engine.has_undo());
        assert!(!engine.undo());
    }
}
