use std::time::Duration;
use log::info;
use serde::{Deserialize, Serialize};
use crate::{
    config::{GridDimensions, PresetConfig, Resolution, SimulationParams, Viewport, MAX_VISCOSITY},
    control::Command,
    engine::Engine,
    error::EngineResult,
    fields::{ColorMap, OutputField},
    presets::{BarrierPreset, FluidPreset},
    Float,
};

/// Interval between automatic `take_step` calls on the step-mode slides
pub const AUTO_STEP_PERIOD: Duration = Duration::from_millis(200);

/// Slides of the guided tutorial, in presentation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TutorialSlide {
    Intro,
    Streaming,
    Collision,
    MovingCollision,
    NoSlip,
    Chaos,
    /// Free play with the full control set
    Controls,
}

impl TutorialSlide {
    pub const ALL: [TutorialSlide; 7] = [
        TutorialSlide::Intro,
        TutorialSlide::Streaming,
        TutorialSlide::Collision,
        TutorialSlide::MovingCollision,
        TutorialSlide::NoSlip,
        TutorialSlide::Chaos,
        TutorialSlide::Controls,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|&s| s == self).unwrap_or(0)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The following slide, or `None` after the last one.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Single-impulse demonstrations advanced one step at a time. Each
    /// viscosity keeps its impulse from driving any density negative.
    fn impulse(self) -> Option<(Float, FluidPreset)> {
        match self {
            TutorialSlide::Streaming => Some((MAX_VISCOSITY, FluidPreset::SingleNorth)),
            TutorialSlide::Collision => Some((0.1, FluidPreset::SingleOrigin)),
            TutorialSlide::MovingCollision => Some((0.2, FluidPreset::SingleEast)),
            TutorialSlide::NoSlip => Some((MAX_VISCOSITY, FluidPreset::SingleNorthEast)),
            _ => None,
        }
    }
}

/// Which screen the application is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum View {
    #[default]
    Welcome,
    Tutorial(TutorialSlide),
    Simulation,
}

impl View {
    /// Fixed grid resolution of the view. `None` means the user's saved choice.
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            View::Welcome => Some(Resolution::Hd),
            View::Tutorial(TutorialSlide::Intro) => Some(Resolution::Hd),
            View::Tutorial(TutorialSlide::Chaos) => Some(Resolution::Fhd),
            View::Tutorial(TutorialSlide::Controls) | View::Simulation => None,
            View::Tutorial(_) => Some(Resolution::Test),
        }
    }

    /// Commands that put a freshly built engine into this view's starting state.
    pub fn setup(self) -> Vec<Command> {
        match self {
            View::Welcome => vec![
                Command::SetColorMap(ColorMap::Viridis),
                Command::SetOutput(OutputField::Speed),
                Command::ChangeBarrierPreset(BarrierPreset::Welcome),
                Command::ChangeFluidPreset(FluidPreset::Equilibrium),
            ],
            View::Tutorial(TutorialSlide::Intro) => vec![
                Command::UpdateViscosity(0.1),
                Command::ChangeBarrierPreset(BarrierPreset::Curl),
                Command::ChangeFluidPreset(FluidPreset::Equilibrium),
                Command::SetOutput(OutputField::Speed),
            ],
            View::Tutorial(TutorialSlide::Chaos) => vec![
                Command::UpdateViscosity(0.1),
                Command::ChangeBarrierPreset(BarrierPreset::Chaos),
                Command::ChangeFluidPreset(FluidPreset::Equilibrium),
                Command::SetOutput(OutputField::Curl),
            ],
            View::Tutorial(slide) => match slide.impulse() {
                Some((viscosity, fluid)) => vec![
                    Command::UpdateViscosity(viscosity),
                    Command::ChangeBarrierPreset(BarrierPreset::Tunnel),
                    Command::ChangeFluidPreset(fluid),
                    Command::SetOutput(OutputField::Density),
                    Command::SetStepMode,
                ],
                None => Vec::new(),
            },
            View::Simulation => Vec::new(),
        }
    }

    /// Whether pointer input may edit barriers in this view.
    pub fn is_editable(self) -> bool {
        matches!(self, View::Simulation | View::Tutorial(TutorialSlide::Controls))
    }

    /// How often the view requests a step on its own, if at all.
    pub fn auto_step(self) -> Option<Duration> {
        match self {
            View::Tutorial(slide) if slide.impulse().is_some() => Some(AUTO_STEP_PERIOD),
            _ => None,
        }
    }

    /// Tutorial progression: the last slide leads into the free simulation.
    pub fn next(self) -> View {
        match self {
            View::Welcome => View::Tutorial(TutorialSlide::Intro),
            View::Tutorial(slide) => slide.next().map_or(View::Simulation, View::Tutorial),
            View::Simulation => View::Simulation,
        }
    }
}

/// Everything needed to rebuild an equivalent engine after a restart
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub view: View,
    pub resolution: Resolution,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub params: SimulationParams,
    #[serde(default)]
    pub presets: PresetConfig,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            view: View::Welcome,
            resolution: Resolution::Fhd,
            viewport: Viewport::default(),
            params: SimulationParams::default(),
            presets: PresetConfig::default(),
        }
    }
}

impl SessionState {
    pub fn capture(engine: &Engine, resolution: Resolution, viewport: Viewport, view: View) -> Self {
        Self {
            view,
            resolution,
            viewport,
            params: *engine.params(),
            presets: engine.presets(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Grid size this state runs at: the view's fixed resolution if it has one.
    pub fn dimensions(&self) -> EngineResult<GridDimensions> {
        let resolution = self.view.resolution().unwrap_or(self.resolution);
        GridDimensions::from_viewport(resolution, &self.viewport)
    }

    /// Rebuild a CPU-backed engine. The fluid restarts from its preset.
    pub fn restore(&self) -> EngineResult<Engine> {
        let dims = self.dimensions()?;
        Engine::new(dims.nx, dims.ny, self.params, self.presets)
    }

    /// Build the engine for `view` and run its setup commands. Views without
    /// a fixed setup start from this state's saved parameters.
    pub fn enter(&self, view: View) -> EngineResult<Engine> {
        let mut state = *self;
        state.view = view;
        if !view.setup().is_empty() {
            state.params = SimulationParams {
                compute_rate: self.params.compute_rate,
                ..SimulationParams::default()
            };
            state.presets = PresetConfig::default();
        }

        let mut engine = state.restore()?;
        for command in view.setup() {
            engine.apply_command(command)?;
        }
        info!("entered {:?} view ({}x{})", view, engine.lattice().nx(), engine.lattice().ny());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::PointerEvent;
    use crate::editor::DrawTool;
    use crate::geometry::GridPoint;

    fn small_viewport() -> Viewport {
        Viewport {
            width: 64,
            height: 32,
            device_pixel_ratio: 1.0,
        }
    }

    #[test]
    fn slides_advance_into_simulation() {
        let mut view = View::Welcome.next();
        let mut visited = vec![view];
        while let View::Tutorial(_) = view {
            view = view.next();
            visited.push(view);
        }
        assert_eq!(visited.len(), TutorialSlide::ALL.len() + 1);
        assert_eq!(view, View::Simulation);
        assert_eq!(TutorialSlide::Controls.next(), None);
    }

    #[test]
    fn only_impulse_slides_auto_step() {
        for slide in TutorialSlide::ALL {
            let view = View::Tutorial(slide);
            let steps = view.setup().contains(&Command::SetStepMode);
            assert_eq!(view.auto_step().is_some(), steps, "{:?}", slide);
        }
        assert_eq!(View::Simulation.auto_step(), None);
    }

    #[test]
    fn editing_is_limited_to_free_play() {
        assert!(View::Simulation.is_editable());
        assert!(View::Tutorial(TutorialSlide::Controls).is_editable());
        assert!(!View::Welcome.is_editable());
        assert!(!View::Tutorial(TutorialSlide::NoSlip).is_editable());
    }

    #[test]
    fn streaming_slide_sets_up_a_frozen_impulse() {
        let state = SessionState {
            viewport: small_viewport(),
            ..SessionState::default()
        };
        let engine = state.enter(View::Tutorial(TutorialSlide::Streaming)).unwrap();

        assert!(engine.is_step_mode());
        assert_eq!(engine.params().viscosity, MAX_VISCOSITY);
        assert_eq!(engine.params().output, OutputField::Density);
        assert_eq!(engine.presets().fluid, FluidPreset::SingleNorth);
        assert_eq!(engine.step_params().inflow_speed, None);
    }

    #[test]
    fn impulse_slides_run_without_faults() {
        let state = SessionState {
            viewport: small_viewport(),
            ..SessionState::default()
        };
        for slide in TutorialSlide::ALL {
            let view = View::Tutorial(slide);
            if view.auto_step().is_none() {
                continue;
            }
            let mut engine = state.enter(view).unwrap();
            for _ in 0..60 {
                engine.take_step();
                if let Err(e) = engine.frame() {
                    panic!("{:?} faulted at iteration {}: {}", slide, engine.iteration(), e);
                }
            }
            assert_eq!(engine.iteration(), 60, "{:?}", slide);
        }
    }

    #[test]
    fn welcome_view_is_read_only() {
        let state = SessionState {
            viewport: small_viewport(),
            ..SessionState::default()
        };
        let mut engine = state.enter(View::Welcome).unwrap();
        assert_eq!(engine.presets().barrier, BarrierPreset::Welcome);
        assert_eq!(engine.color_map(), ColorMap::Viridis);
        assert!(engine.pointer(PointerEvent::Pressed(GridPoint::new(3, 3))).is_err());
    }

    #[test]
    fn state_survives_json_and_restores_equivalent_engine() {
        let mut params = SimulationParams::default();
        params.viscosity = 0.03;
        params.draw_tool = DrawTool::Line;
        params.paused = true;

        let state = SessionState {
            view: View::Simulation,
            resolution: Resolution::Test,
            viewport: small_viewport(),
            params,
            presets: PresetConfig {
                fluid: FluidPreset::Equilibrium,
                barrier: BarrierPreset::Chaos,
            },
        };
        let json = state.to_json().unwrap();
        assert!(json.contains("\"view\": \"simulation\""));
        let back = SessionState::from_json(&json).unwrap();
        assert_eq!(back, state);

        let engine = back.restore().unwrap();
        assert!(engine.is_paused());
        assert_eq!(engine.params(), &params);
        assert_eq!(engine.presets().barrier, BarrierPreset::Chaos);

        let captured = SessionState::capture(&engine, Resolution::Test, small_viewport(), View::Simulation);
        assert_eq!(captured, state);
    }

    #[test]
    fn tutorial_view_serializes_with_slide() {
        let json = serde_json::to_string(&View::Tutorial(TutorialSlide::NoSlip)).unwrap();
        assert_eq!(json, r#"{"tutorial":"no_slip"}"#);
    }
}
