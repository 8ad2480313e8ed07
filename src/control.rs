use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use crate::{
    config::{clamp_flow_speed, clamp_viscosity, validate_compute_rate},
    editor::DrawTool,
    error::{EngineError, EngineResult},
    fields::{ColorMap, OutputField},
    geometry::GridPoint,
    presets::{BarrierPreset, FluidPreset},
    Float,
};

/// Pointer input in grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerEvent {
    Pressed(GridPoint),
    Moved(GridPoint),
    Released,
}

/// One control-surface operation, applied by the engine between steps.
/// Numeric payloads have already been validated by [`ControlHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    SetOutput(OutputField),
    SetDrawType(DrawTool),
    SetColorMap(ColorMap),
    TogglePause,
    UpdateComputeRate(u32),
    UpdateViscosity(Float),
    UpdateFlowSpeed(Float),
    SetStepMode,
    ReleaseStepMode,
    TakeStep,
    Undo,
    ChangeFluidPreset(FluidPreset),
    ChangeBarrierPreset(BarrierPreset),
    Pointer(PointerEvent),
}

/// Create a connected handle/queue pair.
pub fn channel() -> (ControlHandle, CommandQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ControlHandle { sender }, CommandQueue { receiver })
}

/// Cloneable sender side of the control surface, usable from any thread.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    sender: UnboundedSender<Command>,
}

impl ControlHandle {
    pub fn send(&self, command: Command) -> EngineResult<()> {
        self.sender.send(command).map_err(|_| EngineError::Disconnected)
    }

    pub fn set_output(&self, field: OutputField) -> EngineResult<()> {
        self.send(Command::SetOutput(field))
    }

    pub fn set_draw_type(&self, tool: DrawTool) -> EngineResult<()> {
        self.send(Command::SetDrawType(tool))
    }

    pub fn set_color_map(&self, map: ColorMap) -> EngineResult<()> {
        self.send(Command::SetColorMap(map))
    }

    pub fn toggle_pause(&self) -> EngineResult<()> {
        self.send(Command::TogglePause)
    }

    /// Rejected before queuing when outside `1..=MAX_COMPUTE_RATE`.
    pub fn update_compute_rate(&self, rate: i64) -> EngineResult<()> {
        let rate = validate_compute_rate(rate)?;
        self.send(Command::UpdateComputeRate(rate))
    }

    pub fn update_viscosity(&self, viscosity: Float) -> EngineResult<()> {
        let viscosity = clamp_viscosity(viscosity)?;
        self.send(Command::UpdateViscosity(viscosity))
    }

    pub fn update_flow_speed(&self, speed: Float) -> EngineResult<()> {
        let speed = clamp_flow_speed(speed)?;
        self.send(Command::UpdateFlowSpeed(speed))
    }

    pub fn set_step_mode(&self) -> EngineResult<()> {
        self.send(Command::SetStepMode)
    }

    pub fn release_step_mode(&self) -> EngineResult<()> {
        self.send(Command::ReleaseStepMode)
    }

    pub fn take_step(&self) -> EngineResult<()> {
        self.send(Command::TakeStep)
    }

    pub fn undo(&self) -> EngineResult<()> {
        self.send(Command::Undo)
    }

    pub fn change_fluid_preset(&self, preset: FluidPreset) -> EngineResult<()> {
        self.send(Command::ChangeFluidPreset(preset))
    }

    pub fn change_barrier_preset(&self, preset: BarrierPreset) -> EngineResult<()> {
        self.send(Command::ChangeBarrierPreset(preset))
    }

    pub fn pointer(&self, event: PointerEvent) -> EngineResult<()> {
        self.send(Command::Pointer(event))
    }
}

/// Receiver side, owned by the engine.
#[derive(Debug)]
pub struct CommandQueue {
    receiver: UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Everything queued so far, in send order. Never blocks.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("all control handles dropped");
                    break;
                }
            }
        }
        commands
    }
}
