pub mod config;
pub mod control;
pub mod cpu;
pub mod editor;
pub mod engine;
pub mod error;
pub mod fields;
pub mod geometry;
pub mod gpu;
pub mod lattice;
pub mod output;
pub mod presets;
pub mod scheduler;
pub mod session;

pub use config::{Config, Resolution, SimulationParams, Viewport};
pub use control::{Command, ControlHandle, PointerEvent};
pub use cpu::CpuStepper;
pub use editor::DrawTool;
pub use engine::{Engine, FrameReport};
pub use error::{EngineError, EngineResult};
pub use fields::{ColorMap, FieldBuffer, Macroscopic, OutputField};
pub use geometry::GridPoint;
pub use gpu::GPUContext;
pub use lattice::{Lattice, D2Q9};
pub use output::VTKWriter;
pub use presets::{BarrierPreset, FluidPreset};
pub use session::{SessionState, TutorialSlide, View};

pub type Float = f32;
