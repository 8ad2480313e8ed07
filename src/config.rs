use serde::{Deserialize, Serialize};
use crate::{
    editor::DrawTool,
    error::{EngineError, EngineResult},
    fields::{ColorMap, OutputField},
    geometry::GridPoint,
    presets::{BarrierPreset, FluidPreset},
    Float,
};

/// Lower viscosity bound; below this the BGK relaxation rate approaches 2 and blows up.
pub const MIN_VISCOSITY: Float = 0.005;
/// Upper viscosity bound. At this value ω ≈ 3e-8, so a step is pure streaming
/// to within f32 resolution; the tutorial's frozen demonstrations rely on it.
pub const MAX_VISCOSITY: Float = 1.0e7;
pub const MIN_FLOW_SPEED: Float = 0.0;
pub const MAX_FLOW_SPEED: Float = 0.3;
pub const MIN_COMPUTE_RATE: u32 = 1;
pub const MAX_COMPUTE_RATE: u32 = 50;

pub const DEFAULT_VISCOSITY: Float = 0.1;
pub const DEFAULT_FLOW_SPEED: Float = 0.1;
pub const DEFAULT_COMPUTE_RATE: u32 = 15;

/// Relaxation time for a lattice viscosity: ν = c_s² (τ - ½)
pub fn relaxation_time(viscosity: Float) -> Float {
    3.0 * viscosity + 0.5
}

pub fn validate_compute_rate(rate: i64) -> EngineResult<u32> {
    if rate < MIN_COMPUTE_RATE as i64 || rate > MAX_COMPUTE_RATE as i64 {
        return Err(EngineError::InvalidParameter {
            name: "compute rate",
            value: rate as f64,
            min: MIN_COMPUTE_RATE as f64,
            max: MAX_COMPUTE_RATE as f64,
        });
    }
    Ok(rate as u32)
}

fn clamp_finite(name: &'static str, value: Float, min: Float, max: Float) -> EngineResult<Float> {
    if !value.is_finite() {
        return Err(EngineError::InvalidParameter {
            name,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("{} {} clamped to {}", name, value, clamped);
    }
    Ok(clamped)
}

pub fn clamp_viscosity(viscosity: Float) -> EngineResult<Float> {
    clamp_finite("viscosity", viscosity, MIN_VISCOSITY, MAX_VISCOSITY)
}

pub fn clamp_flow_speed(speed: Float) -> EngineResult<Float> {
    clamp_finite("flow speed", speed, MIN_FLOW_SPEED, MAX_FLOW_SPEED)
}

/// Cell-count targets offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Test,
    Nhd,
    Hd,
    Fhd,
    Uhd,
}

impl Resolution {
    pub fn cell_target(self) -> u64 {
        match self {
            Resolution::Test => 1_000,
            Resolution::Nhd => 230_400,
            Resolution::Hd => 921_600,
            Resolution::Fhd => 2_073_600,
            Resolution::Uhd => 3_686_400,
        }
    }
}

/// Display surface the grid is fitted to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Logical width in CSS-style pixels
    pub width: u32,
    /// Logical height in CSS-style pixels
    pub height: u32,
    pub device_pixel_ratio: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Grid size derived from a resolution target and a viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridDimensions {
    pub nx: usize,
    pub ny: usize,
    /// Side of one cell in logical pixels
    pub cell_size: f32,
    pub device_pixel_ratio: f32,
}

impl GridDimensions {
    /// Fit `resolution.cell_target()` square cells to the viewport's aspect ratio.
    pub fn from_viewport(resolution: Resolution, viewport: &Viewport) -> EngineResult<Self> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(EngineError::InvalidDimensions {
                nx: viewport.width as usize,
                ny: viewport.height as usize,
            });
        }

        let aspect_ratio = viewport.height as f64 / viewport.width as f64;
        let nx = (resolution.cell_target() as f64 / aspect_ratio).sqrt().floor() as usize;
        if nx == 0 {
            return Err(EngineError::InvalidDimensions { nx, ny: 0 });
        }
        let cell_size = viewport.width as f64 / nx as f64;
        let ny = (viewport.height as f64 / cell_size).floor() as usize;

        if nx < 3 || ny < 3 {
            return Err(EngineError::InvalidDimensions { nx, ny });
        }

        Ok(Self {
            nx,
            ny,
            cell_size: cell_size as f32,
            device_pixel_ratio: viewport.device_pixel_ratio,
        })
    }

    /// Map a physical pixel position (origin top-left) to the grid cell under
    /// it, clamped to the grid. Lattice rows count upwards from the bottom.
    pub fn cell_at_pixel(&self, px: f64, py: f64) -> GridPoint {
        let scale = (self.cell_size * self.device_pixel_ratio) as f64;
        let column = (px / scale).floor() as isize;
        let row = (py / scale).floor() as isize;

        let x = column.clamp(0, self.nx as isize - 1);
        let y = (self.ny as isize - 1 - row).clamp(0, self.ny as isize - 1);
        GridPoint::new(x, y)
    }
}

/// Which compute backend drives the physics stepper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

/// Mutable simulation parameters; persisted by the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub viscosity: Float,
    pub flow_speed: Float,
    pub compute_rate: u32,
    pub output: OutputField,
    pub color_map: ColorMap,
    pub draw_tool: DrawTool,
    pub step_mode: bool,
    pub paused: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            viscosity: DEFAULT_VISCOSITY,
            flow_speed: DEFAULT_FLOW_SPEED,
            compute_rate: DEFAULT_COMPUTE_RATE,
            output: OutputField::Curl,
            color_map: ColorMap::Jet,
            draw_tool: DrawTool::Draw,
            step_mode: false,
            paused: false,
        }
    }
}

impl SimulationParams {
    /// Bring values from an untrusted source into their valid ranges.
    pub fn validated(mut self) -> EngineResult<Self> {
        self.viscosity = clamp_viscosity(self.viscosity)?;
        self.flow_speed = clamp_flow_speed(self.flow_speed)?;
        self.compute_rate = validate_compute_rate(self.compute_rate as i64)?;
        Ok(self)
    }

    pub fn relaxation_time(&self) -> Float {
        relaxation_time(self.viscosity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    #[serde(default)]
    pub simulation: SimulationParams,
    #[serde(default)]
    pub presets: PresetConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub resolution: Resolution,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PresetConfig {
    #[serde(default)]
    pub fluid: FluidPreset,
    #[serde(default)]
    pub barrier: BarrierPreset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_directory: String,
    pub output_frequency: usize,
    pub frames: usize,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn dimensions(&self) -> EngineResult<GridDimensions> {
        GridDimensions::from_viewport(self.grid.resolution, &self.grid.viewport)
    }

    pub fn calculate_tau(&self) -> Float {
        self.simulation.relaxation_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dimensions_follow_viewport_aspect() {
        let viewport = Viewport {
            width: 1920,
            height: 1080,
            device_pixel_ratio: 1.0,
        };
        let dims = GridDimensions::from_viewport(Resolution::Fhd, &viewport).unwrap();
        assert_eq!((dims.nx, dims.ny), (1920, 1080));
        assert_relative_eq!(dims.cell_size, 1.0);

        let dims = GridDimensions::from_viewport(Resolution::Test, &viewport).unwrap();
        assert_eq!(dims.nx, 42);
        assert_eq!(dims.ny, 23);
    }

    #[test]
    fn degenerate_viewport_is_rejected() {
        let viewport = Viewport {
            width: 0,
            height: 600,
            device_pixel_ratio: 1.0,
        };
        assert!(GridDimensions::from_viewport(Resolution::Hd, &viewport).is_err());
    }

    #[test]
    fn pixel_mapping_flips_y_and_clamps() {
        let dims = GridDimensions {
            nx: 100,
            ny: 50,
            cell_size: 4.0,
            device_pixel_ratio: 2.0,
        };
        assert_eq!(dims.cell_at_pixel(0.0, 0.0), GridPoint::new(0, 49));
        assert_eq!(dims.cell_at_pixel(17.0, 399.0), GridPoint::new(2, 0));
        assert_eq!(dims.cell_at_pixel(-30.0, 5000.0), GridPoint::new(0, 0));
        assert_eq!(dims.cell_at_pixel(1e6, -1.0), GridPoint::new(99, 49));
    }

    #[test]
    fn viscosity_is_clamped_and_nan_rejected() {
        assert_eq!(clamp_viscosity(0.0).unwrap(), MIN_VISCOSITY);
        assert_eq!(clamp_viscosity(1.0e9).unwrap(), MAX_VISCOSITY);
        assert_eq!(clamp_viscosity(0.02).unwrap(), 0.02);
        assert_eq!(clamp_viscosity(1.0e7).unwrap(), 1.0e7);
        assert!(1.0 / relaxation_time(MAX_VISCOSITY) < 1.0e-7);
        assert!(clamp_viscosity(Float::NAN).is_err());
        assert!(clamp_flow_speed(Float::INFINITY).is_err());
        assert_eq!(clamp_flow_speed(-1.0).unwrap(), 0.0);
    }

    #[test]
    fn relaxation_time_is_monotonic_and_above_half() {
        assert!(relaxation_time(MIN_VISCOSITY) > 0.5);
        assert!(relaxation_time(0.2) > relaxation_time(0.1));
    }

    #[test]
    fn config_parses_with_defaults() {
        let json = r#"{
            "grid": { "resolution": "test" },
            "output": { "output_directory": "out", "output_frequency": 10, "frames": 100 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.grid.backend, BackendKind::Cpu);
        assert_eq!(config.simulation, SimulationParams::default());
        assert_eq!(config.presets.barrier, BarrierPreset::Tunnel);
        assert_relative_eq!(config.calculate_tau(), 0.8, epsilon = 1e-6);
    }
}
