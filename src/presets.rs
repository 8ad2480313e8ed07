use log::{info, warn};
use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use crate::{
    editor::DRAW_WIDTH,
    geometry::{text_strokes, GridPoint, Shape},
    lattice::{Direction, Lattice, D2Q9},
    Float,
};

/// Value written into the single directional slot of an impulse preset
pub const IMPULSE_VALUE: Float = 4.0;

/// Named initial fluid states.
///
/// The single-impulse states are strong enough to push some densities below
/// zero at low viscosity (`SingleNorthEast` does on its first step at 0.1).
/// The engine reports that as a divergence until the next preset is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FluidPreset {
    /// Uniform free stream at the current flow speed; drives the tunnel inflow
    #[default]
    Equilibrium,
    SingleOrigin,
    SingleNorth,
    SingleEast,
    SingleNorthEast,
}

impl FluidPreset {
    pub const ALL: [FluidPreset; 5] = [
        FluidPreset::Equilibrium,
        FluidPreset::SingleOrigin,
        FluidPreset::SingleNorth,
        FluidPreset::SingleEast,
        FluidPreset::SingleNorthEast,
    ];

    /// Whether the left and right columns are held at free-stream equilibrium
    /// while this preset is active. Impulse presets run with closed edges.
    pub fn drives_inflow(self) -> bool {
        matches!(self, FluidPreset::Equilibrium)
    }

    /// Cell and slot that receive the impulse, for the single-impulse presets.
    pub fn impulse_site(self, nx: usize, ny: usize) -> Option<(usize, usize, Direction)> {
        match self {
            FluidPreset::Equilibrium => None,
            FluidPreset::SingleOrigin => Some((3 * nx / 4, ny / 2, Direction::Rest)),
            FluidPreset::SingleNorth => Some((3 * nx / 4, ny / 2, Direction::North)),
            FluidPreset::SingleEast => Some((nx / 2, ny / 2, Direction::East)),
            // one row below the top wall, heading into it
            FluidPreset::SingleNorthEast => Some((nx / 3, ny - 2, Direction::NorthEast)),
        }
    }

    /// Reset every fluid cell. Barrier flags are left alone.
    pub fn apply(self, lattice: &mut Lattice, flow_speed: Float) {
        let Some((x, y, direction)) = self.impulse_site(lattice.nx(), lattice.ny()) else {
            lattice.fill_equilibrium(1.0, [flow_speed, 0.0]);
            info!("fluid reset to free stream at speed {}", flow_speed);
            return;
        };

        lattice.fill_equilibrium(1.0, [0.0; 2]);
        if lattice.is_barrier(x, y) {
            warn!("impulse site ({}, {}) is inside a barrier; fluid left at rest", x, y);
            return;
        }

        let mut f = D2Q9::equilibrium_set(1.0, [0.0; 2]);
        f[direction.index()] = IMPULSE_VALUE;
        lattice.set_distribution(x, y, f);
        info!("fluid reset to rest with a {:?} impulse at ({}, {})", direction, x, y);
    }
}

/// Named barrier layouts. Every layout includes solid top and bottom walls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPreset {
    /// Walls only
    #[default]
    Tunnel,
    /// A cup-shaped obstacle upstream that sheds vortices
    Curl,
    /// Staggered inclined plates
    Chaos,
    /// Decorative lettering; not editable
    Welcome,
}

impl BarrierPreset {
    pub const ALL: [BarrierPreset; 4] = [
        BarrierPreset::Tunnel,
        BarrierPreset::Curl,
        BarrierPreset::Chaos,
        BarrierPreset::Welcome,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BarrierPreset::Tunnel => "tunnel",
            BarrierPreset::Curl => "curl",
            BarrierPreset::Chaos => "chaos",
            BarrierPreset::Welcome => "welcome",
        }
    }

    pub fn is_interactive(self) -> bool {
        !matches!(self, BarrierPreset::Welcome)
    }

    /// Cells of the layout for an `nx` × `ny` grid, walls included.
    pub fn shape(self, nx: usize, ny: usize) -> Shape {
        let (w, h) = (nx as isize, ny as isize);
        let mut shape = Shape::segment(GridPoint::new(0, 0), GridPoint::new(w - 1, 0), 1);
        shape.add_segment(GridPoint::new(0, h - 1), GridPoint::new(w - 1, h - 1), 1);

        match self {
            BarrierPreset::Tunnel => {}
            BarrierPreset::Curl => shape.join(&curl_obstacle(nx, ny)),
            BarrierPreset::Chaos => shape.join(&plate_field(nx, ny)),
            BarrierPreset::Welcome => {
                let origin = GridPoint::new(w / 5, h / 2);
                for (a, b) in text_strokes("Welcome!", origin, w / 13, h / 4, w / 50) {
                    shape.add_segment(a, b, DRAW_WIDTH);
                }
            }
        }
        shape
    }

    /// Replace the whole barrier layout. Cells that turn fluid restart at rest.
    pub fn apply(self, lattice: &mut Lattice) {
        let (nx, ny) = (lattice.nx(), lattice.ny());
        let mut layout = vec![0u32; nx * ny];
        for (x, y) in self.shape(nx, ny).cells_within(nx, ny) {
            layout[x + y * nx] = 1;
        }
        lattice.restore_barriers(&layout);
        info!("barrier preset '{}' applied ({} solid cells)", self.name(), lattice.barrier_count());
    }
}

fn curl_obstacle(nx: usize, ny: usize) -> Shape {
    let center = Point2::new((nx / 3) as f64, (ny / 2) as f64);
    let radius = (ny / 6).max(1) as f64;
    Shape::arc(center, radius, 100.0, 260.0, DRAW_WIDTH)
}

fn plate_field(nx: usize, ny: usize) -> Shape {
    const COLUMNS: usize = 4;
    const ROWS: usize = 3;

    let half_length = (ny as f64 / 16.0).max(1.0);
    let mut shape = Shape::new();

    for column in 0..COLUMNS {
        let x = nx as f64 * (2 + 2 * column) as f64 / (2 * COLUMNS + 3) as f64;
        let stagger = if column % 2 == 0 { 0.0 } else { ny as f64 / (2 * (ROWS + 1)) as f64 };
        let tilt = if column % 2 == 0 { 45.0_f64 } else { -45.0 };
        let along = Rotation2::new(tilt.to_radians()) * Vector2::new(0.0, half_length);

        for row in 0..ROWS {
            let center = Point2::new(x, ny as f64 * (row + 1) as f64 / (ROWS + 1) as f64 + stagger);
            if center.y + along.y.abs() >= (ny - 2) as f64 {
                continue;
            }
            shape.add_segment(
                GridPoint::from_point(&(center - along)),
                GridPoint::from_point(&(center + along)),
                DRAW_WIDTH,
            );
        }
    }
    shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wall_rows_solid(lattice: &Lattice) -> bool {
        (0..lattice.nx()).all(|x| lattice.is_barrier(x, 0) && lattice.is_barrier(x, lattice.ny() - 1))
    }

    #[test]
    fn every_barrier_preset_keeps_tunnel_walls() {
        for preset in BarrierPreset::ALL {
            let mut lattice = Lattice::new(120, 60).unwrap();
            preset.apply(&mut lattice);
            assert!(wall_rows_solid(&lattice), "{:?}", preset);
        }
    }

    #[test]
    fn tunnel_is_walls_only() {
        let mut lattice = Lattice::new(50, 20).unwrap();
        lattice.set_barrier(10, 10, true).unwrap();
        BarrierPreset::Tunnel.apply(&mut lattice);
        assert_eq!(lattice.barrier_count(), 100);
        assert!(!lattice.is_barrier(10, 10));
    }

    #[test]
    fn obstacle_presets_add_interior_cells() {
        for preset in [BarrierPreset::Curl, BarrierPreset::Chaos, BarrierPreset::Welcome] {
            let mut lattice = Lattice::new(200, 100).unwrap();
            preset.apply(&mut lattice);
            assert!(lattice.barrier_count() > 400, "{:?}", preset);
        }
    }

    #[test]
    fn curl_obstacle_sits_upstream() {
        let mut lattice = Lattice::new(300, 120).unwrap();
        BarrierPreset::Curl.apply(&mut lattice);
        let interior: Vec<usize> = (1..119)
            .flat_map(|y| (0..300).map(move |x| (x, y)))
            .filter(|&(x, y)| lattice.is_barrier(x, y))
            .map(|(x, _)| x)
            .collect();
        assert!(!interior.is_empty());
        assert!(interior.iter().all(|&x| x <= 100));
    }

    #[test]
    fn only_welcome_is_read_only() {
        assert!(!BarrierPreset::Welcome.is_interactive());
        assert!(BarrierPreset::Tunnel.is_interactive());
        assert!(BarrierPreset::Curl.is_interactive());
        assert!(BarrierPreset::Chaos.is_interactive());
    }

    #[test]
    fn equilibrium_preset_is_uniform_free_stream() {
        let mut lattice = Lattice::new(20, 10).unwrap();
        BarrierPreset::Tunnel.apply(&mut lattice);
        FluidPreset::Equilibrium.apply(&mut lattice, 0.12);

        let cell = lattice.cell_at(7, 5).unwrap();
        assert_relative_eq!(cell.velocity()[0], 0.12, epsilon = 1e-5);
        assert_eq!(lattice.cell_at(7, 0).unwrap().f, [0.0; 9]);
    }

    #[test]
    fn impulse_presets_set_one_slot() {
        for preset in FluidPreset::ALL.into_iter().filter(|p| !p.drives_inflow()) {
            let mut lattice = Lattice::new(40, 20).unwrap();
            BarrierPreset::Tunnel.apply(&mut lattice);
            preset.apply(&mut lattice, 0.1);

            let (x, y, direction) = preset.impulse_site(40, 20).unwrap();
            let cell = lattice.cell_at(x, y).unwrap();
            assert_eq!(cell.f[direction.index()], IMPULSE_VALUE, "{:?}", preset);

            let rest = D2Q9::equilibrium_set(1.0, [0.0; 2]);
            assert_eq!(lattice.cell_at(x - 1, y).unwrap().f, rest);
        }
    }

    #[test]
    fn north_east_impulse_sits_below_top_wall() {
        let (_, y, direction) = FluidPreset::SingleNorthEast.impulse_site(40, 20).unwrap();
        assert_eq!(y, 18);
        assert_eq!(direction, Direction::NorthEast);
    }
}
