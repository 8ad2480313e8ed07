use std::time::Instant;
use log::debug;
use rayon::prelude::*;
use crate::{
    error::EngineResult,
    lattice::{Lattice, D2Q9},
    scheduler::{ComputeBackend, StepParams},
    Float,
};

/// Row-parallel CPU implementation of the D2Q9 BGK step.
///
/// Each step is two passes over the lattice, each ending in a buffer swap:
/// collision (front → back) and streaming with bounce-back and inflow
/// (front → back). Within a pass every cell writes only its own entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuStepper;

impl CpuStepper {
    pub fn new() -> Self {
        Self
    }

    pub fn step(&self, lattice: &mut Lattice, params: &StepParams) {
        self.collide(lattice, params.omega);
        lattice.swap_buffers();
        self.stream(lattice, params.inflow_speed);
        lattice.swap_buffers();
    }

    /// Relax every fluid cell toward its local equilibrium.
    fn collide(&self, lattice: &mut Lattice, omega: Float) {
        let nx = lattice.nx();
        let (front, back, barriers) = lattice.split_mut();

        back.par_chunks_mut(nx).enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let idx = x + y * nx;
                let f = &front[idx];
                if barriers[idx] != 0 {
                    *out = *f;
                    continue;
                }

                let (density, velocity) = D2Q9::moments(f);
                for i in 0..D2Q9::Q {
                    let f_eq = D2Q9::equilibrium(i, density, velocity);
                    out[i] = f[i] + omega * (f_eq - f[i]);
                }
            }
        });
    }

    /// Pull each direction from its upstream neighbour. Values that would
    /// have left through a wall or the domain edge come back reversed.
    fn stream(&self, lattice: &mut Lattice, inflow_speed: Option<Float>) {
        let nx = lattice.nx();
        let ny = lattice.ny();
        let inflow = inflow_speed.map(|speed| D2Q9::equilibrium_set(1.0, [speed, 0.0]));
        let (front, back, barriers) = lattice.split_mut();

        back.par_chunks_mut(nx).enumerate().for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let idx = x + y * nx;
                if barriers[idx] != 0 {
                    *out = front[idx];
                    continue;
                }
                // column 0 is the inflow; the last column is a far-field outlet
                // held at the same free stream, not a second source
                if let Some(eq) = inflow {
                    if x == 0 || x == nx - 1 {
                        *out = eq;
                        continue;
                    }
                }

                out[0] = front[idx][0];
                for i in 1..D2Q9::Q {
                    let c = D2Q9::VELOCITIES[i];
                    let sx = x as isize - c[0] as isize;
                    let sy = y as isize - c[1] as isize;

                    let in_domain = sx >= 0 && sy >= 0 && (sx as usize) < nx && (sy as usize) < ny;
                    let source = if in_domain { Some(sx as usize + sy as usize * nx) } else { None };

                    out[i] = match source {
                        Some(s) if barriers[s] == 0 => front[s][i],
                        _ => front[idx][D2Q9::OPPOSITE[i]],
                    };
                }
            }
        });
    }
}

impl ComputeBackend for CpuStepper {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn advance(&mut self, lattice: &mut Lattice, params: &StepParams, steps: usize) -> EngineResult<()> {
        let start_time = Instant::now();
        for _ in 0..steps {
            self.step(lattice, params);
        }

        let elapsed = start_time.elapsed();
        if elapsed.as_millis() > 10 {
            debug!("CPU advanced {} steps in {:.2}ms", steps, elapsed.as_secs_f64() * 1000.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::Direction;
    use approx::assert_relative_eq;

    fn streaming_only() -> StepParams {
        StepParams {
            omega: 0.0,
            inflow_speed: None,
        }
    }

    fn empty_lattice(nx: usize, ny: usize) -> Lattice {
        let mut lattice = Lattice::new(nx, ny).unwrap();
        lattice.fill_equilibrium(0.0, [0.0; 2]);
        lattice
    }

    fn impulse(lattice: &mut Lattice, x: usize, y: usize, direction: Direction, value: Float) {
        let mut f = [0.0; 9];
        f[direction.index()] = value;
        lattice.set_distribution(x, y, f);
    }

    #[test]
    fn pure_streaming_moves_each_direction_one_cell() {
        let mut lattice = empty_lattice(9, 9);
        for direction in Direction::ALL {
            impulse(&mut lattice, 4, 4, direction, 1.0);
            CpuStepper::new().step(&mut lattice, &streaming_only());

            let [dx, dy] = direction.offset();
            let cell = lattice
                .cell_at((4 + dx) as usize, (4 + dy) as usize)
                .unwrap();
            assert_eq!(cell.f[direction.index()], 1.0, "{:?}", direction);
            assert_eq!(lattice.total_mass(), 1.0);

            lattice.fill_equilibrium(0.0, [0.0; 2]);
        }
    }

    #[test]
    fn wall_reflects_into_opposite_direction_without_leaking() {
        let mut lattice = empty_lattice(10, 10);
        for x in 0..10 {
            lattice.set_barrier(x, 0, true).unwrap();
        }
        lattice.fill_equilibrium(0.0, [0.0; 2]);
        impulse(&mut lattice, 5, 2, Direction::South, 1.0);

        let stepper = CpuStepper::new();
        stepper.step(&mut lattice, &streaming_only());
        assert_eq!(lattice.cell_at(5, 1).unwrap().f[Direction::South.index()], 1.0);

        stepper.step(&mut lattice, &streaming_only());
        let source = lattice.cell_at(5, 1).unwrap();
        assert_eq!(source.f[Direction::North.index()], 1.0);
        assert_eq!(source.f[Direction::South.index()], 0.0);
        assert_eq!(lattice.cell_at(5, 0).unwrap().density(), 0.0);
        assert_eq!(lattice.total_mass(), 1.0);
    }

    #[test]
    fn domain_corner_reflects_diagonal() {
        let mut lattice = empty_lattice(6, 6);
        impulse(&mut lattice, 5, 0, Direction::SouthEast, 2.0);

        CpuStepper::new().step(&mut lattice, &streaming_only());
        let cell = lattice.cell_at(5, 0).unwrap();
        assert_eq!(cell.f[Direction::NorthWest.index()], 2.0);
        assert_eq!(lattice.total_mass(), 2.0);
    }

    #[test]
    fn closed_box_conserves_mass_with_collisions() {
        let mut lattice = Lattice::new(24, 16).unwrap();
        for x in 0..24 {
            lattice.set_barrier(x, 0, true).unwrap();
            lattice.set_barrier(x, 15, true).unwrap();
        }
        for y in 5..10 {
            lattice.set_barrier(8, y, true).unwrap();
        }
        lattice.fill_equilibrium(1.0, [0.1, 0.02]);
        let mass_before = lattice.total_mass();

        let params = StepParams {
            omega: 1.0 / 0.8,
            inflow_speed: None,
        };
        let mut stepper = CpuStepper::new();
        stepper.advance(&mut lattice, &params, 50).unwrap();

        assert_relative_eq!(lattice.total_mass(), mass_before, max_relative = 1e-5);
    }

    #[test]
    fn inflow_columns_hold_free_stream_equilibrium() {
        let mut lattice = Lattice::new(12, 8).unwrap();
        let params = StepParams {
            omega: 1.0,
            inflow_speed: Some(0.1),
        };
        let stepper = CpuStepper::new();
        stepper.step(&mut lattice, &params);

        let expected = D2Q9::equilibrium_set(1.0, [0.1, 0.0]);
        for y in 0..8 {
            assert_eq!(lattice.cell_at(0, y).unwrap().f, expected);
            assert_eq!(lattice.cell_at(11, y).unwrap().f, expected);
        }
        // the driven columns reach the interior one step later
        stepper.step(&mut lattice, &params);
        let interior = lattice.cell_at(1, 4).unwrap();
        assert!(interior.velocity()[0] > 0.0);
    }

    #[test]
    fn barrier_cells_are_left_untouched() {
        let mut lattice = Lattice::new(8, 8).unwrap();
        lattice.fill_equilibrium(1.0, [0.05, 0.0]);
        lattice.set_barrier(4, 4, true).unwrap();

        CpuStepper::new().step(
            &mut lattice,
            &StepParams {
                omega: 1.2,
                inflow_speed: Some(0.05),
            },
        );
        assert_eq!(lattice.cell_at(4, 4).unwrap().f, [0.0; 9]);
    }
}
