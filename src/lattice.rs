use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::{
    error::{EngineError, EngineResult},
    Float,
};

/// D2Q9 Lattice-Boltzmann model constants
///
/// ```text
///   6   2   5
///    \  |  /
///   3 - 0 - 1
///    /  |  \
///   7   4   8
/// ```
pub struct D2Q9;

impl D2Q9 {
    /// Number of discrete velocities
    pub const Q: usize = 9;

    /// Discrete velocities, `y` pointing north
    pub const VELOCITIES: [[i32; 2]; 9] = [
        [0, 0],
        [1, 0], [0, 1], [-1, 0], [0, -1],
        [1, 1], [-1, 1], [-1, -1], [1, -1],
    ];

    /// Weights for each direction
    pub const WEIGHTS: [Float; 9] = [
        4.0 / 9.0,
        1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0,
        1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0,
    ];

    /// Opposite directions for bounce-back boundary conditions
    pub const OPPOSITE: [usize; 9] = [0, 3, 4, 1, 2, 7, 8, 5, 6];

    /// Speed of sound squared
    pub const CS2: Float = 1.0 / 3.0;

    /// Equilibrium distribution for one direction.
    ///
    /// `f_i^eq = w_i ρ [1 + 3(e_i·u) + 9/2(e_i·u)² - 3/2(u·u)]`
    #[inline]
    pub fn equilibrium(direction: usize, density: Float, velocity: [Float; 2]) -> Float {
        let c = Self::VELOCITIES[direction];
        let cu = c[0] as Float * velocity[0] + c[1] as Float * velocity[1];
        let u2 = velocity[0] * velocity[0] + velocity[1] * velocity[1];

        Self::WEIGHTS[direction]
            * density
            * (1.0 + cu / Self::CS2 + cu * cu / (2.0 * Self::CS2 * Self::CS2) - u2 / (2.0 * Self::CS2))
    }

    /// Full equilibrium distribution for a density/velocity pair.
    pub fn equilibrium_set(density: Float, velocity: [Float; 2]) -> [Float; 9] {
        std::array::from_fn(|i| Self::equilibrium(i, density, velocity))
    }

    /// Density and velocity moments of a distribution.
    #[inline]
    pub fn moments(f: &[Float; 9]) -> (Float, [Float; 2]) {
        let mut density = 0.0;
        let mut momentum = [0.0; 2];
        for (i, &value) in f.iter().enumerate() {
            let c = Self::VELOCITIES[i];
            density += value;
            momentum[0] += value * c[0] as Float;
            momentum[1] += value * c[1] as Float;
        }

        if density > 1e-10 {
            (density, [momentum[0] / density, momentum[1] / density])
        } else {
            (density, [0.0; 2])
        }
    }
}

/// Named lattice directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Rest,
    East,
    North,
    West,
    South,
    NorthEast,
    NorthWest,
    SouthWest,
    SouthEast,
}

impl Direction {
    pub const ALL: [Direction; 9] = [
        Direction::Rest,
        Direction::East,
        Direction::North,
        Direction::West,
        Direction::South,
        Direction::NorthEast,
        Direction::NorthWest,
        Direction::SouthWest,
        Direction::SouthEast,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn offset(self) -> [i32; 2] {
        D2Q9::VELOCITIES[self.index()]
    }

    pub fn opposite(self) -> Direction {
        Self::ALL[D2Q9::OPPOSITE[self.index()]]
    }
}

/// Snapshot of one lattice cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    /// Directional densities (f_i)
    pub f: [Float; 9],
    /// Solid cell flag
    pub barrier: bool,
}

impl Cell {
    pub fn density(&self) -> Float {
        self.f.iter().sum()
    }

    pub fn velocity(&self) -> [Float; 2] {
        D2Q9::moments(&self.f).1
    }
}

/// Float roundoff allowed below zero before a directional density counts as negative
pub const NEGATIVE_TOLERANCE: Float = 1.0e-6;

/// Bounds on directional densities beyond which a step counts as diverged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityLimits {
    pub min_value: Float,
    pub max_value: Float,
}

impl Default for StabilityLimits {
    fn default() -> Self {
        Self {
            min_value: -NEGATIVE_TOLERANCE,
            max_value: 100.0,
        }
    }
}

/// Location of the first out-of-bounds directional density found by a scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstabilitySite {
    pub x: usize,
    pub y: usize,
    pub direction: usize,
    pub value: Float,
}

/// Double-buffered D2Q9 lattice store.
///
/// Steps read `front` and write `back`, then call [`Lattice::swap_buffers`];
/// readers only ever see `front`.
pub struct Lattice {
    nx: usize,
    ny: usize,
    front: Vec<[Float; 9]>,
    back: Vec<[Float; 9]>,
    barriers: Vec<u32>,
    revision: u64,
}

impl Lattice {
    /// Allocate a lattice filled with rest fluid (ρ = 1, u = 0) and no barriers.
    pub fn new(nx: usize, ny: usize) -> EngineResult<Self> {
        if nx < 3 || ny < 3 {
            return Err(EngineError::InvalidDimensions { nx, ny });
        }
        let cells = nx.checked_mul(ny).ok_or(EngineError::Allocation {
            cells: usize::MAX,
            reason: "cell count overflows usize".to_string(),
        })?;

        let rest = D2Q9::equilibrium_set(1.0, [0.0; 2]);
        let front = Self::allocate(cells, rest)?;
        let back = Self::allocate(cells, rest)?;
        let barriers = Self::allocate(cells, 0u32)?;

        Ok(Self {
            nx,
            ny,
            front,
            back,
            barriers,
            revision: 0,
        })
    }

    fn allocate<T: Clone>(cells: usize, value: T) -> EngineResult<Vec<T>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(cells)
            .map_err(|e| EngineError::Allocation {
                cells,
                reason: e.to_string(),
            })?;
        buffer.resize(cells, value);
        Ok(buffer)
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn len(&self) -> usize {
        self.front.len()
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_empty()
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        x + y * self.nx
    }

    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.nx && (y as usize) < self.ny
    }

    /// Incremented by every host-side mutation; device mirrors use it to
    /// decide when to re-upload.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn cell_at(&self, x: usize, y: usize) -> Option<Cell> {
        if x >= self.nx || y >= self.ny {
            return None;
        }
        let idx = self.index(x, y);
        Some(Cell {
            f: self.front[idx],
            barrier: self.barriers[idx] != 0,
        })
    }

/// False outside the grid.
    pub fn is_barrier(&self, x: usize, y: usize) -> bool {
        x < self.nx && y < self.ny && self.barriers[self.index(x, y)] != 0
    }

    /// Set or clear a barrier flag. Returns whether the flag changed.
    ///
    /// A cell turning solid loses its densities; a cell turning fluid
    /// restarts from rest equilibrium.
    pub fn set_barrier(&mut self, x: usize, y: usize, solid: bool) -> EngineResult<bool> {
        if x >= self.nx || y >= self.ny {
            return Err(EngineError::OutOfBounds {
                x: x as isize,
                y: y as isize,
                nx: self.nx,
                ny: self.ny,
            });
        }
        Ok(self.toggle_barrier(self.index(x, y), solid))
    }

    fn toggle_barrier(&mut self, idx: usize, solid: bool) -> bool {
        let was_solid = self.barriers[idx] != 0;
        if was_solid == solid {
            return false;
        }

        self.barriers[idx] = solid as u32;
        self.front[idx] = if solid {
            [0.0; 9]
        } else {
            D2Q9::equilibrium_set(1.0, [0.0; 2])
        };
        self.revision += 1;
        true
    }

    pub fn barriers(&self) -> &[u32] {
        &self.barriers
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers.iter().filter(|&&b| b != 0).count()
    }

    pub fn barrier_snapshot(&self) -> Vec<u32> {
        self.barriers.clone()
    }

    /// Restore a layout produced by [`Lattice::barrier_snapshot`].
    pub fn restore_barriers(&mut self, snapshot: &[u32]) {
        debug_assert_eq!(snapshot.len(), self.barriers.len());
        for (idx, &flag) in snapshot.iter().enumerate().take(self.barriers.len()) {
            self.toggle_barrier(idx, flag != 0);
        }
    }

    /// Current directional densities, one `[f; 9]` per cell in row-major order.
    pub fn densities(&self) -> &[[Float; 9]] {
        &self.front
    }

    pub fn set_distribution(&mut self, x: usize, y: usize, f: [Float; 9]) {
        let idx = self.index(x, y);
        self.front[idx] = f;
        self.revision += 1;
    }

    /// Fill every fluid cell with the same equilibrium; barrier cells are zeroed.
    pub fn fill_equilibrium(&mut self, density: Float, velocity: [Float; 2]) {
        let eq = D2Q9::equilibrium_set(density, velocity);
        let barriers = &self.barriers;
        self.front
            .par_iter_mut()
            .zip(barriers.par_iter())
            .for_each(|(f, &solid)| *f = if solid != 0 { [0.0; 9] } else { eq });
        self.revision += 1;
    }

    /// Borrow the readable front buffer, the writable back buffer and the
    /// barrier flags at once.
    pub fn split_mut(&mut self) -> (&[[Float; 9]], &mut [[Float; 9]], &[u32]) {
        (&self.front, &mut self.back, &self.barriers)
    }

    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Replace the front buffer with densities computed elsewhere (device read-back).
    /// Does not bump the revision.
    pub fn overwrite_front(&mut self, data: &[[Float; 9]]) -> EngineResult<()> {
        if data.len() != self.front.len() {
            return Err(EngineError::Backend(format!(
                "read-back holds {} cells, lattice holds {}",
                data.len(),
                self.front.len()
            )));
        }
        self.front.copy_from_slice(data);
        Ok(())
    }

    /// Total mass over fluid cells.
    pub fn total_mass(&self) -> f64 {
        self.front
            .par_iter()
            .zip(self.barriers.par_iter())
            .filter(|(_, solid)| **solid == 0)
            .map(|(f, _)| f.iter().map(|&v| v as f64).sum::<f64>())
            .sum()
    }

    /// Scan fluid cells for non-finite or out-of-bounds densities.
    pub fn find_instability(&self, limits: &StabilityLimits) -> Option<InstabilitySite> {
        let nx = self.nx;
        self.front
            .par_iter()
            .zip(self.barriers.par_iter())
            .enumerate()
            .find_map_first(|(idx, (f, &solid))| {
                if solid != 0 {
                    return None;
                }
                f.iter().enumerate().find_map(|(direction, &value)| {
                    let bad = !value.is_finite()
                        || value < limits.min_value
                        || value > limits.max_value;
                    bad.then_some(InstabilitySite {
                        x: idx % nx,
                        y: idx / nx,
                        direction,
                        value,
                    })
                })
            })
    }
}
