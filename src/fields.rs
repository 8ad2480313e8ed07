use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::{
    lattice::{Lattice, D2Q9},
    Float,
};

/// Scalar field handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputField {
    Curl,
    XVelocity,
    YVelocity,
    Density,
    Speed,
}

impl OutputField {
    pub const ALL: [OutputField; 5] = [
        OutputField::Curl,
        OutputField::XVelocity,
        OutputField::YVelocity,
        OutputField::Density,
        OutputField::Speed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OutputField::Curl => "Curl",
            OutputField::XVelocity => "VelocityX",
            OutputField::YVelocity => "VelocityY",
            OutputField::Density => "Density",
            OutputField::Speed => "Speed",
        }
    }
}

/// Color map selection; the engine only stores it for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMap {
    Inferno,
    Viridis,
    Jet,
}

/// One derived scalar per cell, with solid cells flagged separately.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuffer {
    pub field: OutputField,
    pub nx: usize,
    pub ny: usize,
    /// Row-major values; solid cells hold 0
    pub values: Vec<Float>,
    /// Row-major solid flags, drawn opaquely by the renderer
    pub solid: Vec<bool>,
}

impl FieldBuffer {
    pub fn value(&self, x: usize, y: usize) -> Option<Float> {
        if x >= self.nx || y >= self.ny {
            return None;
        }
        let idx = x + y * self.nx;
        (!self.solid[idx]).then_some(self.values[idx])
    }

    pub fn is_solid(&self, x: usize, y: usize) -> bool {
        self.solid[x + y * self.nx]
    }

    /// Minimum and maximum over fluid cells, for color normalisation.
    pub fn range(&self) -> Option<(Float, Float)> {
        self.values
            .iter()
            .zip(&self.solid)
            .filter(|(_, solid)| !**solid)
            .map(|(&v, _)| v)
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Macroscopic moments of every cell: density and velocity.
#[derive(Debug, Clone)]
pub struct Macroscopic {
    pub nx: usize,
    pub ny: usize,
    pub density: Vec<Float>,
    pub ux: Vec<Float>,
    pub uy: Vec<Float>,
    pub solid: Vec<bool>,
}

impl Macroscopic {
    pub fn from_lattice(lattice: &Lattice) -> Self {
        let moments: Vec<(Float, [Float; 2])> = lattice
            .densities()
            .par_iter()
            .zip(lattice.barriers().par_iter())
            .map(|(f, &solid)| if solid != 0 { (0.0, [0.0; 2]) } else { D2Q9::moments(f) })
            .collect();

        let (density, (ux, uy)): (Vec<Float>, (Vec<Float>, Vec<Float>)) = moments
            .into_iter()
            .map(|(rho, u)| (rho, (u[0], u[1])))
            .unzip();

        Self {
            nx: lattice.nx(),
            ny: lattice.ny(),
            density,
            ux,
            uy,
            solid: lattice.barriers().iter().map(|&b| b != 0).collect(),
        }
    }

    pub fn speed(&self) -> Vec<Float> {
        self.ux
            .par_iter()
            .zip(self.uy.par_iter())
            .map(|(&ux, &uy)| (ux * ux + uy * uy).sqrt())
            .collect()
    }

    /// ∂uy/∂x − ∂ux/∂y by central differences. Zero wherever the cell or one
    /// of its four neighbours is solid or missing.
    pub fn curl(&self) -> Vec<Float> {
        let (nx, ny) = (self.nx, self.ny);
        let mut curl = vec![0.0; nx * ny];

        curl.par_chunks_mut(nx).enumerate().for_each(|(y, row)| {
            if y == 0 || y + 1 >= ny {
                return;
            }
            for x in 1..nx - 1 {
                let idx = x + y * nx;
                let (east, west, north, south) = (idx + 1, idx - 1, idx + nx, idx - nx);
                if [idx, east, west, north, south].iter().any(|&i| self.solid[i]) {
                    continue;
                }
                let duy_dx = (self.uy[east] - self.uy[west]) * 0.5;
                let dux_dy = (self.ux[north] - self.ux[south]) * 0.5;
                row[x] = duy_dx - dux_dy;
            }
        });

        curl
    }

    pub fn field(&self, field: OutputField) -> FieldBuffer {
        let values = match field {
            OutputField::Density => self.density.clone(),
            OutputField::XVelocity => self.ux.clone(),
            OutputField::YVelocity => self.uy.clone(),
            OutputField::Speed => self.speed(),
            OutputField::Curl => self.curl(),
        };

        FieldBuffer {
            field,
            nx: self.nx,
            ny: self.ny,
            values,
            solid: self.solid.clone(),
        }
    }
}

/// Extract one output field. Never mutates the lattice.
pub fn extract(lattice: &Lattice, field: OutputField) -> FieldBuffer {
    Macroscopic::from_lattice(lattice).field(field)
}
