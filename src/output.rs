use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use crate::{fields::Macroscopic, Float};

/// Legacy-format VTK dumps of the derived fields, plus a ParaView `.pvd`
/// collection indexing them by iteration.
pub struct VTKWriter {
    output_directory: PathBuf,
    collection_entries: Vec<(u64, PathBuf)>, // (iteration, filename)
}

impl VTKWriter {
    pub fn new(output_directory: impl AsRef<Path>) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
            collection_entries: Vec::new(),
        }
    }

    pub fn frame_path(&self, iteration: u64) -> PathBuf {
        self.output_directory.join(format!("output_{:08}.vtk", iteration))
    }

    /// Write one frame to the output directory and record it for the collection.
    pub fn write(&mut self, fields: &Macroscopic, iteration: u64) -> Result<PathBuf> {
        let filename = self.frame_path(iteration);
        let mut file = BufWriter::new(File::create(&filename)?);
        Self::write_to(&mut file, fields, iteration)?;
        file.flush()?;

        self.collection_entries.push((iteration, filename.clone()));
        Ok(filename)
    }

    pub fn write_to<W: Write>(out: &mut W, fields: &Macroscopic, iteration: u64) -> Result<()> {
        let (nx, ny) = (fields.nx, fields.ny);
        let points = nx * ny;

        // 2D grid as a single-layer structured points dataset
        writeln!(out, "# vtk DataFile Version 3.0")?;
        writeln!(out, "LBM Solution - Iteration {}", iteration)?;
        writeln!(out, "ASCII")?;
        writeln!(out, "DATASET STRUCTURED_POINTS")?;
        writeln!(out, "DIMENSIONS {} {} 1", nx, ny)?;
        writeln!(out, "ORIGIN 0 0 0")?;
        writeln!(out, "SPACING 1 1 1")?;
        writeln!(out, "POINT_DATA {}", points)?;

        Self::write_scalars(out, "Density", &fields.density)?;

        writeln!(out, "VECTORS Velocity float")?;
        for (ux, uy) in fields.ux.iter().zip(&fields.uy) {
            writeln!(out, "{:.6} {:.6} 0", ux, uy)?;
        }

        Self::write_scalars(out, "Speed", &fields.speed())?;
        Self::write_scalars(out, "Curl", &fields.curl())?;

        writeln!(out, "SCALARS Barrier float")?;
        writeln!(out, "LOOKUP_TABLE default")?;
        for &solid in &fields.solid {
            writeln!(out, "{:.1}", if solid { 1.0 } else { 0.0 })?;
        }

        Ok(())
    }

    fn write_scalars<W: Write>(out: &mut W, name: &str, values: &[Float]) -> Result<()> {
        writeln!(out, "SCALARS {} float", name)?;
        writeln!(out, "LOOKUP_TABLE default")?;
        for value in values {
            writeln!(out, "{:.6}", value)?;
        }
        Ok(())
    }

    /// Write a ParaView collection file that groups all VTK files with time information
    pub fn write_collection(&self, collection_filename: impl AsRef<Path>) -> Result<()> {
        let mut file = BufWriter::new(File::create(collection_filename)?);

        writeln!(file, "<?xml version=\"1.0\"?>")?;
        writeln!(file, "<VTKFile type=\"Collection\" version=\"0.1\">")?;
        writeln!(file, "  <Collection>")?;

        for (iteration, filename) in &self.collection_entries {
            // Entries are relative to the collection file
            let basename = filename
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            writeln!(file, "    <DataSet timestep=\"{}\" part=\"0\" file=\"{}\"/>",
                     iteration, basename)?;
        }

        writeln!(file, "  </Collection>")?;
        writeln!(file, "</VTKFile>")?;
        file.flush()?;

        Ok(())
    }

    /// Get the number of files written so far
    pub fn file_count(&self) -> usize {
        self.collection_entries.len()
    }
}
