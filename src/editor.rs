use log::{debug, info};
use serde::{Deserialize, Serialize};
use crate::{
    error::{EngineError, EngineResult},
    geometry::{GridPoint, Shape},
    lattice::Lattice,
};

/// Brush side for drawn strokes and lines
pub const DRAW_WIDTH: usize = 2;
/// Brush side for the eraser
pub const ERASE_WIDTH: usize = 8;

/// What a pointer press does to the barrier layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrawTool {
    Line,
    Erase,
    #[default]
    Draw,
    Inactive,
}

/// Applies draw/erase/line edits to a lattice's barrier flags and keeps one
/// snapshot of the layout taken before the most recent gesture.
#[derive(Debug, Default)]
pub struct BarrierEditor {
    tool: DrawTool,
    snapshot: Option<Vec<u32>>,
    /// Last point of the stroke in progress
    stroke: Option<GridPoint>,
    /// First click of a pending line
    line_anchor: Option<GridPoint>,
    read_only: Option<&'static str>,
}

impl BarrierEditor {
    pub fn new(tool: DrawTool) -> Self {
        Self {
            tool,
            ..Self::default()
        }
    }

    pub fn tool(&self) -> DrawTool {
        self.tool
    }

    /// Switch tools. Abandons any stroke in progress or half-placed line.
    pub fn set_tool(&mut self, tool: DrawTool) {
        self.tool = tool;
        self.stroke = None;
        self.line_anchor = None;
    }

    /// Reject every edit with [`EngineError::ReadOnlyLayout`] while set.
    pub fn set_read_only(&mut self, layout: Option<&'static str>) {
        self.read_only = layout;
        if layout.is_some() {
            self.stroke = None;
            self.line_anchor = None;
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.is_some()
    }

    pub fn has_undo(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn pending_line_anchor(&self) -> Option<GridPoint> {
        self.line_anchor
    }

    /// Forget the undo snapshot and any gesture in progress.
    pub fn clear_history(&mut self) {
        self.snapshot = None;
        self.stroke = None;
        self.line_anchor = None;
    }

    /// Pointer press with the current tool. Returns whether barriers changed.
    pub fn press(&mut self, lattice: &mut Lattice, at: GridPoint) -> EngineResult<bool> {
        match self.tool {
            DrawTool::Draw | DrawTool::Erase => self.begin_stroke(lattice, at),
            DrawTool::Line => self.click_line(lattice, at),
            DrawTool::Inactive => Ok(false),
        }
    }

    /// Pointer drag. Only meaningful during a stroke.
    pub fn drag(&mut self, lattice: &mut Lattice, to: GridPoint) -> EngineResult<bool> {
        self.extend_stroke(lattice, to)
    }

    pub fn release(&mut self) -> bool {
        self.end_stroke()
    }

    /// Start a draw or erase stroke at `at`, snapshotting the layout first.
    pub fn begin_stroke(&mut self, lattice: &mut Lattice, at: GridPoint) -> EngineResult<bool> {
        let Some((solid, width)) = self.brush() else {
            return Ok(false);
        };
        self.check_editable()?;
        Self::check_inside(lattice, at)?;

        self.take_snapshot(lattice);
        self.stroke = Some(at);
        let changed = Self::apply(lattice, &Shape::segment(at, at, width), solid);
        Ok(changed > 0)
    }

    /// Continue the current stroke with a segment from its last point.
    pub fn extend_stroke(&mut self, lattice: &mut Lattice, to: GridPoint) -> EngineResult<bool> {
        let (Some(from), Some((solid, width))) = (self.stroke, self.brush()) else {
            return Ok(false);
        };
        self.check_editable()?;
        Self::check_inside(lattice, to)?;

        self.stroke = Some(to);
        let changed = Self::apply(lattice, &Shape::segment(from, to, width), solid);
        Ok(changed > 0)
    }

    pub fn end_stroke(&mut self) -> bool {
        self.stroke.take().is_some()
    }

    /// First call anchors the line, second call commits it.
    pub fn click_line(&mut self, lattice: &mut Lattice, at: GridPoint) -> EngineResult<bool> {
        self.check_editable()?;
        Self::check_inside(lattice, at)?;

        match self.line_anchor.take() {
            None => {
                self.line_anchor = Some(at);
                Ok(false)
            }
            Some(anchor) => self.line(lattice, anchor, at).map(|changed| changed > 0),
        }
    }

    /// Mark barrier cells along `path`. Returns the number of cells changed.
    pub fn draw(&mut self, lattice: &mut Lattice, path: &[GridPoint]) -> EngineResult<usize> {
        self.edit_path(lattice, path, true, DRAW_WIDTH)
    }

    /// Clear barrier cells along `path`. Returns the number of cells changed.
    pub fn erase(&mut self, lattice: &mut Lattice, path: &[GridPoint]) -> EngineResult<usize> {
        self.edit_path(lattice, path, false, ERASE_WIDTH)
    }

    pub fn line(&mut self, lattice: &mut Lattice, from: GridPoint, to: GridPoint) -> EngineResult<usize> {
        self.edit_path(lattice, &[from, to], true, DRAW_WIDTH)
    }

    /// Restore the layout from before the last gesture. Single level: a second
    /// call without a new edit in between does nothing and returns false.
    pub fn undo(&mut self, lattice: &mut Lattice) -> bool {
        self.stroke = None;
        self.line_anchor = None;
        match self.snapshot.take() {
            Some(snapshot) => {
                lattice.restore_barriers(&snapshot);
                debug!("restored barrier snapshot ({} solid cells)", lattice.barrier_count());
                true
            }
            None => {
                info!("nothing to undo");
                false
            }
        }
    }

    fn edit_path(
        &mut self,
        lattice: &mut Lattice,
        path: &[GridPoint],
        solid: bool,
        width: usize,
    ) -> EngineResult<usize> {
        self.check_editable()?;
        for &point in path {
            Self::check_inside(lattice, point)?;
        }
        if path.is_empty() {
            return Ok(0);
        }

        self.take_snapshot(lattice);
        Ok(Self::apply(lattice, &Shape::polyline(path, width), solid))
    }

    fn brush(&self) -> Option<(bool, usize)> {
        match self.tool {
            DrawTool::Draw => Some((true, DRAW_WIDTH)),
            DrawTool::Erase => Some((false, ERASE_WIDTH)),
            DrawTool::Line | DrawTool::Inactive => None,
        }
    }

    fn take_snapshot(&mut self, lattice: &Lattice) {
        self.snapshot = Some(lattice.barrier_snapshot());
    }

    fn check_editable(&self) -> EngineResult<()> {
        match self.read_only {
            Some(layout) => Err(EngineError::ReadOnlyLayout(layout)),
            None => Ok(()),
        }
    }

    fn check_inside(lattice: &Lattice, point: GridPoint) -> EngineResult<()> {
        if lattice.contains(point.x, point.y) {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                x: point.x,
                y: point.y,
                nx: lattice.nx(),
                ny: lattice.ny(),
            })
        }
    }

    /// Brush cells overhanging the grid edge are dropped.
    fn apply(lattice: &mut Lattice, shape: &Shape, solid: bool) -> usize {
        let (nx, ny) = (lattice.nx(), lattice.ny());
        shape
            .cells_within(nx, ny)
            .filter(|&(x, y)| matches!(lattice.set_barrier(x, y, solid), Ok(true)))
            .count()
    }
}
