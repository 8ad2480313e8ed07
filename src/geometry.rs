use std::collections::BTreeSet;
use line_drawing::Bresenham;
use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// Integer cell coordinate; may lie outside the grid until clipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: isize,
    pub y: isize,
}

impl GridPoint {
    pub fn new(x: isize, y: isize) -> Self {
        Self { x, y }
    }

    pub fn from_point(point: &Point2<f64>) -> Self {
        Self::new(point.x.round() as isize, point.y.round() as isize)
    }

    pub fn is_within(&self, nx: usize, ny: usize) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < nx && (self.y as usize) < ny
    }
}

/// A set of cells produced by rasterizing strokes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    cells: BTreeSet<GridPoint>,
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rasterize a segment with a square brush of side `width`.
    ///
    /// The centre line is Bresenham with every diagonal step filled in, so the
    /// result is 4-connected and fluid cannot leak through at width 1.
    pub fn segment(a: GridPoint, b: GridPoint, width: usize) -> Self {
        let mut shape = Self::new();
        shape.add_segment(a, b, width);
        shape
    }

    pub fn polyline(points: &[GridPoint], width: usize) -> Self {
        let mut shape = Self::new();
        match points {
            [] => {}
            [single] => shape.stamp(*single, width),
            _ => {
                for pair in points.windows(2) {
                    shape.add_segment(pair[0], pair[1], width);
                }
            }
        }
        shape
    }

    /// Circular arc from `start_deg` to `end_deg`, counter-clockwise from +x.
    pub fn arc(center: Point2<f64>, radius: f64, start_deg: f64, end_deg: f64, width: usize) -> Self {
        let span = (end_deg - start_deg).to_radians();
        let steps = (radius * span.abs()).ceil().max(1.0) as usize;
        let spoke = Vector2::new(radius, 0.0);

        let points: Vec<GridPoint> = (0..=steps)
            .map(|k| {
                let angle = start_deg.to_radians() + span * k as f64 / steps as f64;
                GridPoint::from_point(&(center + Rotation2::new(angle) * spoke))
            })
            .collect();

        Self::polyline(&points, width)
    }

    pub fn add_segment(&mut self, a: GridPoint, b: GridPoint, width: usize) {
        let mut previous = a;
        for (x, y) in Bresenham::new((a.x, a.y), (b.x, b.y)) {
            let point = GridPoint::new(x, y);
            if point.x != previous.x && point.y != previous.y {
                self.stamp(GridPoint::new(point.x, previous.y), width);
            }
            self.stamp(point, width);
            previous = point;
        }
        self.stamp(b, width);
    }

    /// Fill a `width` × `width` square anchored on `center`.
    pub fn stamp(&mut self, center: GridPoint, width: usize) {
        let width = width.max(1) as isize;
        let lo = -((width - 1) / 2);
        let hi = width / 2;
        for dy in lo..=hi {
            for dx in lo..=hi {
                self.cells.insert(GridPoint::new(center.x + dx, center.y + dy));
            }
        }
    }

    pub fn join(&mut self, other: &Shape) {
        self.cells.extend(other.cells.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, point: GridPoint) -> bool {
        self.cells.contains(&point)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridPoint> {
        self.cells.iter()
    }

    /// Cells that fall inside an `nx` × `ny` grid.
    pub fn cells_within(&self, nx: usize, ny: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .iter()
            .filter(move |p| p.is_within(nx, ny))
            .map(|p| (p.x as usize, p.y as usize))
    }
}

struct Glyph {
    /// Strokes in letter units: x in letter widths, y in cap heights
    strokes: &'static [([f64; 2], [f64; 2])],
    advance: f64,
}

fn glyph(c: char) -> Option<Glyph> {
    let (strokes, advance): (&'static [([f64; 2], [f64; 2])], f64) = match c {
        'W' | 'w' => (
            &[
                ([0.0, 1.0], [0.0, 0.0]),
                ([0.0, 0.0], [0.5, 0.5]),
                ([0.5, 0.5], [1.0, 0.0]),
                ([1.0, 1.0], [1.0, 0.0]),
            ],
            1.0,
        ),
        'e' => (
            &[
                ([0.0, 0.5], [0.0, 0.0]),
                ([0.0, 0.0], [1.0, 0.0]),
                ([0.0, 0.25], [1.0, 0.25]),
                ([0.0, 0.5], [1.0, 0.5]),
                ([1.0, 0.5], [1.0, 0.25]),
            ],
            1.0,
        ),
        'l' => (&[([0.0, 0.0], [0.0, 1.0])], 0.0),
        'c' => (
            &[
                ([0.0, 0.5], [0.0, 0.0]),
                ([0.0, 0.0], [1.0, 0.0]),
                ([0.0, 0.5], [1.0, 0.5]),
            ],
            1.0,
        ),
        'o' => (
            &[
                ([0.0, 0.5], [0.0, 0.0]),
                ([0.0, 0.0], [1.0, 0.0]),
                ([0.0, 0.5], [1.0, 0.5]),
                ([1.0, 0.5], [1.0, 0.0]),
            ],
            1.0,
        ),
        'm' => (
            &[
                ([0.0, 0.5], [0.0, 0.0]),
                ([0.5, 0.0], [0.5, 0.5]),
                ([0.0, 0.5], [1.0, 0.5]),
                ([1.0, 0.5], [1.0, 0.0]),
            ],
            1.0,
        ),
        '!' => (&[([0.0, 0.0], [0.0, 0.1]), ([0.0, 0.2], [0.0, 1.0])], 0.0),
        ' ' => (&[], 1.0),
        _ => return None,
    };
    Some(Glyph { strokes, advance })
}

/// Block-letter strokes for `text`, left to right from `origin` on the baseline.
///
/// Characters without a glyph are skipped.
pub fn text_strokes(
    text: &str,
    origin: GridPoint,
    letter_width: isize,
    height: isize,
    space: isize,
) -> Vec<(GridPoint, GridPoint)> {
    let mut strokes = Vec::new();
    let mut cursor = origin.x;

    for c in text.chars() {
        let Some(glyph) = glyph(c) else {
            log::debug!("no glyph for {:?}", c);
            continue;
        };

        let place = |[u, v]: [f64; 2]| {
            GridPoint::new(
                cursor + (u * letter_width as f64).round() as isize,
                origin.y + (v * height as f64).round() as isize,
            )
        };
        strokes.extend(glyph.strokes.iter().map(|&(a, b)| (place(a), place(b))));
        cursor += (glyph.advance * letter_width as f64).round() as isize + space;
    }

    strokes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_connected(shape: &Shape) -> bool {
        // every cell except a lone one has an axis-aligned neighbour
        shape.len() == 1
            || shape.iter().all(|p| {
                [(1, 0), (-1, 0), (0, 1), (0, -1)]
                    .iter()
                    .any(|(dx, dy)| shape.contains(GridPoint::new(p.x + dx, p.y + dy)))
            })
    }

    #[test]
    fn diagonal_segment_is_filled_to_four_connectivity() {
        let shape = Shape::segment(GridPoint::new(0, 0), GridPoint::new(3, 3), 1);
        assert_eq!(shape.len(), 7);
        assert!(shape.contains(GridPoint::new(0, 0)));
        assert!(shape.contains(GridPoint::new(3, 3)));
        assert!(shape.contains(GridPoint::new(1, 0)));
        assert!(four_connected(&shape));
    }

    #[test]
    fn shallow_segment_has_no_gaps() {
        let shape = Shape::segment(GridPoint::new(-2, 5), GridPoint::new(17, 9), 1);
        assert!(four_connected(&shape));
        for x in -2..=17 {
            assert!(shape.iter().any(|p| p.x == x));
        }
    }

    #[test]
    fn single_point_segment_stamps_brush() {
        let shape = Shape::segment(GridPoint::new(4, 4), GridPoint::new(4, 4), 3);
        assert_eq!(shape.len(), 9);
        assert!(shape.contains(GridPoint::new(3, 3)));
        assert!(shape.contains(GridPoint::new(5, 5)));
    }

    #[test]
    fn even_width_brush_extends_up_and_right() {
        let shape = Shape::segment(GridPoint::new(0, 0), GridPoint::new(0, 0), 2);
        let cells: Vec<_> = shape.iter().copied().collect();
        assert_eq!(
            cells,
            vec![
                GridPoint::new(0, 0),
                GridPoint::new(0, 1),
                GridPoint::new(1, 0),
                GridPoint::new(1, 1)
            ]
        );
    }

    #[test]
    fn arc_stays_on_its_circle() {
        let center = Point2::new(20.0, 20.0);
        let shape = Shape::arc(center, 10.0, 0.0, 180.0, 1);
        assert!(shape.contains(GridPoint::new(30, 20)));
        assert!(shape.contains(GridPoint::new(20, 30)));
        assert!(shape.contains(GridPoint::new(10, 20)));
        for p in shape.iter() {
            let r = ((p.x as f64 - 20.0).powi(2) + (p.y as f64 - 20.0).powi(2)).sqrt();
            assert!((8.5..=11.5).contains(&r), "{:?} at radius {}", p, r);
            assert!(p.y >= 20);
        }
        assert!(four_connected(&shape));
    }

    #[test]
    fn clipping_drops_outside_cells() {
        let shape = Shape::segment(GridPoint::new(-3, 1), GridPoint::new(3, 1), 1);
        let inside: Vec<_> = shape.cells_within(2, 3).collect();
        assert_eq!(inside, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn text_advances_past_each_letter() {
        let strokes = text_strokes("Wl!", GridPoint::new(10, 50), 8, 20, 2);
        // W: 4 strokes at x 10..18, l at 20, ! at 22
        assert_eq!(strokes.len(), 4 + 1 + 2);
        assert_eq!(strokes[0], (GridPoint::new(10, 70), GridPoint::new(10, 50)));
        assert_eq!(strokes[4], (GridPoint::new(20, 50), GridPoint::new(20, 70)));
        assert_eq!(strokes[5].0, GridPoint::new(22, 50));
        assert_eq!(strokes[6].1, GridPoint::new(22, 70));
    }

    #[test]
    fn unknown_characters_are_skipped() {
        assert!(text_strokes("#", GridPoint::new(0, 0), 5, 5, 1).is_empty());
    }
}
