//! Uniform-grid spatial index over entity bounding boxes.

use hg_core::{Bounds, Id, Real};

/// Upper bound on grid cells along one axis.
const MAX_SIDE: usize = 64;

/// Grid of buckets covering an extent; each bucket lists the items whose
/// bounding box overlaps the cell.
#[derive(Debug, Clone)]
pub struct GridIndex {
    extent: Bounds,
    side: usize,
    cell_w: Real,
    cell_h: Real,
    /// Positions into `items` for each cell, row-major.
    cells: Vec<Vec<u32>>,
    items: Vec<(Id, Bounds)>,
}

impl GridIndex {
    /// Build an index over `items`. `extent` is grown to cover every item.
    pub fn build(extent: Bounds, mut items: Vec<(Id, Bounds)>) -> Self {
        items.sort_by_key(|(id, _)| *id);
        let extent = items.iter().fold(extent, |acc, (_, b)| acc.union(b));
        let side = ((items.len() as Real).sqrt().ceil() as usize).clamp(1, MAX_SIDE);
        let cell_w = (extent.width() / side as Real).max(Real::EPSILON);
        let cell_h = (extent.height() / side as Real).max(Real::EPSILON);

        let mut index = Self {
            extent,
            side,
            cell_w,
            cell_h,
            cells: vec![Vec::new(); side * side],
            items,
        };
        for pos in 0..index.items.len() {
            let (x0, y0, x1, y1) = index.cell_range(&index.items[pos].1);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    index.cells[y * side + x].push(pos as u32);
                }
            }
        }
        index
    }

    /// An index with nothing in it.
    pub fn empty(extent: Bounds) -> Self {
        Self::build(extent, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// IDs whose bounding box intersects `area`, sorted and de-duplicated.
    pub fn query(&self, area: &Bounds) -> Vec<Id> {
        if self.items.is_empty() || !self.extent.intersects(area) {
            return Vec::new();
        }
        let (x0, y0, x1, y1) = self.cell_range(area);
        let mut hits: Vec<u32> = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                hits.extend(
                    self.cells[y * self.side + x]
                        .iter()
                        .copied()
                        .filter(|&pos| self.items[pos as usize].1.intersects(area)),
                );
            }
        }
        // item positions follow ID order, so sorting positions sorts IDs
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter()
            .map(|pos| self.items[pos as usize].0)
            .collect()
    }

    fn cell_range(&self, b: &Bounds) -> (usize, usize, usize, usize) {
        (
            self.cell_x(b.min.x),
            self.cell_y(b.min.y),
            self.cell_x(b.max.x),
            self.cell_y(b.max.y),
        )
    }

    fn cell_x(&self, x: Real) -> usize {
        Self::clamp_cell((x - self.extent.min.x) / self.cell_w, self.side)
    }

    fn cell_y(&self, y: Real) -> usize {
        Self::clamp_cell((y - self.extent.min.y) / self.cell_h, self.side)
    }

    fn clamp_cell(v: Real, side: usize) -> usize {
        if v <= 0.0 {
            0
        } else {
            (v.floor() as usize).min(side - 1)
        }
    }
}
