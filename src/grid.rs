use std::ops::{Index, IndexMut};
use tumor_sim_common::{Boundary, Stencil};

/// A lattice site, addressed as `(row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub const fn new(row: usize, col: usize) -> Self {
        Coord { row, col }
    }
}

/// Dense square layer stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    size: usize,
    cells: Vec<T>,
}

impl<T: Copy> Grid<T> {
    pub fn filled(size: usize, value: T) -> Self {
        Grid {
            size,
            cells: vec![value; size * size],
        }
    }

    pub fn fill(&mut self, value: T) {
        self.cells.fill(value);
    }

    #[inline(always)]
    pub fn get(&self, c: Coord) -> T {
        self.cells[self.index_of(c)]
    }

    #[inline(always)]
    pub fn set(&mut self, c: Coord, value: T) {
        let idx = self.index_of(c);
        self.cells[idx] = value;
    }
}

impl<T> Grid<T> {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Flat index of `c`. Coordinates outside the lattice are a caller bug.
    #[inline(always)]
    pub fn index_of(&self, c: Coord) -> usize {
        debug_assert!(
            c.row < self.size && c.col < self.size,
            "({}, {}) outside {}x{} lattice",
            c.row,
            c.col,
            self.size,
            self.size
        );
        c.row * self.size + c.col
    }

    #[inline(always)]
    pub fn coord_of(&self, idx: usize) -> Coord {
        Coord::new(idx / self.size, idx % self.size)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// All coordinates in raster order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> {
        let size = self.size;
        (0..size * size).map(move |idx| Coord::new(idx / size, idx % size))
    }
}

impl<T> Index<Coord> for Grid<T> {
    type Output = T;
    #[inline(always)]
    fn index(&self, c: Coord) -> &T {
        &self.cells[self.index_of(c)]
    }
}

impl<T> IndexMut<Coord> for Grid<T> {
    #[inline(always)]
    fn index_mut(&mut self, c: Coord) -> &mut T {
        let idx = self.index_of(c);
        &mut self.cells[idx]
    }
}

/// One stencil entry: a row/column step and its Laplacian weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilOffset {
    pub dr: isize,
    pub dc: isize,
    pub weight: f32,
}

const fn offset(dr: isize, dc: isize, weight: f32) -> StencilOffset {
    StencilOffset { dr, dc, weight }
}

const ORTHO: f32 = 2.0 / 3.0;
const DIAG: f32 = 1.0 / 6.0;

const VON_NEUMANN: [StencilOffset; 4] = [
    offset(-1, 0, 1.0),
    offset(0, -1, 1.0),
    offset(0, 1, 1.0),
    offset(1, 0, 1.0),
];

const MOORE: [StencilOffset; 8] = [
    offset(-1, -1, DIAG),
    offset(-1, 0, ORTHO),
    offset(-1, 1, DIAG),
    offset(0, -1, ORTHO),
    offset(0, 1, ORTHO),
    offset(1, -1, DIAG),
    offset(1, 0, ORTHO),
    offset(1, 1, DIAG),
];

// Hexagonal lattice in "odd-r" layout: odd rows sit half a site to the right.
const HEX_EVEN_ROW: [StencilOffset; 6] = [
    offset(0, -1, ORTHO),
    offset(0, 1, ORTHO),
    offset(-1, -1, ORTHO),
    offset(-1, 0, ORTHO),
    offset(1, -1, ORTHO),
    offset(1, 0, ORTHO),
];

const HEX_ODD_ROW: [StencilOffset; 6] = [
    offset(0, -1, ORTHO),
    offset(0, 1, ORTHO),
    offset(-1, 0, ORTHO),
    offset(-1, 1, ORTHO),
    offset(1, 0, ORTHO),
    offset(1, 1, ORTHO),
];

/// Bounds-safe neighbour lookup for a given stencil and boundary policy.
///
/// With `Periodic` boundaries columns wrap around while rows are clamped (the
/// first and last rows are where vessels usually sit). With `Reflective`
/// boundaries nothing wraps. Either way only in-range coordinates are ever
/// produced, and missing neighbours contribute zero flux to the Laplacian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighborhood {
    size: usize,
    stencil: Stencil,
    boundary: Boundary,
}

impl Neighborhood {
    pub fn new(size: usize, stencil: Stencil, boundary: Boundary) -> Self {
        Neighborhood {
            size,
            stencil,
            boundary,
        }
    }

    /// Same lattice and boundary, different stencil.
    pub fn with_stencil(&self, stencil: Stencil) -> Self {
        Neighborhood { stencil, ..*self }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stencil(&self) -> Stencil {
        self.stencil
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    #[inline(always)]
    pub fn offsets(&self, row: usize) -> &'static [StencilOffset] {
        match self.stencil {
            Stencil::Four => &VON_NEUMANN,
            Stencil::Eight => &MOORE,
            Stencil::Six if row % 2 == 0 => &HEX_EVEN_ROW,
            Stencil::Six => &HEX_ODD_ROW,
        }
    }

    /// Resolves the site `(dr, dc)` away from `c`, or `None` when that falls
    /// off a non-wrapping edge.
    #[inline(always)]
    pub fn step(&self, c: Coord, dr: isize, dc: isize) -> Option<Coord> {
        let n = self.size as isize;
        let row = c.row as isize + dr;
        if row < 0 || row >= n {
            return None;
        }
        let col = c.col as isize + dc;
        let col = match self.boundary {
            Boundary::Periodic => col.rem_euclid(n),
            Boundary::Reflective if col < 0 || col >= n => return None,
            Boundary::Reflective => col,
        };
        Some(Coord::new(row as usize, col as usize))
    }

    /// Neighbours of `c` with their Laplacian weights.
    pub fn neighbors(&self, c: Coord) -> Neighbors {
        Neighbors {
            hood: *self,
            origin: c,
            offsets: self.offsets(c.row),
            next: 0,
        }
    }

    #[inline(always)]
    pub fn for_each_neighbor<F>(&self, c: Coord, mut f: F)
    where
        F: FnMut(Coord, f32),
    {
        for o in self.offsets(c.row) {
            if let Some(n) = self.step(c, o.dr, o.dc) {
                f(n, o.weight);
            }
        }
    }

    /// Clears `out` and fills it with the neighbours of `c` accepted by `keep`.
    pub fn collect_where<F>(&self, c: Coord, out: &mut Vec<Coord>, mut keep: F)
    where
        F: FnMut(Coord) -> bool,
    {
        out.clear();
        self.for_each_neighbor(c, |n, _| {
            if keep(n) {
                out.push(n);
            }
        });
    }
}

/// Iterator over the in-range neighbours of one site.
#[derive(Debug, Clone)]
pub struct Neighbors {
    hood: Neighborhood,
    origin: Coord,
    offsets: &'static [StencilOffset],
    next: usize,
}

impl Iterator for Neighbors {
    type Item = (Coord, f32);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(o) = self.offsets.get(self.next) {
            self.next += 1;
            if let Some(n) = self.hood.step(self.origin, o.dr, o.dc) {
                return Some((n, o.weight));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const ALL_STENCILS: [Stencil; 3] = [Stencil::Four, Stencil::Six, Stencil::Eight];
    const ALL_BOUNDARIES: [Boundary; 2] = [Boundary::Periodic, Boundary::Reflective];

    #[test]
    fn interior_sites_see_the_full_stencil() {
        for stencil in ALL_STENCILS {
            for row in [3, 4] {
                let hood = Neighborhood::new(9, stencil, Boundary::Reflective);
                let c = Coord::new(row, 4);
                let weights: Vec<f32> = hood.neighbors(c).map(|(_, w)| w).collect();
                assert_eq!(weights.len(), stencil.neighbor_count());
                assert_abs_diff_eq!(weights.iter().sum::<f32>(), stencil.laplacian_weight_sum(), epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn reflective_corner_drops_missing_neighbours() {
        let hood = Neighborhood::new(5, Stencil::Eight, Boundary::Reflective);
        assert_eq!(hood.neighbors(Coord::new(0, 0)).count(), 3);
        let hood = Neighborhood::new(5, Stencil::Four, Boundary::Reflective);
        assert_eq!(hood.neighbors(Coord::new(4, 4)).count(), 2);
    }

    #[test]
    fn periodic_wraps_columns_but_not_rows() {
        let hood = Neighborhood::new(5, Stencil::Eight, Boundary::Periodic);
        let around: Vec<Coord> = hood.neighbors(Coord::new(0, 0)).map(|(c, _)| c).collect();
        assert_eq!(around.len(), 5);
        assert!(around.contains(&Coord::new(0, 4)));
        assert!(around.contains(&Coord::new(1, 4)));
        assert!(around.iter().all(|c| c.row <= 1));
        assert_eq!(hood.step(Coord::new(4, 2), 1, 0), None);
        assert_eq!(hood.step(Coord::new(2, 4), 0, 1), Some(Coord::new(2, 0)));
    }

    #[test]
    fn neighbour_relation_is_symmetric() {
        for stencil in ALL_STENCILS {
            for boundary in ALL_BOUNDARIES {
                let hood = Neighborhood::new(6, stencil, boundary);
                let grid = Grid::filled(6, 0u8);
                for a in grid.coords() {
                    for (b, w) in hood.neighbors(a) {
                        assert_ne!(a, b);
                        let back = hood.neighbors(b).find(|(c, _)| *c == a);
                        assert!(back.is_some(), "{:?}: {:?} -> {:?} has no way back", stencil, a, b);
                        assert_abs_diff_eq!(back.map(|(_, bw)| bw).unwrap_or(-1.0), w);
                    }
                }
            }
        }
    }

    #[test]
    fn iterator_and_closure_agree() {
        let hood = Neighborhood::new(7, Stencil::Six, Boundary::Periodic);
        let c = Coord::new(3, 0);
        let mut seen = Vec::new();
        hood.for_each_neighbor(c, |n, _| seen.push(n));
        let iterated: Vec<Coord> = hood.neighbors(c).map(|(n, _)| n).collect();
        assert_eq!(seen, iterated);

        let mut kept = vec![Coord::new(0, 0)];
        hood.collect_where(c, &mut kept, |n| n.row == 3);
        assert_eq!(kept, vec![Coord::new(3, 6), Coord::new(3, 1)]);
    }

    #[test]
    fn grid_indexing_is_row_major() {
        let mut grid = Grid::filled(4, 0u32);
        grid.set(Coord::new(2, 1), 7);
        grid[Coord::new(3, 3)] += 2;
        assert_eq!(grid.as_slice()[9], 7);
        assert_eq!(grid.get(Coord::new(3, 3)), 2);
        assert_eq!(grid.coord_of(9), Coord::new(2, 1));
        assert_eq!(grid.coords().nth(5), Some(Coord::new(1, 1)));
        assert_eq!(grid.len(), 16);
        assert!(!grid.is_empty());
    }
}
