use std::sync::{Arc, Weak};

use loam_world::{CHUNK_MASK, CHUNK_SHIFT, ChunkCoord};

use crate::chunk::Chunk;

/// Exclusive upper chunk bound of a window axis around world coordinate `w`.
///
/// The bound moves one chunk further once the observer is past the middle of
/// its chunk, so the window recentres halfway through a chunk rather than at
/// its edge.
#[inline]
pub fn anchor_max(w: i32, radius: i32) -> i32 {
    let mut max = (w >> CHUNK_SHIFT) + radius;
    if (w & CHUNK_MASK) > CHUNK_MASK / 2 {
        max += 1;
    }
    max
}

/// Position and size of a visible window, in chunks.
///
/// Covers `min.cx .. min.cx + extent` and `min.cz .. min.cz + extent`, and
/// `layers` chunks vertically from `min.cy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowShape {
    pub min: ChunkCoord,
    pub extent: i32,
    pub layers: i32,
}

impl WindowShape {
    /// Window for an observer at world position `(wx, wy, wz)`.
    ///
    /// Without a vertical radius the window is one layer of chunks at
    /// `cy = 0`.
    pub fn around(
        wx: i32,
        wy: i32,
        wz: i32,
        render_distance: i32,
        vertical_radius: Option<i32>,
    ) -> Self {
        let rd = render_distance.max(1);
        let extent = rd * 2;
        let (min_y, layers) = match vertical_radius {
            Some(vr) if vr > 0 => (anchor_max(wy, vr) - vr * 2, vr * 2),
            _ => (0, 1),
        };
        Self {
            min: ChunkCoord::new(anchor_max(wx, rd) - extent, min_y, anchor_max(wz, rd) - extent),
            extent,
            layers,
        }
    }

    pub const fn empty() -> Self {
        Self {
            min: ChunkCoord::new(0, 0, 0),
            extent: 0,
            layers: 0,
        }
    }

    #[inline]
    pub fn render_distance(&self) -> i32 {
        self.extent / 2
    }

    #[inline]
    pub fn volume(&self) -> usize {
        (self.extent.max(0) as usize).pow(2) * self.layers.max(0) as usize
    }

    /// Chunk at the window's centre column, on its lowest layer.
    #[inline]
    pub fn center(&self) -> ChunkCoord {
        self.min.offset(self.extent / 2, 0, self.extent / 2)
    }

    /// Slot of `coord`, `x`-major then `z` then `y`.
    pub fn slot(&self, coord: ChunkCoord) -> Option<usize> {
        let dx = coord.cx - self.min.cx;
        let dy = coord.cy - self.min.cy;
        let dz = coord.cz - self.min.cz;
        if !(0..self.extent).contains(&dx)
            || !(0..self.extent).contains(&dz)
            || !(0..self.layers).contains(&dy)
        {
            return None;
        }
        Some(((dx * self.extent + dz) * self.layers + dy) as usize)
    }

    #[inline]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.slot(coord).is_some()
    }

    /// Every coordinate of the window, in slot order.
    pub fn coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        let min = self.min;
        (0..self.extent).flat_map(move |dx| {
            (0..self.extent).flat_map(move |dz| {
                (0..self.layers).map(move |dy| min.offset(dx, dy, dz))
            })
        })
    }
}

/// A published window: one weak slot per coordinate of its shape.
///
/// Windows are immutable once built; a seek builds a new one and swaps it in,
/// so readers never observe a half-rebuilt window.
pub struct VisibleWindow {
    shape: WindowShape,
    slots: Vec<Weak<Chunk>>,
}

impl VisibleWindow {
    pub fn empty() -> Self {
        Self {
            shape: WindowShape::empty(),
            slots: Vec::new(),
        }
    }

    /// `slots` must follow `shape.coords()` order.
    pub(crate) fn new(shape: WindowShape, slots: Vec<Weak<Chunk>>) -> Self {
        debug_assert_eq!(slots.len(), shape.volume());
        Self { shape, slots }
    }

    #[inline]
    pub fn shape(&self) -> WindowShape {
        self.shape
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Chunk occupying `coord`, if it is in the window and still alive.
    pub fn get(&self, coord: ChunkCoord) -> Option<Arc<Chunk>> {
        let chunk = self.slots.get(self.shape.slot(coord)?)?.upgrade()?;
        (chunk.coord() == coord).then_some(chunk)
    }

    /// Live chunks in slot order.
    pub fn chunks(&self) -> Vec<Arc<Chunk>> {
        self.slots.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Default for VisibleWindow {
    fn default() -> Self {
        Self::empty()
    }
}
