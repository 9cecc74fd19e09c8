//! World layout: grid positions to world coordinates
//!
//! Items sharing a cell are spread by a small deterministic jitter derived
//! from their identity, so the same layout always renders the same way.

use tracing::debug;

use crate::config::ViewConfig;
use crate::item::{Item, Position};
use crate::som::GridShape;

/// Positioned items with their world coordinates, ready for projection
pub struct Scene {
    pub items: Vec<Item>,
    pub world: Vec<[f32; 3]>,
    /// Item edge length in world units
    pub item_size: f32,
}

impl Scene {
    /// Builds a scene from items that have positions; the rest are skipped
    pub fn new(items: Vec<Item>, shape: GridShape, config: &ViewConfig) -> Self {
        let total = items.len();
        let items: Vec<Item> = items.into_iter().filter(|i| i.position.is_some()).collect();
        if items.len() < total {
            debug!("Scene skipped {} items without a position", total - items.len());
        }

        let world = items
            .iter()
            .filter_map(|item| item.position.map(|p| world_position(&item.id, p, &shape, config)))
            .collect();

        Self {
            items,
            world,
            item_size: config.item_size,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// World-space XY bounds including item extents, for fitting a 2D camera
    pub fn bounds_2d(&self) -> Option<([f32; 2], [f32; 2])> {
        let half = self.item_size * 0.5;
        self.world.iter().fold(None, |acc, p| {
            let (mut min, mut max) = acc.unwrap_or(([f32::INFINITY; 2], [f32::NEG_INFINITY; 2]));
            min[0] = min[0].min(p[0] - half);
            min[1] = min[1].min(p[1] - half);
            max[0] = max[0].max(p[0] + half);
            max[1] = max[1].max(p[1] + half);
            Some((min, max))
        })
    }

    /// Indices of items carrying `keyword`
    pub fn with_keyword(&self, keyword: &str) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.keywords.iter().any(|k| k == keyword))
            .map(|(i, _)| i)
            .collect()
    }
}

/// World coordinate of a grid position. 2D layouts start at the origin,
/// 3D layouts are centred on it so the camera orbits the middle of the cube.
pub fn world_position(id: &str, position: Position, shape: &GridShape, config: &ViewConfig) -> [f32; 3] {
    let cell = config.cell_size;
    let amount = config.jitter * cell;
    let jx = jitter(id, 1) * amount;
    let jy = jitter(id, 2) * amount;

    match position {
        Position::TwoD { x, y } => [x as f32 * cell + jx, y as f32 * cell + jy, 0.0],
        Position::ThreeD { x, y, z } => {
            let centre = |i: usize, side: usize| (i as f32 - (side as f32 - 1.0) * 0.5) * cell;
            let jz = jitter(id, 3) * amount;
            [
                centre(x, shape.width) + jx,
                centre(y, shape.height) + jy,
                centre(z, shape.depth) + jz,
            ]
        }
    }
}

/// Deterministic value in [-1, 1] for (id, salt)
fn jitter(id: &str, salt: u32) -> f32 {
    let hash = id
        .bytes()
        .fold(salt.wrapping_mul(0x9e37_79b9), |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    // Final avalanche so neighbouring ids spread out
    let mut h = hash ^ (hash >> 16);
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    (h % 20_001) as f32 / 10_000.0 - 1.0
}
