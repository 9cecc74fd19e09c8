//! Grid sizing and position assignment.

use rayon::prelude::*;
use tracing::debug;

use crate::config::{SomConfig, ViewMode};
use crate::error::Result;
use crate::item::{Item, Position};
use crate::som::{GridShape, SomMap};

/// Picks the grid shape for `items` vectors.
///
/// Explicit sides in `config` win; `depth` only applies in 3D. Otherwise 2D grids get a side of
/// `ceil(sqrt(n))` capped at `max_side`, 3D grids `ceil(cbrt(n))` capped
/// at `max_side_3d`.
pub fn grid_shape_for(items: usize, mode: ViewMode, config: &SomConfig) -> Result<GridShape> {
    let n = items.max(1) as f64;
    let (auto_side, auto_depth) = match mode {
        ViewMode::TwoD => ((n.sqrt().ceil() as usize).clamp(1, config.max_side), 1),
        ViewMode::ThreeD => {
            let side = (n.cbrt().ceil() as usize).clamp(1, config.max_side_3d);
            (side, side)
        }
    };

    let width = config.width.unwrap_or(auto_side);
    let height = config.height.unwrap_or(auto_side);
    match mode {
        ViewMode::TwoD => GridShape::flat(width, height),
        ViewMode::ThreeD => GridShape::new(width, height, config.depth.unwrap_or(auto_depth)),
    }
}

/// Writes each item's BMU onto `item.position`, as a 3D position in
/// `ThreeD` mode even when the grid is a single layer.
///
/// Fails without touching any item if a feature vector does not match
/// the map dimension.
pub fn assign_positions(map: &SomMap, mode: ViewMode, items: &mut [Item]) -> Result<()> {
    let positions = items
        .par_iter()
        .map(|item| {
            map.bmu_coord(&item.features)
                .map(|coord| Position::on_grid(coord, mode))
        })
        .collect::<Result<Vec<_>>>()?;

    for (item, pos) in items.iter_mut().zip(positions) {
        item.position = Some(pos);
    }
    debug!("Assigned positions to {} items", items.len());
    Ok(())
}
