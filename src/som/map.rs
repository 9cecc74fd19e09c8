//! Self-organizing map grid.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SomError};

/// Integer cell coordinate on the map grid. `z` is 0 for flat maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl GridCoord {
    /// Squared Euclidean distance in grid cells.
    #[inline]
    pub fn distance_squared(&self, other: &GridCoord) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        let dz = self.z as f64 - other.z as f64;
        dx * dx + dy * dy + dz * dz
    }
}

/// Grid extent. A depth of 1 is a flat (2D) map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridShape {
    pub fn new(width: usize, height: usize, depth: usize) -> Result<Self> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(SomError::InvalidShape { width, height, depth });
        }
        Ok(Self { width, height, depth })
    }

    pub fn flat(width: usize, height: usize) -> Result<Self> {
        Self::new(width, height, 1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Largest side, the basis of the initial neighbourhood radius.
    pub fn max_side(&self) -> usize {
        self.width.max(self.height).max(self.depth)
    }

    /// Scan order is x fastest, then y, then z.
    #[inline]
    pub fn coord_of(&self, index: usize) -> GridCoord {
        let plane = self.width * self.height;
        GridCoord {
            x: index % self.width,
            y: (index % plane) / self.width,
            z: index / plane,
        }
    }

    #[cfg(test)]
    pub fn index_of(&self, coord: GridCoord) -> usize {
        (coord.z * self.height + coord.y) * self.width + coord.x
    }
}

/// One cell of the map: its grid position and reference vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapUnit {
    pub coord: GridCoord,
    pub weights: Vec<f64>,
}

impl MapUnit {
    #[inline]
    pub fn distance_squared(&self, input: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(input.iter())
            .map(|(w, i)| (w - i) * (w - i))
            .sum()
    }

    /// Moves the weights towards `input` by `rate`.
    #[inline]
    pub fn pull_towards(&mut self, input: &[f64], rate: f64) {
        for (w, i) in self.weights.iter_mut().zip(input.iter()) {
            *w += rate * (i - *w);
        }
    }
}

/// Dense grid of units, allocated once and trained in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SomMap {
    pub shape: GridShape,
    /// Dimension of every unit's weight vector.
    pub dim: usize,
    /// Units in scan order (see [`GridShape::coord_of`]).
    pub units: Vec<MapUnit>,
}

impl SomMap {
    /// Creates a map with weights drawn uniformly from [0, 1).
    pub fn random<R: Rng>(shape: GridShape, dim: usize, rng: &mut R) -> Self {
        let units = (0..shape.len())
            .map(|i| MapUnit {
                coord: shape.coord_of(i),
                weights: (0..dim).map(|_| rng.gen::<f64>()).collect(),
            })
            .collect();

        Self { shape, dim, units }
    }

    /// Creates a map from explicit weights, given in scan order.
    #[cfg(test)]
    pub fn from_weights(shape: GridShape, weights: Vec<Vec<f64>>) -> Result<Self> {
        if weights.len() != shape.len() {
            return Err(SomError::InvalidShape {
                width: shape.width,
                height: shape.height,
                depth: shape.depth,
            });
        }
        let dim = weights.first().map(Vec::len).ok_or(SomError::EmptyMap)?;
        let units = weights
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                if w.len() != dim {
                    return Err(SomError::DimensionMismatch { expected: dim, got: w.len() });
                }
                Ok(MapUnit { coord: shape.coord_of(i), weights: w })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { shape, dim, units })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn check_dim(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.dim {
            return Err(SomError::DimensionMismatch {
                expected: self.dim,
                got: input.len(),
            });
        }
        Ok(())
    }

    /// Index of the Best Matching Unit for `input`.
    ///
    /// Full linear scan in grid order; on equal distance the first unit wins.
    pub fn find_bmu(&self, input: &[f64]) -> Result<usize> {
        self.check_dim(input)?;
        self.nearest_unit(input)
            .map(|(idx, _)| idx)
            .ok_or(SomError::EmptyMap)
    }

    /// Grid coordinate of the Best Matching Unit for `input`.
    pub fn bmu_coord(&self, input: &[f64]) -> Result<GridCoord> {
        let idx = self.find_bmu(input)?;
        Ok(self.units[idx].coord)
    }

    /// Unchecked nearest-unit scan returning (index, squared distance).
    pub(crate) fn nearest_unit(&self, input: &[f64]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, unit) in self.units.iter().enumerate() {
            let d = unit.distance_squared(input);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((idx, d)),
            }
        }
        best
    }

    /// Applies one competitive-learning step around `bmu_idx`.
    ///
    /// Units strictly inside `radius` (grid cells) move towards `input`
    /// by `learning_rate * exp(-d^2 / (2 r^2))`.
    pub fn update(&mut self, input: &[f64], bmu_idx: usize, learning_rate: f64, radius: f64) {
        let bmu = self.units[bmu_idx].coord;
        let radius_sq = radius * radius;

        for unit in &mut self.units {
            let dist_sq = unit.coord.distance_squared(&bmu);
            if dist_sq < radius_sq {
                let influence = (-dist_sq / (2.0 * radius_sq)).exp();
                unit.pull_towards(input, influence * learning_rate);
            }
        }
    }
}
