//! Gallery items, feature files and layout files
//!
//! A feature file is a JSON object keyed by item identity:
//!
//! ```json
//! { "photos/cat.jpg": { "features": [0.1, 0.7], "keywords": ["cat"], "thumbnail": "thumbs/cat.png" } }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::ViewMode;
use crate::error::SomError;
use crate::som::{GridCoord, GridShape};

/// Grid position assigned to an item, tagged by projection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Position {
    #[serde(rename = "2d")]
    TwoD { x: usize, y: usize },
    #[serde(rename = "3d")]
    ThreeD { x: usize, y: usize, z: usize },
}

impl Position {
    /// Position for `coord` in `mode`; 2D drops `z`
    pub fn on_grid(coord: GridCoord, mode: ViewMode) -> Self {
        match mode {
            ViewMode::TwoD => Position::TwoD { x: coord.x, y: coord.y },
            ViewMode::ThreeD => Position::ThreeD { x: coord.x, y: coord.y, z: coord.z },
        }
    }

    pub fn coord(&self) -> GridCoord {
        match *self {
            Position::TwoD { x, y } => GridCoord { x, y, z: 0 },
            Position::ThreeD { x, y, z } => GridCoord { x, y, z },
        }
    }
}

/// An image or video reference placed on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    /// Locator of the thumbnail (path or URL)
    pub thumbnail: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing)]
    pub features: Vec<f64>,
    #[serde(default)]
    pub position: Option<Position>,
}

/// One entry of a feature file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub features: Vec<f64>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Defaults to the item identity
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Trained layout written by `train` and read by `view`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutFile {
    pub generated: String,
    pub shape: GridShape,
    /// Older layouts without it open in 2D
    #[serde(default)]
    pub mode: ViewMode,
    pub quantization_error: f64,
    pub items: Vec<Item>,
}

impl Item {
    pub fn from_record(id: String, record: FeatureRecord) -> Self {
        Self {
            thumbnail: record.thumbnail.unwrap_or_else(|| id.clone()),
            id,
            keywords: record.keywords,
            features: record.features,
            position: None,
        }
    }
}

/// Load a feature file, ordered by identity
pub fn load_features<P: AsRef<Path>>(path: P) -> Result<Vec<Item>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading features {}", path.display()))?;
    let records: BTreeMap<String, FeatureRecord> = serde_json::from_str(&content)
        .with_context(|| format!("parsing features {}", path.display()))?;

    tracing::info!("Loaded {} feature records from {:?}", records.len(), path);
    Ok(records
        .into_iter()
        .map(|(id, record)| Item::from_record(id, record))
        .collect())
}

/// Common feature dimension of `items`; `Ok(None)` for an empty set
pub fn feature_dim(items: &[Item]) -> std::result::Result<Option<usize>, SomError> {
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let dim = first.features.len();
    for item in items {
        if item.features.len() != dim {
            return Err(SomError::DimensionMismatch {
                expected: dim,
                got: item.features.len(),
            });
        }
    }
    Ok(Some(dim))
}

impl LayoutFile {
    pub fn new(shape: GridShape, mode: ViewMode, quantization_error: f64, items: Vec<Item>) -> Self {
        Self {
            generated: chrono::Local::now().to_rfc3339(),
            shape,
            mode,
            quantization_error,
            items,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading layout {}", path.display()))?;
        let layout: LayoutFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing layout {}", path.display()))?;
        Ok(layout)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing layout {}", path.display()))?;
        tracing::info!("Wrote layout with {} items to {:?}", self.items.len(), path);
        Ok(())
    }

    /// Items per occupied cell
    pub fn occupancy(&self) -> BTreeMap<(usize, usize, usize), usize> {
        let mut cells = BTreeMap::new();
        for item in &self.items {
            if let Some(pos) = item.position {
                let c = pos.coord();
                *cells.entry((c.x, c.y, c.z)).or_insert(0) += 1;
            }
        }
        cells
    }
}

/// Keyword frequencies, most frequent first, ties by name
pub fn keyword_counts(items: &[Item]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        for kw in &item.keywords {
            *counts.entry(kw.as_str()).or_insert(0) += 1;
        }
    }
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, n)| (k.to_string(), n))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}
