//! Configuration loader - YAML settings + .env environment

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Projection mode shared by the map shape, the camera and the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ViewMode {
    #[default]
    #[serde(rename = "2d")]
    #[value(name = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    #[value(name = "3d")]
    ThreeD,
}

/// Main configuration loaded from gallery.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub som: SomConfig,
    pub view: ViewConfig,
    pub cache: CacheConfig,
}

/// Map size and training schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SomConfig {
    /// Fixed grid sides; `None` sizes the grid from the item count
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub depth: Option<usize>,
    /// Upper bound for auto-sized 2D grids
    pub max_side: usize,
    /// Upper bound for each side of auto-sized 3D grids
    pub max_side_3d: usize,
    /// Fixed iteration budget; `None` means `iterations_per_item * items`
    pub iterations: Option<usize>,
    pub iterations_per_item: usize,
    pub learning_rate: f64,
    /// Iterations between progress messages
    pub progress_interval: usize,
    pub seed: Option<u64>,
}

impl Default for SomConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            depth: None,
            max_side: 20,
            max_side_3d: 8,
            iterations: None,
            iterations_per_item: 5,
            learning_rate: 0.5,
            progress_interval: 20,
            seed: None,
        }
    }
}

impl SomConfig {
    /// Iteration budget for a training set of `items` vectors
    pub fn iterations_for(&self, items: usize) -> usize {
        self.iterations
            .unwrap_or_else(|| items.saturating_mul(self.iterations_per_item))
    }
}

/// Projection, culling and fade constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub mode: ViewMode,
    /// World distance between neighbouring grid cells
    pub cell_size: f32,
    /// Item edge length in world units
    pub item_size: f32,
    /// Max jitter as a fraction of `cell_size`
    pub jitter: f32,
    /// Extra pixels around the viewport that still count as visible
    pub cull_margin: f32,
    pub fov: f32,
    /// Initial Z offset of the 3D camera
    pub camera_distance: f32,
    /// Items at or below this depth are dropped (in front of the camera plane)
    pub depth_near: f32,
    /// Opacity starts fading below this depth, reaching 0 at `depth_near`
    pub fade_near: f32,
    /// Brightness starts fading above this depth
    pub fog_start: f32,
    /// Brightness reaches `min_brightness` at this depth
    pub fog_end: f32,
    /// Items at or beyond this depth are dropped
    pub depth_far: f32,
    pub min_brightness: f32,
    /// Dot grid spacing in world units (2D only)
    pub dot_spacing: f32,
    /// Dot grid is skipped when its on-screen spacing drops below this
    pub min_dot_spacing: f32,
    pub hover_scale: f32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: ViewMode::TwoD,
            cell_size: 120.0,
            item_size: 100.0,
            jitter: 0.25,
            cull_margin: 100.0,
            fov: 1000.0,
            camera_distance: 1500.0,
            depth_near: -900.0,
            fade_near: -500.0,
            fog_start: 1500.0,
            fog_end: 5000.0,
            depth_far: 8000.0,
            min_brightness: 0.1,
            dot_spacing: 40.0,
            min_dot_spacing: 8.0,
            hover_scale: 1.15,
        }
    }
}

/// Texture cache bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Decoded thumbnails are downscaled to fit this square
    pub thumbnail_side: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            thumbnail_side: 256,
        }
    }
}

/// Environment loaded from .env
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub log_dir: String,
    pub data_dir: String,
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the projector and trainer cannot work with
    pub fn validate(&self) -> Result<()> {
        for (name, side) in [
            ("width", self.som.width),
            ("height", self.som.height),
            ("depth", self.som.depth),
        ] {
            if side == Some(0) {
                anyhow::bail!("som.{} must be at least 1", name);
            }
        }
        if self.som.max_side == 0 || self.som.max_side_3d == 0 {
            anyhow::bail!("som.max_side and som.max_side_3d must be at least 1");
        }
        if self.som.progress_interval == 0 {
            anyhow::bail!("som.progress_interval must be at least 1");
        }

        let v = &self.view;
        if v.fov <= 0.0 {
            anyhow::bail!("view.fov must be positive, got {}", v.fov);
        }
        if v.depth_near <= -v.fov {
            anyhow::bail!(
                "view.depth_near ({}) must lie in front of the camera plane (> {})",
                v.depth_near,
                -v.fov
            );
        }
        if !(v.depth_near < v.fade_near && v.fade_near <= v.fog_start && v.fog_start < v.fog_end)
        {
            anyhow::bail!("view depth thresholds must satisfy depth_near < fade_near <= fog_start < fog_end");
        }
        if v.fog_end > v.depth_far {
            anyhow::bail!("view.fog_end must not exceed view.depth_far");
        }
        if !(0.0..=1.0).contains(&v.min_brightness) {
            anyhow::bail!("view.min_brightness must be within [0, 1]");
        }
        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be at least 1");
        }
        Ok(())
    }
}

impl Environment {
    /// Load environment from .env file
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Environment {
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        }
    }
}
