//! Self-Organizing Map: training, background task and position assignment.

mod map;
pub mod assign;
pub mod task;
pub mod trainer;

pub use assign::{assign_positions, grid_shape_for};
pub use map::{GridCoord, GridShape, SomMap};
pub use task::{spawn_training, TrainingEvent, TrainingHandle};
pub use trainer::{SomTrainer, TrainingProgress, TrainingReport};
