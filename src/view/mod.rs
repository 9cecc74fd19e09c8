//! Viewport engine: projection, culling, texture caching, painting and
//! pointer interaction over a positioned item set.

pub mod camera;
pub mod cull;
pub mod interaction;
pub mod render;
pub mod scene;
pub mod texture_cache;

pub use camera::{Camera, ScreenRect, Viewport};
pub use interaction::{Dispatcher, InteractionHandler, PointerEvent};
pub use render::{FrameInput, FrameScheduler, FrameStats, Renderer, Rgba, Surface};
pub use scene::Scene;
pub use texture_cache::{TextureCache, TextureDecoder};
