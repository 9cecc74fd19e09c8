//! Per-frame painting of the culled scene
//!
//! The renderer only talks to a [`Surface`]; the GUI supplies one backed by
//! the egui painter, tests supply one that records calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::config::ViewConfig;
use crate::view::camera::{Camera, Camera2D, Projector, ScreenRect, Viewport};
use crate::view::cull::cull;
use crate::view::scene::Scene;
use crate::view::texture_cache::{Prefetch, TextureCache};

/// Linear colour, components in 0..=1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);
    pub const BACKGROUND: Rgba = Rgba::new(0.07, 0.07, 0.08, 1.0);
    pub const DOT: Rgba = Rgba::new(0.25, 0.25, 0.28, 1.0);
    pub const PLACEHOLDER: Rgba = Rgba::new(0.2, 0.2, 0.22, 1.0);
    pub const BROKEN: Rgba = Rgba::new(0.35, 0.12, 0.12, 1.0);
    pub const HOVER: Rgba = Rgba::new(1.0, 0.85, 0.3, 1.0);
    pub const HIGHLIGHT: Rgba = Rgba::new(0.3, 0.7, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Darkens by `brightness` and multiplies alpha by `opacity`
    pub fn modulate(self, brightness: f32, opacity: f32) -> Self {
        Self {
            r: self.r * brightness,
            g: self.g * brightness,
            b: self.b * brightness,
            a: self.a * opacity,
        }
    }
}

/// The drawing operations a frame needs
pub trait Surface {
    type Texture;

    fn clear(&mut self, color: Rgba);
    fn fill_rect(&mut self, rect: ScreenRect, color: Rgba);
    fn stroke_rect(&mut self, rect: ScreenRect, width: f32, color: Rgba);
    /// Draws `texture` scaled into `rect`, multiplied by `tint`
    fn draw_texture(&mut self, texture: &Self::Texture, rect: ScreenRect, tint: Rgba) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    Pending,
    Stopped,
}

struct SchedulerInner {
    state: Mutex<FrameState>,
    waker: Box<dyn Fn() + Send + Sync>,
}

/// Redraw requests from any thread, coalesced until the next frame.
///
/// Once `stop` returns the waker is never called again; decodes still in
/// flight may finish but will not bring the loop back.
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
}

impl FrameScheduler {
    /// `waker` runs under the scheduler lock and must not call back into it
    pub fn new<W: Fn() + Send + Sync + 'static>(waker: W) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(FrameState::Idle),
                waker: Box::new(waker),
            }),
        }
    }

    /// Asks for another frame. Returns false if the loop has stopped.
    pub fn request_redraw(&self) -> bool {
        let mut state = lock(&self.inner.state);
        match *state {
            FrameState::Stopped => false,
            FrameState::Pending => true,
            FrameState::Idle => {
                *state = FrameState::Pending;
                (self.inner.waker)();
                true
            }
        }
    }

    /// Clears and returns the pending flag; called at the start of a frame
    pub fn take_pending(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if *state == FrameState::Pending {
            *state = FrameState::Idle;
            true
        } else {
            false
        }
    }

    pub fn stop(&self) {
        *lock(&self.inner.state) = FrameState::Stopped;
    }
}

/// What a frame shows, captured before painting starts
pub struct FrameInput<'a> {
    pub scene: &'a Scene,
    pub camera: Camera,
    pub viewport: Viewport,
    /// Scene index of the hovered item
    pub hovered: Option<usize>,
    /// Items with this keyword get an outline
    pub highlight: Option<&'a str>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub visible: usize,
    pub drawn: usize,
    pub placeholders: usize,
    pub failed_draws: usize,
    /// Misses left without a decode because the cache had no room
    pub deferred: usize,
    pub dots: usize,
}

pub struct Renderer {
    projector: Projector,
    config: ViewConfig,
    /// Keys whose decode failed; they keep their placeholder until cleared
    failed: Arc<Mutex<HashSet<String>>>,
}

impl Renderer {
    pub fn new(config: &ViewConfig) -> Self {
        Self {
            projector: Projector::new(config),
            config: config.clone(),
            failed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn failed_count(&self) -> usize {
        lock(&self.failed).len()
    }

    /// Forgets failed decodes so the next frames request them again
    pub fn clear_failed(&self) {
        lock(&self.failed).clear();
    }

    /// Paints one frame. Never blocks on the cache: misses get a placeholder
    /// and a background decode that asks `scheduler` for a redraw when done.
    pub fn paint<S>(
        &self,
        surface: &mut S,
        frame: &FrameInput<'_>,
        cache: &TextureCache<S::Texture>,
        scheduler: &FrameScheduler,
    ) -> FrameStats
    where
        S: Surface,
        S::Texture: Clone + Send + Sync + 'static,
    {
        let mut stats = FrameStats::default();
        surface.clear(Rgba::BACKGROUND);

        if let Camera::TwoD(cam) = &frame.camera {
            for (x, y) in dot_grid(cam, frame.viewport, self.config.dot_spacing, self.config.min_dot_spacing) {
                surface.fill_rect(ScreenRect::centered(x, y, 2.0), Rgba::DOT);
                stats.dots += 1;
            }
        }

        let visible = cull(
            frame.scene,
            &frame.camera,
            frame.viewport,
            &self.projector,
            self.config.cull_margin,
        );
        stats.visible = visible.len();

        let textures: Vec<Option<S::Texture>> = visible.iter().map(|v| cache.get(&v.item.id)).collect();
        let cached = textures.iter().filter(|t| t.is_some()).count();
        // New decodes may only take room no visible entry holds; beyond
        // that each insertion evicts something this frame still draws
        let mut budget = cache.capacity().saturating_sub(cached + cache.pending_count());

        let highlighted: HashSet<usize> = frame
            .highlight
            .map(|keyword| frame.scene.with_keyword(keyword).into_iter().collect())
            .unwrap_or_default();

        for (v, texture) in visible.iter().zip(textures) {
            let hovered = frame.hovered == Some(v.index);
            let rect = v.rect(if hovered { self.config.hover_scale } else { 1.0 });
            let key = v.item.id.as_str();

            match texture {
                Some(texture) => {
                    let tint = Rgba::WHITE.modulate(v.brightness, v.opacity);
                    match surface.draw_texture(&texture, rect, tint) {
                        Ok(()) => stats.drawn += 1,
                        Err(e) => {
                            warn!("Failed to draw {}: {:#}", key, e);
                            surface.fill_rect(rect, Rgba::BROKEN.modulate(v.brightness, v.opacity));
                            stats.failed_draws += 1;
                        }
                    }
                }
                None => {
                    let broken = lock(&self.failed).contains(key);
                    let color = if broken { Rgba::BROKEN } else { Rgba::PLACEHOLDER };
                    surface.fill_rect(rect, color.modulate(v.brightness, v.opacity));
                    stats.placeholders += 1;
                    if broken {
                        // stays a placeholder until clear_failed
                    } else if budget == 0 {
                        stats.deferred += 1;
                    } else if self.request_texture(cache, key, &v.item.thumbnail, scheduler) == Prefetch::Started {
                        budget -= 1;
                    }
                }
            }

            if hovered {
                surface.stroke_rect(rect, 3.0, Rgba::HOVER.modulate(1.0, v.opacity));
            } else if highlighted.contains(&v.index) {
                surface.stroke_rect(rect, 2.0, Rgba::HIGHLIGHT.modulate(1.0, v.opacity));
            }
        }

        if stats.deferred > 0 {
            debug!("{} visible thumbnails deferred, cache holds {}", stats.deferred, cache.capacity());
        }
        stats
    }

    fn request_texture<T>(
        &self,
        cache: &TextureCache<T>,
        key: &str,
        locator: &str,
        scheduler: &FrameScheduler,
    ) -> Prefetch
    where
        T: Clone + Send + Sync + 'static,
    {
        let scheduler = scheduler.clone();
        let failed = Arc::clone(&self.failed);
        let owned_key = key.to_string();
        cache.prefetch(key, locator, move |result| {
            if let Err(e) = result {
                debug!("Keeping placeholder for {}: {}", owned_key, e);
                lock(&failed).insert(owned_key);
            }
            scheduler.request_redraw();
        })
    }
}

/// Screen positions of the 2D background dots, empty when they would be
/// closer together than `min_spacing` pixels
pub fn dot_grid(camera: &Camera2D, viewport: Viewport, spacing: f32, min_spacing: f32) -> Vec<(f32, f32)> {
    let step = spacing * camera.scale;
    if step.is_nan() || step < min_spacing || step <= 0.0 {
        return Vec::new();
    }

    let ox = camera.x.rem_euclid(step);
    let oy = camera.y.rem_euclid(step);
    let mut dots = Vec::new();
    let mut y = oy;
    while y <= viewport.height {
        let mut x = ox;
        while x <= viewport.width {
            dots.push((x, y));
            x += step;
        }
        y += step;
    }
    dots
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, Position};
    use crate::som::GridShape;
    use crate::view::texture_cache::TextureDecoder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tokio::runtime::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Clear,
        Fill(ScreenRect),
        Stroke(ScreenRect),
        Texture(String, ScreenRect),
    }

    #[derive(Default)]
    struct RecordingSurface {
        ops: Vec<Op>,
    }

    impl RecordingSurface {
        fn textures(&self) -> Vec<String> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Texture(t, _) => Some(t.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Surface for RecordingSurface {
        type Texture = String;

        fn clear(&mut self, _color: Rgba) {
            self.ops.push(Op::Clear);
        }

        fn fill_rect(&mut self, rect: ScreenRect, _color: Rgba) {
            self.ops.push(Op::Fill(rect));
        }

        fn stroke_rect(&mut self, rect: ScreenRect, _width: f32, _color: Rgba) {
            self.ops.push(Op::Stroke(rect));
        }

        fn draw_texture(&mut self, texture: &String, rect: ScreenRect, _tint: Rgba) -> anyhow::Result<()> {
            if texture.starts_with("corrupt") {
                anyhow::bail!("corrupt bitmap");
            }
            self.ops.push(Op::Texture(texture.clone(), rect));
            Ok(())
        }
    }

    /// The texture is the locator itself; locators starting with "bad" fail
    struct EchoDecoder;

    impl TextureDecoder<String> for EchoDecoder {
        fn decode(&self, locator: &str) -> anyhow::Result<String> {
            if locator.starts_with("bad") {
                anyhow::bail!("unreadable");
            }
            Ok(locator.to_string())
        }
    }

    fn config() -> ViewConfig {
        ViewConfig {
            jitter: 0.0,
            dot_spacing: 40.0,
            min_dot_spacing: 8.0,
            cull_margin: 0.0,
            ..Default::default()
        }
    }

    fn item(id: &str, thumbnail: &str, x: usize) -> Item {
        Item {
            id: id.to_string(),
            thumbnail: thumbnail.to_string(),
            keywords: vec![format!("kw-{}", id)],
            features: Vec::new(),
            position: Some(Position::TwoD { x, y: 0 }),
        }
    }

    fn scene(items: Vec<Item>) -> Scene {
        Scene::new(items, GridShape::flat(4, 1).unwrap(), &config())
    }

    fn counting_scheduler() -> (FrameScheduler, Arc<AtomicUsize>) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let scheduler = FrameScheduler::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (scheduler, wakes)
    }

    fn frame(scene: &Scene) -> FrameInput<'_> {
        FrameInput {
            scene,
            camera: Camera::TwoD(Camera2D { x: 100.0, y: 100.0, scale: 1.0 }),
            viewport: Viewport::new(800.0, 400.0),
            hovered: None,
            highlight: None,
        }
    }

    async fn settle(cache: &TextureCache<String>) {
        for _ in 0..200 {
            if cache.pending_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_scheduler_coalesces_until_taken() {
        let (scheduler, wakes) = counting_scheduler();
        assert!(scheduler.request_redraw());
        assert!(scheduler.request_redraw());
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert!(scheduler.take_pending());
        assert!(!scheduler.take_pending());
        scheduler.request_redraw();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scheduler_ignores_requests_after_stop() {
        let (scheduler, wakes) = counting_scheduler();
        scheduler.stop();
        assert!(!scheduler.request_redraw());
        assert!(!scheduler.take_pending());
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_wake_after_stop_returns() {
        let (scheduler, wakes) = counting_scheduler();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        scheduler.request_redraw();
                        scheduler.take_pending();
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(1));
        scheduler.stop();
        let at_stop = wakes.load(Ordering::SeqCst);
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(wakes.load(Ordering::SeqCst), at_stop);
        assert!(!scheduler.request_redraw());
    }

    #[test]
    fn test_dot_grid_follows_camera() {
        let vp = Viewport::new(100.0, 100.0);
        let dots = dot_grid(&Camera2D { x: 0.0, y: 0.0, scale: 1.0 }, vp, 40.0, 8.0);
        assert_eq!(dots.len(), 9);
        assert_eq!(dots[0], (0.0, 0.0));

        let shifted = dot_grid(&Camera2D { x: -30.0, y: 50.0, scale: 1.0 }, vp, 40.0, 8.0);
        assert_eq!(shifted[0], (10.0, 10.0));

        let zoomed = dot_grid(&Camera2D { x: 0.0, y: 0.0, scale: 2.0 }, vp, 40.0, 8.0);
        assert_eq!(zoomed.len(), 4);
    }

    #[test]
    fn test_dot_grid_skipped_when_too_dense() {
        let vp = Viewport::new(1000.0, 1000.0);
        assert!(dot_grid(&Camera2D { x: 0.0, y: 0.0, scale: 0.1 }, vp, 40.0, 8.0).is_empty());
        assert!(dot_grid(&Camera2D { x: 0.0, y: 0.0, scale: 0.0 }, vp, 40.0, 8.0).is_empty());
    }

    #[tokio::test]
    async fn test_miss_paints_placeholder_then_texture() {
        let scene = scene(vec![item("a", "thumb-a", 0), item("b", "thumb-b", 1)]);
        let cache = TextureCache::new(8, EchoDecoder, Handle::current());
        let (scheduler, wakes) = counting_scheduler();
        let renderer = Renderer::new(&config());

        let mut surface = RecordingSurface::default();
        let stats = renderer.paint(&mut surface, &frame(&scene), &cache, &scheduler);
        assert_eq!(surface.ops[0], Op::Clear);
        assert_eq!(stats.visible, 2);
        assert_eq!(stats.placeholders, 2);
        assert_eq!(stats.drawn, 0);
        assert!(stats.dots > 0);

        settle(&cache).await;
        for _ in 0..200 {
            if wakes.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        scheduler.take_pending();
        let mut surface = RecordingSurface::default();
        let stats = renderer.paint(&mut surface, &frame(&scene), &cache, &scheduler);
        assert_eq!(stats.drawn, 2);
        assert_eq!(stats.placeholders, 0);
        assert_eq!(surface.textures(), vec!["thumb-a", "thumb-b"]);
        assert_eq!(cache.stats().decodes, 2);
    }

    #[tokio::test]
    async fn test_more_visible_than_capacity_settles() {
        let scene = scene(vec![item("a", "thumb-a", 0), item("b", "thumb-b", 1), item("c", "thumb-c", 2)]);
        let cache = TextureCache::new(2, EchoDecoder, Handle::current());
        let (scheduler, _) = counting_scheduler();
        let renderer = Renderer::new(&config());

        let mut frames = 0;
        let mut last = FrameStats::default();
        while frames < 50 {
            frames += 1;
            last = renderer.paint(&mut RecordingSurface::default(), &frame(&scene), &cache, &scheduler);
            settle(&cache).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !scheduler.take_pending() {
                break;
            }
        }

        assert!(frames <= 3, "still redrawing after {} frames", frames);
        assert_eq!(last.visible, 3);
        assert_eq!(last.drawn, 2);
        assert_eq!(last.deferred, 1);
        let stats = cache.stats();
        assert_eq!(stats.decodes, 2);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_bad_draw_does_not_blank_frame() {
        let scene = scene(vec![item("a", "corrupt-a", 0), item("b", "thumb-b", 1)]);
        let cache = TextureCache::new(8, EchoDecoder, Handle::current());
        cache.acquire("a", "corrupt-a").await.unwrap();
        cache.acquire("b", "thumb-b").await.unwrap();
        let (scheduler, _) = counting_scheduler();

        let mut surface = RecordingSurface::default();
        let stats = Renderer::new(&config()).paint(&mut surface, &frame(&scene), &cache, &scheduler);
        assert_eq!(stats.failed_draws, 1);
        assert_eq!(stats.drawn, 1);
        assert_eq!(surface.textures(), vec!["thumb-b"]);
    }

    #[tokio::test]
    async fn test_failed_decode_is_not_retried() {
        let scene = scene(vec![item("a", "bad-a", 0)]);
        let cache = TextureCache::new(8, EchoDecoder, Handle::current());
        let (scheduler, _) = counting_scheduler();
        let renderer = Renderer::new(&config());

        renderer.paint(&mut RecordingSurface::default(), &frame(&scene), &cache, &scheduler);
        settle(&cache).await;
        for _ in 0..200 {
            if renderer.failed_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(renderer.failed_count(), 1);

        let stats = renderer.paint(&mut RecordingSurface::default(), &frame(&scene), &cache, &scheduler);
        assert_eq!(stats.placeholders, 1);
        assert_eq!(cache.stats().decodes, 1);
        assert!(cache.is_empty());

        renderer.clear_failed();
        renderer.paint(&mut RecordingSurface::default(), &frame(&scene), &cache, &scheduler);
        assert_eq!(cache.stats().decodes, 2);
    }

    #[tokio::test]
    async fn test_stopped_loop_still_fills_cache() {
        let scene = scene(vec![item("a", "thumb-a", 0)]);
        let cache = TextureCache::new(8, EchoDecoder, Handle::current());
        let (scheduler, wakes) = counting_scheduler();

        Renderer::new(&config()).paint(&mut RecordingSurface::default(), &frame(&scene), &cache, &scheduler);
        scheduler.stop();
        settle(&cache).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.contains("a"));
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hovered_item_is_enlarged_and_outlined() {
        let scene = scene(vec![item("a", "thumb-a", 0), item("b", "thumb-b", 1)]);
        let cache = TextureCache::new(8, EchoDecoder, Handle::current());
        cache.acquire("a", "thumb-a").await.unwrap();
        cache.acquire("b", "thumb-b").await.unwrap();
        let (scheduler, _) = counting_scheduler();

        let mut input = frame(&scene);
        input.hovered = Some(1);
        input.highlight = Some("kw-a");
        let mut surface = RecordingSurface::default();
        Renderer::new(&config()).paint(&mut surface, &input, &cache, &scheduler);

        let drawn: Vec<ScreenRect> = surface
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Texture(_, r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(drawn[0].w, 100.0);
        assert!((drawn[1].w - 115.0).abs() < 1e-3);

        let strokes: Vec<&Op> = surface.ops.iter().filter(|op| matches!(op, Op::Stroke(_))).collect();
        assert_eq!(strokes.len(), 2);
    }
}
