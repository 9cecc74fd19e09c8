//! Pointer hit-testing and hover/click dispatch

use crate::config::ViewConfig;
use crate::item::Item;
use crate::view::camera::{Camera, Projector, Viewport};
use crate::view::cull::cull;
use crate::view::render::FrameScheduler;
use crate::view::scene::Scene;

/// Pointer input in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Move { x: f32, y: f32 },
    Leave,
    Click { x: f32, y: f32 },
    DoubleClick { x: f32, y: f32 },
    SecondaryClick { x: f32, y: f32 },
}

/// Receives interaction callbacks; every method defaults to doing nothing
pub trait InteractionHandler {
    fn hover_changed(&mut self, _hovered: Option<(usize, &Item)>) {}
    fn clicked(&mut self, _index: usize, _item: &Item) {}
    fn double_clicked(&mut self, _index: usize, _item: &Item) {}
    /// Secondary button; (x, y) is where the menu should open
    fn context_requested(&mut self, _index: usize, _item: &Item, _x: f32, _y: f32) {}
}

pub struct Dispatcher {
    projector: Projector,
    margin: f32,
    hover_scale: f32,
    hovered: Option<usize>,
}

impl Dispatcher {
    pub fn new(config: &ViewConfig) -> Self {
        Self {
            projector: Projector::new(config),
            margin: config.cull_margin,
            hover_scale: config.hover_scale,
            hovered: None,
        }
    }

    pub fn hovered(&self) -> Option<usize> {
        self.hovered
    }

    /// Drops the hover without callbacks, for when the scene is replaced
    pub fn reset(&mut self) {
        self.hovered = None;
    }

    /// Topmost item under (x, y), using the same projection and culling as
    /// the renderer and scanning its draw order backwards.
    pub fn resolve(&self, scene: &Scene, camera: &Camera, viewport: Viewport, x: f32, y: f32) -> Option<usize> {
        cull(scene, camera, viewport, &self.projector, self.margin)
            .iter()
            .rev()
            .find(|v| {
                let emphasis = if self.hovered == Some(v.index) { self.hover_scale } else { 1.0 };
                v.rect(emphasis).contains(x, y)
            })
            .map(|v| v.index)
    }

    /// Applies one pointer event. Hover changes notify `handler` and request
    /// exactly one redraw; clicks call back only when they hit an item.
    pub fn dispatch<H: InteractionHandler>(
        &mut self,
        event: PointerEvent,
        scene: &Scene,
        camera: &Camera,
        viewport: Viewport,
        handler: &mut H,
        scheduler: &FrameScheduler,
    ) {
        match event {
            PointerEvent::Move { x, y } => {
                let target = self.resolve(scene, camera, viewport, x, y);
                self.set_hover(target, scene, handler, scheduler);
            }
            PointerEvent::Leave => self.set_hover(None, scene, handler, scheduler),
            PointerEvent::Click { x, y } => {
                if let Some(i) = self.resolve(scene, camera, viewport, x, y) {
                    handler.clicked(i, &scene.items[i]);
                }
            }
            PointerEvent::DoubleClick { x, y } => {
                if let Some(i) = self.resolve(scene, camera, viewport, x, y) {
                    handler.double_clicked(i, &scene.items[i]);
                }
            }
            PointerEvent::SecondaryClick { x, y } => {
                if let Some(i) = self.resolve(scene, camera, viewport, x, y) {
                    handler.context_requested(i, &scene.items[i], x, y);
                }
            }
        }
    }

    fn set_hover<H: InteractionHandler>(
        &mut self,
        target: Option<usize>,
        scene: &Scene,
        handler: &mut H,
        scheduler: &FrameScheduler,
    ) {
        if target == self.hovered {
            return;
        }
        self.hovered = target;
        handler.hover_changed(target.map(|i| (i, &scene.items[i])));
        scheduler.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Position;
    use crate::som::GridShape;
    use crate::view::camera::Camera2D;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl InteractionHandler for Recorder {
        fn hover_changed(&mut self, hovered: Option<(usize, &Item)>) {
            match hovered {
                Some((_, item)) => self.events.push(format!("hover {}", item.id)),
                None => self.events.push("hover none".to_string()),
            }
        }

        fn clicked(&mut self, _index: usize, item: &Item) {
            self.events.push(format!("click {}", item.id));
        }

        fn double_clicked(&mut self, _index: usize, item: &Item) {
            self.events.push(format!("open {}", item.id));
        }

        fn context_requested(&mut self, _index: usize, item: &Item, _x: f32, _y: f32) {
            self.events.push(format!("menu {}", item.id));
        }
    }

    fn item(id: &str, x: usize) -> Item {
        Item {
            id: id.to_string(),
            thumbnail: id.to_string(),
            keywords: Vec::new(),
            features: Vec::new(),
            position: Some(Position::TwoD { x, y: 0 }),
        }
    }

    fn config() -> ViewConfig {
        ViewConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    // "a" and "b" share cell 0, "c" sits in cell 2 (world x = 240)
    fn scene() -> Scene {
        Scene::new(
            vec![item("a", 0), item("b", 0), item("c", 2)],
            GridShape::flat(3, 1).unwrap(),
            &config(),
        )
    }

    fn camera() -> Camera {
        Camera::TwoD(Camera2D { x: 100.0, y: 100.0, scale: 1.0 })
    }

    fn scheduler() -> (FrameScheduler, Arc<AtomicUsize>) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        (
            FrameScheduler::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            wakes,
        )
    }

    const VP: Viewport = Viewport { width: 800.0, height: 600.0 };

    #[test]
    fn test_resolve_prefers_topmost() {
        let dispatcher = Dispatcher::new(&config());
        let scene = scene();
        assert_eq!(dispatcher.resolve(&scene, &camera(), VP, 100.0, 100.0), Some(1));
        assert_eq!(dispatcher.resolve(&scene, &camera(), VP, 340.0, 100.0), Some(2));
        assert_eq!(dispatcher.resolve(&scene, &camera(), VP, 220.0, 100.0), None);
    }

    #[test]
    fn test_hover_change_redraws_once() {
        let mut dispatcher = Dispatcher::new(&config());
        let scene = scene();
        let (scheduler, wakes) = scheduler();
        let mut recorder = Recorder::default();

        dispatcher.dispatch(PointerEvent::Move { x: 340.0, y: 100.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(dispatcher.hovered(), Some(2));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        scheduler.take_pending();

        // Moving within the same item changes nothing
        dispatcher.dispatch(PointerEvent::Move { x: 345.0, y: 110.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        dispatcher.dispatch(PointerEvent::Move { x: 700.0, y: 500.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        scheduler.take_pending();

        dispatcher.dispatch(PointerEvent::Move { x: 710.0, y: 500.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        dispatcher.dispatch(PointerEvent::Leave, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.events, vec!["hover c", "hover none"]);
    }

    #[test]
    fn test_leave_clears_hover() {
        let mut dispatcher = Dispatcher::new(&config());
        let scene = scene();
        let (scheduler, _) = scheduler();
        let mut recorder = Recorder::default();

        dispatcher.dispatch(PointerEvent::Move { x: 100.0, y: 100.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        dispatcher.dispatch(PointerEvent::Leave, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(dispatcher.hovered(), None);
        assert_eq!(recorder.events, vec!["hover b", "hover none"]);
    }

    #[test]
    fn test_clicks_only_fire_on_items() {
        let mut dispatcher = Dispatcher::new(&config());
        let scene = scene();
        let (scheduler, wakes) = scheduler();
        let mut recorder = Recorder::default();

        for event in [
            PointerEvent::Click { x: 100.0, y: 100.0 },
            PointerEvent::Click { x: 700.0, y: 500.0 },
            PointerEvent::DoubleClick { x: 340.0, y: 100.0 },
            PointerEvent::DoubleClick { x: 5.0, y: 5.0 },
            PointerEvent::SecondaryClick { x: 120.0, y: 90.0 },
            PointerEvent::SecondaryClick { x: 220.0, y: 100.0 },
        ] {
            dispatcher.dispatch(event, &scene, &camera(), VP, &mut recorder, &scheduler);
        }
        assert_eq!(recorder.events, vec!["click b", "open c", "menu b"]);
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hovered_item_hit_area_grows() {
        let mut dispatcher = Dispatcher::new(&config());
        let scene = scene();
        let (scheduler, _) = scheduler();
        let mut recorder = Recorder::default();

        // Edge of "c" is at 290; the hovered box reaches 282.5
        assert_eq!(dispatcher.resolve(&scene, &camera(), VP, 285.0, 100.0), None);
        dispatcher.dispatch(PointerEvent::Move { x: 340.0, y: 100.0 }, &scene, &camera(), VP, &mut recorder, &scheduler);
        assert_eq!(dispatcher.resolve(&scene, &camera(), VP, 285.0, 100.0), Some(2));
    }
}
