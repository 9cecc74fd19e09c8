//! Viewport culling and painter's-order sorting

use crate::item::Item;
use crate::view::camera::{Camera, Projector, ScreenRect, Viewport};
use crate::view::scene::Scene;

/// One item that survived culling this frame
#[derive(Debug, Clone, Copy)]
pub struct VisibleItem<'a> {
    pub item: &'a Item,
    /// Index into the scene's item list
    pub index: usize,
    pub x: f32,
    pub y: f32,
    /// On-screen edge length
    pub size: f32,
    pub scale: f32,
    pub opacity: f32,
    pub brightness: f32,
}

impl VisibleItem<'_> {
    /// Screen rectangle, grown by `emphasis` for the hovered item
    pub fn rect(&self, emphasis: f32) -> ScreenRect {
        ScreenRect::centered(self.x, self.y, self.size * emphasis)
    }
}

/// Items whose projected box meets the viewport grown by `margin`.
///
/// 3D cameras also drop anything outside the depth window and return the
/// survivors far-to-near; 2D keeps the scene order.
pub fn cull<'a>(
    scene: &'a Scene,
    camera: &Camera,
    viewport: Viewport,
    projector: &Projector,
    margin: f32,
) -> Vec<VisibleItem<'a>> {
    let bounds = viewport.expanded(margin.max(0.0));
    let three_d = matches!(camera, Camera::ThreeD(_));

    let mut visible: Vec<VisibleItem<'a>> = scene
        .items
        .iter()
        .zip(scene.world.iter())
        .enumerate()
        .filter_map(|(index, (item, world))| {
            let p = projector.project(camera, *world, viewport);
            if three_d && !projector.in_depth_window(&p) {
                return None;
            }

            let size = scene.item_size * p.scale;
            if !ScreenRect::centered(p.x, p.y, size).intersects(&bounds) {
                return None;
            }

            let (opacity, brightness) = if three_d {
                (projector.opacity(p.depth), projector.brightness(p.depth))
            } else {
                (1.0, 1.0)
            };

            Some(VisibleItem {
                item,
                index,
                x: p.x,
                y: p.y,
                size,
                scale: p.scale,
                opacity,
                brightness,
            })
        })
        .collect();

    if three_d {
        // Smaller perspective scale means farther away; stable for ties
        visible.sort_by(|a, b| a.scale.total_cmp(&b.scale));
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewConfig;
    use crate::item::Position;
    use crate::view::camera::{Camera2D, Camera3D};

    fn item(id: &str, position: Position) -> Item {
        Item {
            id: id.to_string(),
            thumbnail: id.to_string(),
            keywords: Vec::new(),
            features: Vec::new(),
            position: Some(position),
        }
    }

    fn scene_with_world(world: Vec<[f32; 3]>) -> Scene {
        let items = (0..world.len())
            .map(|i| item(&format!("i{}", i), Position::TwoD { x: i, y: 0 }))
            .collect();
        Scene {
            items,
            world,
            item_size: 100.0,
        }
    }

    fn cam3(z: f32) -> Camera {
        Camera::ThreeD(Camera3D { x: 0.0, y: 0.0, z, rot_x: 0.0, rot_y: 0.0, fov: 1000.0 })
    }

    #[test]
    fn test_2d_culls_offscreen_and_keeps_order() {
        let scene = scene_with_world(vec![
            [700.0, 100.0, 0.0],
            [-400.0, 100.0, 0.0],
            [100.0, 100.0, 0.0],
            [900.0, 100.0, 0.0],
        ]);
        let projector = Projector::new(&ViewConfig::default());
        let camera = Camera::TwoD(Camera2D { x: 0.0, y: 0.0, scale: 1.0 });

        let visible = cull(&scene, &camera, Viewport::new(800.0, 600.0), &projector, 100.0);
        let indices: Vec<usize> = visible.iter().map(|v| v.index).collect();
        // 900 is covered by the margin (box starts at 850 < 900), -400 is not
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[test]
    fn test_margin_zero_drops_edge_items() {
        let scene = scene_with_world(vec![[900.0, 100.0, 0.0]]);
        let projector = Projector::new(&ViewConfig::default());
        let camera = Camera::TwoD(Camera2D { x: 0.0, y: 0.0, scale: 1.0 });
        assert!(cull(&scene, &camera, Viewport::new(800.0, 600.0), &projector, 0.0).is_empty());
    }

    #[test]
    fn test_center_item_always_visible() {
        let projector = Projector::new(&ViewConfig::default());
        let vp = Viewport::new(640.0, 480.0);
        for camera in [
            Camera2D { x: 0.0, y: 0.0, scale: 1.0 },
            Camera2D { x: -5000.0, y: 300.0, scale: 0.02 },
            Camera2D { x: 12.5, y: -9.0, scale: 40.0 },
        ] {
            // World point that maps onto the viewport centre
            let world = [(320.0 - camera.x) / camera.scale, (240.0 - camera.y) / camera.scale, 0.0];
            let scene = scene_with_world(vec![world]);
            let visible = cull(&scene, &Camera::TwoD(camera), vp, &projector, 0.0);
            assert_eq!(visible.len(), 1);
        }

        let scene = scene_with_world(vec![[0.0, 0.0, 0.0]]);
        let visible = cull(&scene, &cam3(0.0), vp, &projector, 0.0);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn test_3d_drops_items_behind_camera() {
        let scene = scene_with_world(vec![[0.0, 0.0, 0.0]]);
        let projector = Projector::new(&ViewConfig::default());
        let visible = cull(&scene, &cam3(-2000.0), Viewport::new(800.0, 600.0), &projector, 100.0);
        assert!(visible.is_empty());
    }

    #[test]
    fn test_3d_drops_items_past_far_limit() {
        let scene = scene_with_world(vec![[0.0, 0.0, 9000.0]]);
        let projector = Projector::new(&ViewConfig::default());
        let visible = cull(&scene, &cam3(0.0), Viewport::new(800.0, 600.0), &projector, 100.0);
        assert!(visible.is_empty());
    }

    #[test]
    fn test_3d_sorted_far_to_near() {
        let scene = scene_with_world(vec![
            [0.0, 0.0, -200.0],
            [0.0, 0.0, 2000.0],
            [0.0, 0.0, 500.0],
        ]);
        let projector = Projector::new(&ViewConfig::default());
        let visible = cull(&scene, &cam3(0.0), Viewport::new(800.0, 600.0), &projector, 100.0);

        let indices: Vec<usize> = visible.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![1, 2, 0]);
        assert!(visible[0].brightness < 1.0);
        assert_eq!(visible[2].opacity, 1.0);
    }
}
