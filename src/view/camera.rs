//! Camera state and world-to-screen projection
//!
//! 2D: `screen = world * scale + translation`.
//! 3D: rotate about Y (yaw) then X (pitch), push by the camera Z offset,
//! then perspective-divide with `scale = fov / (fov + z)`.

use crate::config::{ViewConfig, ViewMode};

/// Size of the drawing area in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width * 0.5, self.height * 0.5)
    }

    /// Viewport rectangle grown by `margin` on every side
    pub fn expanded(&self, margin: f32) -> ScreenRect {
        ScreenRect {
            x: -margin,
            y: -margin,
            w: self.width + 2.0 * margin,
            h: self.height + 2.0 * margin,
        }
    }
}

/// Axis-aligned rectangle in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl ScreenRect {
    pub fn centered(cx: f32, cy: f32, size: f32) -> Self {
        Self {
            x: cx - size * 0.5,
            y: cy - size * 0.5,
            w: size,
            h: size,
        }
    }

    pub fn intersects(&self, other: &ScreenRect) -> bool {
        self.x <= other.x + other.w
            && other.x <= self.x + self.w
            && self.y <= other.y + other.h
            && other.y <= self.y + self.h
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.w && py >= self.y && py <= self.y + self.h
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera2D {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera3D {
    /// Screen-space pan added after projection
    pub x: f32,
    pub y: f32,
    /// Depth offset added after rotation
    pub z: f32,
    /// Pitch
    pub rot_x: f32,
    /// Yaw
    pub rot_y: f32,
    pub fov: f32,
}

/// View state for one viewport. Copied per frame so a paint never sees a
/// half-applied input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Camera {
    TwoD(Camera2D),
    ThreeD(Camera3D),
}

impl Camera {
    pub fn initial(mode: ViewMode, config: &ViewConfig) -> Self {
        match mode {
            ViewMode::TwoD => Camera::TwoD(Camera2D { x: 0.0, y: 0.0, scale: 1.0 }),
            ViewMode::ThreeD => Camera::ThreeD(Camera3D {
                x: 0.0,
                y: 0.0,
                z: config.camera_distance,
                rot_x: 0.0,
                rot_y: 0.0,
                fov: config.fov,
            }),
        }
    }

    pub fn mode(&self) -> ViewMode {
        match self {
            Camera::TwoD(_) => ViewMode::TwoD,
            Camera::ThreeD(_) => ViewMode::ThreeD,
        }
    }

    /// Translates the view by a screen-space delta
    pub fn pan(&mut self, dx: f32, dy: f32) {
        match self {
            Camera::TwoD(c) => {
                c.x += dx;
                c.y += dy;
            }
            Camera::ThreeD(c) => {
                c.x += dx;
                c.y += dy;
            }
        }
    }

    /// Zooms by `factor`, keeping the screen point (ax, ay) fixed in 2D
    pub fn zoom_at(&mut self, factor: f32, ax: f32, ay: f32) {
        match self {
            Camera::TwoD(c) => {
                let new_scale = (c.scale * factor).clamp(0.01, 50.0);
                let applied = new_scale / c.scale;
                c.x = ax - (ax - c.x) * applied;
                c.y = ay - (ay - c.y) * applied;
                c.scale = new_scale;
            }
            Camera::ThreeD(c) => {
                // Zooming in moves the camera towards the scene
                c.z /= factor;
            }
        }
    }

    /// Rotates the 3D view; no-op in 2D
    pub fn orbit(&mut self, d_yaw: f32, d_pitch: f32) {
        if let Camera::ThreeD(c) = self {
            c.rot_y += d_yaw;
            c.rot_x = (c.rot_x + d_pitch).clamp(-1.5, 1.5);
        }
    }

    /// 2D camera that frames `min..max` world bounds inside `viewport`
    pub fn fit_2d(min: [f32; 2], max: [f32; 2], viewport: Viewport, padding: f32) -> Self {
        let w = (max[0] - min[0]).max(1.0) + 2.0 * padding;
        let h = (max[1] - min[1]).max(1.0) + 2.0 * padding;
        let scale = (viewport.width / w).min(viewport.height / h).clamp(0.01, 50.0);
        let (cx, cy) = viewport.center();
        let mid = [(min[0] + max[0]) * 0.5, (min[1] + max[1]) * 0.5];
        Camera::TwoD(Camera2D {
            x: cx - mid[0] * scale,
            y: cy - mid[1] * scale,
            scale,
        })
    }
}

/// Screen placement of one world point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub x: f32,
    pub y: f32,
    /// Size multiplier: zoom in 2D, perspective factor in 3D
    pub scale: f32,
    /// Camera-space Z after translation; 0 in 2D
    pub depth: f32,
}

/// Projection plus the depth window and fade curves from [`ViewConfig`]
#[derive(Debug, Clone)]
pub struct Projector {
    depth_near: f32,
    fade_near: f32,
    fog_start: f32,
    fog_end: f32,
    depth_far: f32,
    min_brightness: f32,
}

impl Projector {
    pub fn new(config: &ViewConfig) -> Self {
        Self {
            depth_near: config.depth_near,
            fade_near: config.fade_near,
            fog_start: config.fog_start,
            fog_end: config.fog_end,
            depth_far: config.depth_far,
            min_brightness: config.min_brightness,
        }
    }

    pub fn project(&self, camera: &Camera, world: [f32; 3], viewport: Viewport) -> Projection {
        match camera {
            Camera::TwoD(c) => Projection {
                x: world[0] * c.scale + c.x,
                y: world[1] * c.scale + c.y,
                scale: c.scale,
                depth: 0.0,
            },
            Camera::ThreeD(c) => {
                let (sin_x, cos_x) = c.rot_x.sin_cos();
                let (sin_y, cos_y) = c.rot_y.sin_cos();
                let [x, y, z] = world;

                // Yaw
                let x1 = x * cos_y + z * sin_y;
                let z1 = -x * sin_y + z * cos_y;
                // Pitch
                let y2 = y * cos_x - z1 * sin_x;
                let z2 = y * sin_x + z1 * cos_x;

                let depth = z2 + c.z;
                let scale = c.fov / (c.fov + depth);
                let (cx, cy) = viewport.center();
                Projection {
                    x: x1 * scale + cx + c.x,
                    y: y2 * scale + cy + c.y,
                    scale,
                    depth,
                }
            }
        }
    }

    /// Whether a 3D depth lies inside the drawable window. Anything at or
    /// behind the camera plane has a non-positive scale and is rejected.
    pub fn in_depth_window(&self, p: &Projection) -> bool {
        p.scale > 0.0 && p.depth > self.depth_near && p.depth < self.depth_far
    }

    /// 1 beyond `fade_near`, falling linearly to 0 at `depth_near`
    pub fn opacity(&self, depth: f32) -> f32 {
        if depth >= self.fade_near {
            1.0
        } else {
            ((depth - self.depth_near) / (self.fade_near - self.depth_near)).clamp(0.0, 1.0)
        }
    }

    /// 1 before `fog_start`, falling linearly to `min_brightness` at `fog_end`
    pub fn brightness(&self, depth: f32) -> f32 {
        if depth <= self.fog_start {
            1.0
        } else {
            let t = ((depth - self.fog_start) / (self.fog_end - self.fog_start)).min(1.0);
            (1.0 - t * (1.0 - self.min_brightness)).max(self.min_brightness)
        }
    }
}
