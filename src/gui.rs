//! Native gallery viewer (eframe/egui)
//!
//! Input mutates the camera between frames; each frame copies the camera and
//! hands it to the renderer together with an egui-backed [`Surface`].

use anyhow::Context as _;
use eframe::egui;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Environment, ViewMode};
use crate::item::{feature_dim, keyword_counts, Item, LayoutFile};
use crate::som::{assign_positions, grid_shape_for, spawn_training, TrainingEvent, TrainingHandle, TrainingProgress};
use crate::view::{
    Camera, Dispatcher, FrameInput, FrameScheduler, FrameStats, InteractionHandler, PointerEvent, Renderer, Rgba,
    Scene, ScreenRect, Surface, TextureCache, TextureDecoder, Viewport,
};

/// What the viewer starts from
pub enum ViewerSource {
    /// Precomputed positions
    Layout(LayoutFile),
    /// Raw features, trained in the background
    Train { items: Vec<Item>, mode: ViewMode },
}

/// Run the native GUI viewer. Must be called from inside a tokio runtime,
/// which hosts the thumbnail decodes.
pub fn run_viewer(config: Config, env: Environment, source: ViewerSource) -> anyhow::Result<()> {
    let runtime = Handle::try_current().context("viewer needs a tokio runtime for thumbnail decoding")?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_title("SOM Gallery"),
        ..Default::default()
    };

    eframe::run_native(
        "SOM Gallery",
        options,
        Box::new(move |cc| Ok(Box::new(GalleryApp::new(cc, config, env, source, runtime)))),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {}", e))
}

/// Loads thumbnails with the image crate and uploads them as egui textures
struct EguiDecoder {
    ctx: egui::Context,
    side: u32,
    data_dir: PathBuf,
}

impl TextureDecoder<egui::TextureHandle> for EguiDecoder {
    fn decode(&self, locator: &str) -> anyhow::Result<egui::TextureHandle> {
        let path = resolve_locator(&self.data_dir, locator)?;
        let img = image::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let thumb = img.thumbnail(self.side, self.side).to_rgba8();
        let size = [thumb.width() as usize, thumb.height() as usize];
        let pixels = egui::ColorImage::from_rgba_unmultiplied(size, thumb.as_raw());
        Ok(self.ctx.load_texture(locator, pixels, egui::TextureOptions::LINEAR))
    }
}

/// Local path for a thumbnail locator; relative paths live under `data_dir`
fn resolve_locator(data_dir: &Path, locator: &str) -> anyhow::Result<PathBuf> {
    if locator.contains("://") {
        anyhow::bail!("remote thumbnails are not supported: {}", locator);
    }
    let path = Path::new(locator);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    })
}

/// [`Surface`] over an egui painter, offset to the canvas origin
struct EguiSurface<'p> {
    painter: &'p egui::Painter,
    origin: egui::Pos2,
}

impl EguiSurface<'_> {
    fn rect(&self, r: ScreenRect) -> egui::Rect {
        egui::Rect::from_min_size(self.origin + egui::vec2(r.x, r.y), egui::vec2(r.w, r.h))
    }
}

fn color32(c: Rgba) -> egui::Color32 {
    let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    egui::Color32::from_rgba_unmultiplied(byte(c.r), byte(c.g), byte(c.b), byte(c.a))
}

impl Surface for EguiSurface<'_> {
    type Texture = egui::TextureHandle;

    fn clear(&mut self, color: Rgba) {
        self.painter.rect_filled(self.painter.clip_rect(), 0.0, color32(color));
    }

    fn fill_rect(&mut self, rect: ScreenRect, color: Rgba) {
        self.painter.rect_filled(self.rect(rect), 0.0, color32(color));
    }

    fn stroke_rect(&mut self, rect: ScreenRect, width: f32, color: Rgba) {
        self.painter
            .rect_stroke(self.rect(rect), 0.0, egui::Stroke::new(width, color32(color)));
    }

    fn draw_texture(&mut self, texture: &egui::TextureHandle, rect: ScreenRect, tint: Rgba) -> anyhow::Result<()> {
        let target = self.rect(rect);
        if !target.is_finite() || target.width() <= 0.0 {
            anyhow::bail!("degenerate target rect {:?}", target);
        }
        let [w, h] = texture.size();
        if w == 0 || h == 0 {
            anyhow::bail!("empty texture {}", texture.name());
        }
        // Letterbox non-square thumbnails inside the cell
        let aspect = w as f32 / h as f32;
        let fitted = if aspect >= 1.0 {
            egui::Rect::from_center_size(target.center(), egui::vec2(target.width(), target.height() / aspect))
        } else {
            egui::Rect::from_center_size(target.center(), egui::vec2(target.width() * aspect, target.height()))
        };
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        self.painter.image(texture.id(), fitted, uv, color32(tint));
        Ok(())
    }
}

/// Collects dispatcher callbacks; applied once the dispatch returns
#[derive(Default)]
struct Actions {
    select: Option<usize>,
    focus: Option<usize>,
    copy: Option<String>,
}

impl InteractionHandler for Actions {
    fn hover_changed(&mut self, hovered: Option<(usize, &Item)>) {
        if let Some((_, item)) = hovered {
            debug!("Hovering {}", item.id);
        }
    }

    fn clicked(&mut self, index: usize, _item: &Item) {
        self.select = Some(index);
    }

    fn double_clicked(&mut self, index: usize, _item: &Item) {
        self.focus = Some(index);
    }

    fn context_requested(&mut self, index: usize, item: &Item, _x: f32, _y: f32) {
        self.select = Some(index);
        self.copy = Some(item.id.clone());
    }
}

struct Training {
    handle: TrainingHandle,
    items: Vec<Item>,
    shape: crate::som::GridShape,
    mode: ViewMode,
    progress: Option<TrainingProgress>,
}

/// Full-size thumbnail of the selected item, keyed by item id
type Preview = Arc<Mutex<Option<(String, egui::TextureHandle)>>>;

struct GalleryApp {
    config: Config,
    runtime: Handle,
    scene: Option<Scene>,
    camera: Camera,
    cache: TextureCache<egui::TextureHandle>,
    renderer: Renderer,
    dispatcher: Dispatcher,
    scheduler: FrameScheduler,
    training: Option<Training>,
    keywords: Vec<(String, usize)>,
    highlight: Option<String>,
    selected: Option<usize>,
    preview: Preview,
    last_stats: FrameStats,
    status: String,
    fit_pending: bool,
}

impl GalleryApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        config: Config,
        env: Environment,
        source: ViewerSource,
        runtime: Handle,
    ) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let decoder = EguiDecoder {
            ctx: cc.egui_ctx.clone(),
            side: config.cache.thumbnail_side,
            data_dir: PathBuf::from(&env.data_dir),
        };
        let cache = TextureCache::new(config.cache.capacity, decoder, runtime.clone());

        let repaint_ctx = cc.egui_ctx.clone();
        let scheduler = FrameScheduler::new(move || repaint_ctx.request_repaint());

        let mut app = Self {
            camera: Camera::initial(config.view.mode, &config.view),
            renderer: Renderer::new(&config.view),
            dispatcher: Dispatcher::new(&config.view),
            config,
            runtime,
            scene: None,
            cache,
            scheduler,
            training: None,
            keywords: Vec::new(),
            highlight: None,
            selected: None,
            preview: Arc::new(Mutex::new(None)),
            last_stats: FrameStats::default(),
            status: String::new(),
            fit_pending: false,
        };

        match source {
            ViewerSource::Layout(layout) => app.show_items(layout.items, layout.shape, layout.mode),
            ViewerSource::Train { items, mode } => app.start_training(items, mode),
        }
        app
    }

    fn start_training(&mut self, items: Vec<Item>, mode: ViewMode) {
        let dim = match feature_dim(&items) {
            Ok(Some(dim)) => dim,
            Ok(None) => {
                self.status = "No items to arrange".to_string();
                return;
            }
            Err(e) => {
                error!("Cannot train: {}", e);
                self.status = format!("Cannot train: {}", e);
                return;
            }
        };
        let shape = match grid_shape_for(items.len(), mode, &self.config.som) {
            Ok(shape) => shape,
            Err(e) => {
                self.status = format!("Cannot size grid: {}", e);
                return;
            }
        };

        let samples: Vec<Vec<f64>> = items.iter().map(|i| i.features.clone()).collect();
        match spawn_training(samples, shape, dim, self.config.som.clone()) {
            Ok(handle) => {
                self.status = format!("Training {}x{}x{} map", shape.width, shape.height, shape.depth);
                self.training = Some(Training {
                    handle,
                    items,
                    shape,
                    mode,
                    progress: None,
                });
            }
            Err(e) => {
                error!("Failed to start training thread: {}", e);
                self.status = format!("Failed to start training: {}", e);
            }
        }
    }

    fn poll_training(&mut self) {
        let Some(training) = self.training.as_mut() else {
            return;
        };

        let mut finished = None;
        for event in training.handle.poll() {
            match event {
                TrainingEvent::Progress(p) => training.progress = Some(p),
                TrainingEvent::Finished(result) => finished = Some(result),
            }
        }

        let Some(result) = finished else {
            return;
        };
        let Some(mut training) = self.training.take() else {
            return;
        };
        let mode = training.mode;
        match result.and_then(|trained| {
            assign_positions(&trained.map, mode, &mut training.items)?;
            Ok(trained.report)
        }) {
            Ok(report) => {
                info!(
                    "Map ready: {} iterations, quantization error {:.4}",
                    report.iterations, report.quantization_error
                );
                self.show_items(training.items, training.shape, mode);
            }
            Err(e) => {
                error!("Training failed: {}", e);
                self.status = format!("Training failed: {}", e);
            }
        }
    }

    fn show_items(&mut self, items: Vec<Item>, shape: crate::som::GridShape, mode: ViewMode) {
        self.keywords = keyword_counts(&items);
        let scene = Scene::new(items, shape, &self.config.view);
        self.status = format!("{} items on a {}x{}x{} map", scene.len(), shape.width, shape.height, shape.depth);
        self.scene = Some(scene);
        self.selected = None;
        self.dispatcher.reset();
        self.camera = Camera::initial(mode, &self.config.view);
        self.fit_pending = mode == ViewMode::TwoD;
        self.scheduler.request_redraw();
    }

    /// Decodes the selected item's thumbnail for the side panel, waiting on
    /// any decode the renderer already started for it
    fn load_preview(&self, item: &Item) {
        let cache = self.cache.clone();
        let scheduler = self.scheduler.clone();
        let slot = Arc::clone(&self.preview);
        let (key, locator) = (item.id.clone(), item.thumbnail.clone());
        self.runtime.spawn(async move {
            match cache.acquire(&key, &locator).await {
                Ok(texture) => {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some((key, texture));
                    }
                    scheduler.request_redraw();
                }
                Err(e) => warn!("No preview for {}: {}", key, e),
            }
        });
    }

    fn center_view(&mut self) {
        self.camera = Camera::initial(self.camera.mode(), &self.config.view);
        self.fit_pending = self.camera.mode() == ViewMode::TwoD;
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Keywords");
        ui.separator();

        if let Some(kw) = self.highlight.clone() {
            ui.horizontal(|ui| {
                ui.label(format!("Highlighting \"{}\"", kw));
                if ui.button("Clear").clicked() {
                    self.highlight = None;
                }
            });
        }

        egui::ScrollArea::vertical().max_height(ui.available_height() * 0.6).show(ui, |ui| {
            for (kw, count) in &self.keywords {
                let active = self.highlight.as_deref() == Some(kw.as_str());
                if ui.selectable_label(active, format!("{} ({})", kw, count)).clicked() {
                    self.highlight = if active { None } else { Some(kw.clone()) };
                }
            }
        });

        ui.separator();
        ui.heading("Selection");
        let selected = self.selected.zip(self.scene.as_ref()).and_then(|(i, s)| s.items.get(i));
        match selected {
            Some(item) => {
                let texture = self
                    .preview
                    .lock()
                    .ok()
                    .and_then(|p| p.as_ref().filter(|(id, _)| *id == item.id).map(|(_, t)| t.clone()));
                if let Some(texture) = texture {
                    ui.add(egui::Image::from_texture(&texture).max_width(200.0));
                }
                ui.label(&item.id);
                if let Some(pos) = item.position {
                    let c = pos.coord();
                    ui.label(format!("Cell ({}, {}, {})", c.x, c.y, c.z));
                }
                if !item.keywords.is_empty() {
                    ui.label(item.keywords.join(", "));
                }
            }
            None => {
                ui.label("Click an item to select it");
            }
        }
    }

    fn controls_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if let Camera::ThreeD(c) = &mut self.camera {
                ui.label("Rotate:");
                ui.add(egui::DragValue::new(&mut c.rot_x).speed(0.02).prefix("X:").range(-1.5..=1.5));
                ui.add(egui::DragValue::new(&mut c.rot_y).speed(0.02).prefix("Y:"));
                ui.separator();
            }
            if ui.button("Center").clicked() {
                self.center_view();
            }
            if self.renderer.failed_count() > 0 && ui.button("Retry thumbnails").clicked() {
                self.renderer.clear_failed();
            }

            ui.separator();
            let stats = self.cache.stats();
            if self.cache.is_empty() && self.cache.pending_count() == 0 {
                ui.label(format!("Cache empty (capacity {})", self.cache.capacity()));
            } else {
                ui.label(format!(
                    "Cache {}/{} | {} hits, {} decodes, {} failed, {} evicted",
                    self.cache.len(),
                    self.cache.capacity(),
                    stats.hits,
                    stats.decodes,
                    stats.failures,
                    stats.evictions
                ));
            }
            if self.last_stats.deferred > 0 {
                ui.label(format!("{} thumbnails waiting for cache room", self.last_stats.deferred));
            }
        });

        ui.horizontal(|ui| {
            if let Some(training) = &self.training {
                let fraction = training.progress.map(|p| p.fraction()).unwrap_or(0.0);
                ui.add(egui::ProgressBar::new(fraction).desired_width(200.0).show_percentage());
            }
            let total = self.scene.as_ref().map_or(0, Scene::len);
            ui.label(format!("{} / {} visible", self.last_stats.visible, total));
            ui.separator();
            ui.label(&self.status);
        });
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let rect = response.rect;
        let viewport = Viewport::new(rect.width(), rect.height());

        let Some(scene) = self.scene.as_ref() else {
            painter.rect_filled(rect, 0.0, color32(Rgba::BACKGROUND));
            return;
        };
        if scene.is_empty() {
            painter.rect_filled(rect, 0.0, color32(Rgba::BACKGROUND));
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "No positioned items",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            return;
        }

        if self.fit_pending {
            if let Some((min, max)) = scene.bounds_2d() {
                self.camera = Camera::fit_2d(min, max, viewport, self.config.view.cell_size * 0.5);
            }
            self.fit_pending = false;
        }

        // Camera input
        let three_d = self.camera.mode() == ViewMode::ThreeD;
        if response.dragged_by(egui::PointerButton::Primary) {
            let d = response.drag_delta();
            if three_d {
                self.camera.orbit(d.x * 0.005, d.y * 0.005);
            } else {
                self.camera.pan(d.x, d.y);
            }
        }
        if response.dragged_by(egui::PointerButton::Secondary) || response.dragged_by(egui::PointerButton::Middle) {
            let d = response.drag_delta();
            self.camera.pan(d.x, d.y);
        }
        if let Some(pos) = response.hover_pos() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let anchor = pos - rect.min;
                self.camera.zoom_at((scroll * 0.002).exp(), anchor.x, anchor.y);
            }
        }
        let mut recenter = false;
        ui.input(|i| {
            let step = if three_d { 0.03 } else { 0.0 };
            if i.key_down(egui::Key::ArrowLeft) {
                self.camera.orbit(-step, 0.0);
            }
            if i.key_down(egui::Key::ArrowRight) {
                self.camera.orbit(step, 0.0);
            }
            if i.key_down(egui::Key::ArrowUp) {
                self.camera.orbit(0.0, -step);
            }
            if i.key_down(egui::Key::ArrowDown) {
                self.camera.orbit(0.0, step);
            }
            if i.key_down(egui::Key::Minus) {
                self.camera.zoom_at(1.0 / 1.02, viewport.width * 0.5, viewport.height * 0.5);
            }
            if i.key_down(egui::Key::Plus) {
                self.camera.zoom_at(1.02, viewport.width * 0.5, viewport.height * 0.5);
            }
            recenter = i.key_pressed(egui::Key::Home);
        });

        // Pointer events see the camera this frame will paint with
        let camera = self.camera;
        let mut actions = Actions::default();
        let local = |p: egui::Pos2| p - rect.min;
        let hover = if response.dragged() { None } else { response.hover_pos() };
        let event = match hover {
            Some(p) => PointerEvent::Move { x: local(p).x, y: local(p).y },
            None => PointerEvent::Leave,
        };
        let mut events = vec![event];
        if let Some(p) = response.interact_pointer_pos() {
            let p = local(p);
            if response.double_clicked() {
                events.push(PointerEvent::DoubleClick { x: p.x, y: p.y });
            } else if response.clicked() {
                events.push(PointerEvent::Click { x: p.x, y: p.y });
            }
            if response.secondary_clicked() {
                events.push(PointerEvent::SecondaryClick { x: p.x, y: p.y });
            }
        }
        for event in events {
            self.dispatcher
                .dispatch(event, scene, &camera, viewport, &mut actions, &self.scheduler);
        }

        self.scheduler.take_pending();
        let mut surface = EguiSurface {
            painter: &painter,
            origin: rect.min,
        };
        let frame = FrameInput {
            scene,
            camera,
            viewport,
            hovered: self.dispatcher.hovered(),
            highlight: self.highlight.as_deref(),
        };
        self.last_stats = self.renderer.paint(&mut surface, &frame, &self.cache, &self.scheduler);

        if let Some(i) = self.dispatcher.hovered() {
            if let Some(pos) = response.hover_pos() {
                painter.text(
                    pos + egui::vec2(12.0, -8.0),
                    egui::Align2::LEFT_BOTTOM,
                    &scene.items[i].id,
                    egui::FontId::proportional(13.0),
                    egui::Color32::WHITE,
                );
            }
        }

        // Applied after painting so this frame stays consistent
        if let Some(i) = actions.select {
            self.selected = Some(i);
            self.load_preview(&scene.items[i]);
        }
        if let Some(i) = actions.focus {
            self.selected = Some(i);
            let world = scene.world[i];
            if let Camera::TwoD(c) = &mut self.camera {
                c.scale = c.scale.max(1.5);
                c.x = viewport.width * 0.5 - world[0] * c.scale;
                c.y = viewport.height * 0.5 - world[1] * c.scale;
            }
        }
        if let Some(id) = actions.copy {
            info!("Copied {} to clipboard", id);
            self.status = format!("Copied {}", id);
            ui.ctx().copy_text(id);
        }
        if recenter {
            self.center_view();
        }
    }
}

impl eframe::App for GalleryApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_training();
        if self.training.is_some() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::SidePanel::left("keywords_panel").min_width(220.0).show(ctx, |ui| {
            self.side_panel(ui);
        });

        egui::TopBottomPanel::bottom("controls_panel").show(ctx, |ui| {
            self.controls_panel(ui);
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas(ui));
    }
}

impl Drop for GalleryApp {
    fn drop(&mut self) {
        // Decodes still in flight finish into the cache but cannot wake us
        self.scheduler.stop();
        if self.cache.pending_count() > 0 {
            warn!("Viewer closed with {} thumbnail decodes in flight", self.cache.pending_count());
        }
    }
}
