use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use convis::dataset::{self, Dataset};
use convis::model::TinyConvNet;
use convis::observer::DiagramAdapter;
use convis::surface::{Anchor, GrayImage, ItemId, ItemKind, Shape, TextStyle};
use convis::{AppConfig, Diagram, FrameReport, FrameScheduler, LayoutBuilder, Scene};
use macroquad::prelude::*;

const HUD_H: f32 = 28.0;
const PAN_SPEED: f32 = 600.0;

#[derive(Debug, Clone)]
struct VisConfig {
    config_path: Option<PathBuf>,
    mnist_dir: Option<PathBuf>,
    snapshot_path: PathBuf,
    calibrate: bool,
}

impl VisConfig {
    fn from_env_and_args() -> Self {
        let mut config_path: Option<PathBuf> = env::var("CONVIS_CONFIG").ok().map(PathBuf::from);
        let mut mnist_dir: Option<PathBuf> = env::var("CONVIS_MNIST_DIR").ok().map(PathBuf::from);
        let mut snapshot_path = env::var("CONVIS_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data").join("snapshot.json"));
        let mut calibrate = env::var("CONVIS_CALIBRATE").is_ok_and(|v| v != "0");

        let mut args = env::args().skip(1);
        while let Some(a) = args.next() {
            match a.as_str() {
                "--config" => {
                    if let Some(v) = args.next() {
                        config_path = Some(PathBuf::from(v));
                    }
                }
                "--mnist" => {
                    if let Some(v) = args.next() {
                        mnist_dir = Some(PathBuf::from(v));
                    }
                }
                "--snapshot-path" => {
                    if let Some(v) = args.next() {
                        snapshot_path = PathBuf::from(v);
                    }
                }
                "--calibrate" => calibrate = true,
                _ => {}
            }
        }

        Self {
            config_path,
            mnist_dir,
            snapshot_path,
            calibrate,
        }
    }
}

fn color(c: convis::surface::Color) -> Color {
    Color::from_rgba(c.r, c.g, c.b, 255)
}

/// Pan/zoom from scene coordinates to screen pixels.
#[derive(Debug, Clone, Copy)]
struct View {
    offset: Vec2,
    zoom: f32,
}

impl View {
    fn fit(bounds: Option<convis::geometry::Rect>) -> Self {
        let Some(b) = bounds else {
            return Self {
                offset: Vec2::ZERO,
                zoom: 1.0,
            };
        };
        let zoom = ((screen_height() - HUD_H) / b.h.max(1.0)).clamp(0.2, 1.0);
        Self {
            offset: vec2(b.x - 10.0, b.y - 10.0),
            zoom,
        }
    }

    fn point(&self, p: convis::geometry::Point) -> Vec2 {
        vec2((p.x - self.offset.x) * self.zoom, (p.y - self.offset.y) * self.zoom + HUD_H)
    }

    fn len(&self, v: f32) -> f32 {
        v * self.zoom
    }
}

/// GPU textures for scene images, rebuilt when a slot's bitmap is swapped.
#[derive(Default)]
struct TextureCache {
    textures: HashMap<ItemId, (*const GrayImage, Texture2D)>,
}

impl TextureCache {
    fn get(&mut self, id: ItemId, image: &Arc<GrayImage>) -> &Texture2D {
        let ptr = Arc::as_ptr(image);
        let stale = self.textures.get(&id).map_or(true, |(p, _)| *p != ptr);
        if stale {
            let tex = Texture2D::from_rgba8(image.width() as u16, image.height() as u16, &image.to_rgba());
            tex.set_filter(FilterMode::Nearest);
            self.textures.insert(id, (ptr, tex));
        }
        &self.textures[&id].1
    }
}

fn draw_label(view: &View, at: convis::geometry::Point, text: &str, style: &TextStyle) {
    let size = view.len(style.font.size * 1.3).max(1.0);
    let line_h = size * 1.1;
    let lines: Vec<&str> = text.lines().collect();
    let anchor = view.point(at);
    let mut y = anchor.y - line_h * lines.len() as f32 / 2.0 + size * 0.75;
    for line in lines {
        let width = measure_text(line, None, size as u16, 1.0).width;
        let x = match style.anchor {
            Anchor::Center => anchor.x - width / 2.0,
            Anchor::West => anchor.x,
        };
        let c = color(style.color);
        draw_text(line, x, y, size, c);
        if style.font.bold {
            draw_text(line, x + 1.0, y, size, c);
        }
        y += line_h;
    }
}

fn draw_scene(scene: &Scene, view: &View, textures: &mut TextureCache) {
    for item in scene.items() {
        match &item.kind {
            ItemKind::Image { at, image } => {
                let (w, h) = (image.width() as f32, image.height() as f32);
                let top_left = view.point(convis::geometry::Point::new(at.x - w / 2.0, at.y - h / 2.0));
                let tex = textures.get(item.id, image);
                draw_texture_ex(
                    tex,
                    top_left.x,
                    top_left.y,
                    WHITE,
                    DrawTextureParams {
                        dest_size: Some(vec2(view.len(w), view.len(h))),
                        ..Default::default()
                    },
                );
            }
            ItemKind::Shape { shape, fill, outline } => {
                let thickness = view.len(outline.width).max(1.0);
                match *shape {
                    Shape::Rect(r) => {
                        let p = view.point(convis::geometry::Point::new(r.x, r.y));
                        draw_rectangle(p.x, p.y, view.len(r.w), view.len(r.h), color(*fill));
                        draw_rectangle_lines(p.x, p.y, view.len(r.w), view.len(r.h), thickness, color(outline.color));
                    }
                    Shape::Circle { center, radius } => {
                        let p = view.point(center);
                        draw_circle(p.x, p.y, view.len(radius), color(*fill));
                        draw_circle_lines(p.x, p.y, view.len(radius), thickness, color(outline.color));
                    }
                }
            }
            ItemKind::Text { at, text, style } => draw_label(view, *at, text, style),
            ItemKind::Line { from, to, stroke } => {
                let (a, b) = (view.point(*from), view.point(*to));
                let c = color(stroke.color);
                draw_line(a.x, a.y, b.x, b.y, view.len(stroke.width).max(1.0), c);
                if stroke.arrow {
                    let dir = (b - a).normalize_or_zero();
                    let head = view.len(10.0);
                    let side = vec2(-dir.y, dir.x) * head * 0.5;
                    let base = b - dir * head;
                    draw_triangle(b, base + side, base - side, c);
                }
            }
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "convis".to_owned(),
        window_width: 1500,
        window_height: 800,
        ..Default::default()
    }
}

fn setup(vis: &VisConfig) -> Result<(AppConfig, Diagram, Scene), Box<dyn std::error::Error>> {
    let config = match &vis.config_path {
        Some(p) => AppConfig::load_or_default(p)?,
        None => AppConfig::default(),
    };
    let mut scene = Scene::new();
    let diagram = LayoutBuilder::new(config.render.clone()).build(&mut scene)?;
    Ok((config, diagram, scene))
}

#[macroquad::main(window_conf)]
async fn main() {
    let vis = VisConfig::from_env_and_args();
    let (config, diagram, mut scene) = match setup(&vis) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("convis_vis: {e}");
            return;
        }
    };

    let data = dataset::load_or_synthesize(vis.mnist_dir.as_deref(), config.sample_limit, config.seed);
    let [_, h, w] = config.render.input_dims;
    let mut model = TinyConvNet::new(h, w, config.seed);
    if vis.calibrate {
        model.calibrate(&data, data.len());
    }

    let background = color(config.render.palette.background);
    let mut scheduler = FrameScheduler::new(&config.scheduler);
    scheduler.start(Duration::from_secs_f64(get_time()));
    let mut textures = TextureCache::default();
    let mut view = View::fit(scene.bounds());
    let mut last: Option<FrameReport> = None;
    let mut status = String::new();

    loop {
        let now = Duration::from_secs_f64(get_time());
        if let Some(report) = scheduler.poll(now, &model, &data, &diagram, &mut scene) {
            last = Some(report.frame);
        }

        let dt = get_frame_time();
        let step = PAN_SPEED * dt / view.zoom;
        if is_key_down(KeyCode::Left) {
            view.offset.x -= step;
        }
        if is_key_down(KeyCode::Right) {
            view.offset.x += step;
        }
        if is_key_down(KeyCode::Up) {
            view.offset.y -= step;
        }
        if is_key_down(KeyCode::Down) {
            view.offset.y += step;
        }
        let (_, wheel) = mouse_wheel();
        if wheel != 0.0 {
            view.zoom = (view.zoom * if wheel > 0.0 { 1.1 } else { 1.0 / 1.1 }).clamp(0.1, 4.0);
        }
        if is_key_pressed(KeyCode::Space) {
            if scheduler.next_deadline().is_some() {
                scheduler.stop();
                status = "paused".to_string();
            } else {
                scheduler.start(now);
                status.clear();
            }
        }
        if is_key_pressed(KeyCode::S) {
            let snap = DiagramAdapter::new(&diagram, &scene).snapshot();
            status = match serde_json::to_vec_pretty(&snap) {
                Ok(bytes) => {
                    let written = vis
                        .snapshot_path
                        .parent()
                        .map_or(Ok(()), fs::create_dir_all)
                        .and_then(|_| fs::write(&vis.snapshot_path, bytes));
                    match written {
                        Ok(()) => format!("snapshot saved to {}", vis.snapshot_path.display()),
                        Err(e) => format!("snapshot failed: {e}"),
                    }
                }
                Err(e) => format!("snapshot failed: {e}"),
            };
        }
        if is_key_pressed(KeyCode::F) {
            view = View::fit(scene.bounds());
        }

        clear_background(background);
        draw_scene(&scene, &view, &mut textures);

        draw_rectangle(0.0, 0.0, screen_width(), HUD_H, Color::from_rgba(240, 240, 240, 255));
        let frame = last.as_ref().map(|r| r.to_string()).unwrap_or_default();
        let hud = format!(
            "frame {} / {} samples  {}  [arrows] pan  [wheel] zoom  [F] fit  [space] pause  [S] snapshot  {}",
            scheduler.ticks(),
            data.len(),
            frame,
            status
        );
        draw_text(&hud, 8.0, 19.0, 18.0, DARKGRAY);

        next_frame().await;
    }
}
