//! Interactive viewer for the built-in demos.
//!
//! The simulation runs on its own thread (see [`SimulationRunner`]); this app
//! only sends controls and paints the latest published snapshot. When a
//! config file is given it is watched and the simulation is rebuilt on save.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use eframe::egui;
use glam::{Vec2, Vec4};
use log::{info, warn};
use notify::{Event, RecommendedWatcher, Watcher};
use psim_core::{ParticleDisplay, ParticleInit, SimulationConfig, Snapshot};

use crate::demos::Demo;
use crate::runner::{Control, SimulationRunner};

/// Simulation thread tick.
const TICK: Duration = Duration::from_millis(4);

pub struct ViewerApp {
    demo: Demo,
    seed: u64,
    config_path: Option<PathBuf>,
    config: SimulationConfig,
    runner: Option<SimulationRunner>,
    last_load_error: Option<String>,
    playing: bool,
    speed_multiplier: f32,
    // Kept alive to maintain file watching
    file_watcher: Option<RecommendedWatcher>,
    file_receiver: mpsc::Receiver<notify::Result<Event>>,
}

impl ViewerApp {
    pub fn new(
        demo: Demo,
        seed: u64,
        config_path: Option<PathBuf>,
        config: SimulationConfig,
        _cc: &eframe::CreationContext<'_>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let watcher = config_path.as_ref().and_then(|path| {
            let mut watcher = notify::recommended_watcher(move |res| {
                // The receiver is gone during shutdown.
                let _ = tx.send(res);
            })
            .ok()?;
            match watcher.watch(path, notify::RecursiveMode::NonRecursive) {
                Ok(()) => Some(watcher),
                Err(e) => {
                    warn!("not watching {}: {}", path.display(), e);
                    None
                }
            }
        });

        let mut app = Self {
            demo,
            seed,
            config_path,
            config,
            runner: None,
            last_load_error: None,
            playing: false,
            speed_multiplier: 1.0,
            file_watcher: watcher,
            file_receiver: rx,
        };
        app.restart();
        app
    }

    /// Build a fresh simulation from the current config.
    fn restart(&mut self) {
        // Join the old thread before starting the new one.
        self.runner = None;
        self.playing = false;

        let built = self
            .demo
            .builder(self.config.clone(), self.seed)
            .and_then(|builder| builder.build())
            .and_then(|sim| SimulationRunner::spawn(sim, TICK));
        match built {
            Ok(runner) => {
                runner.send(Control::SetSpeed(self.speed_multiplier));
                self.runner = Some(runner);
                self.last_load_error = None;
            }
            Err(e) => {
                self.last_load_error = Some(format!("{}", e));
            }
        }
    }

    fn reload_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match SimulationConfig::from_toml_file(path) {
            Ok(config) => {
                info!("reloaded {}", path.display());
                self.config = config;
                self.restart();
            }
            Err(e) => {
                // Keep the running simulation; show why the new config was rejected.
                self.last_load_error = Some(format!("{}", e));
            }
        }
    }

    fn check_file_changes(&mut self) {
        let mut needs_reload = false;
        while let Ok(event) = self.file_receiver.try_recv() {
            match event {
                Ok(Event {
                    kind: notify::EventKind::Modify(_),
                    paths,
                    ..
                }) => {
                    if let Some(path) = &self.config_path {
                        needs_reload |= paths.iter().any(|p| p.ends_with(path) || path.ends_with(p));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("file watcher error: {}", e),
            }
        }

        if needs_reload {
            self.reload_config();
        }
    }

    fn send(&self, control: Control) {
        if let Some(runner) = &self.runner {
            runner.send(control);
        }
    }

    fn controls_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button(if self.playing { "⏸ Pause" } else { "▶ Play" }).clicked() {
                self.playing = !self.playing;
                self.send(if self.playing { Control::Play } else { Control::Pause });
            }

            if ui.button("⏮ Reset").clicked() {
                self.restart();
            }

            if ui.button("⏭ Step").clicked() {
                self.send(Control::StepOnce);
            }

            ui.separator();

            ui.label("Speed:");
            if ui
                .add(egui::Slider::new(&mut self.speed_multiplier, 0.1..=10.0))
                .changed()
            {
                self.send(Control::SetSpeed(self.speed_multiplier));
            }

            ui.separator();

            if let Some(runner) = &self.runner {
                let status = runner.status();
                ui.label(format!(
                    "{} | t = {:.2}s | step {} | {} particles",
                    status.state, status.time, status.step_count, status.particles
                ));
                if status.steps_dropped > 0 {
                    ui.label(
                        egui::RichText::new(format!("{} steps dropped", status.steps_dropped))
                            .color(egui::Color32::YELLOW),
                    );
                }
            }
        });
    }

    /// Spawn a particle at the clicked world position.
    fn spawn_at(&self, world: Vec2) {
        if let Some(runner) = &self.runner {
            runner.commands().send(move |store| {
                store.add(
                    ParticleInit::at(world)
                        .with_size(1.0)
                        .with_color(Vec4::new(1.0, 1.0, 1.0, 1.0)),
                )?;
                Ok(())
            });
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.check_file_changes();

        egui::TopBottomPanel::top("controls").show(ctx, |ui| self.controls_ui(ui));

        let runtime_error = self.runner.as_ref().and_then(|r| r.status().error);
        let error = self.last_load_error.clone().or(runtime_error);
        if let Some(error) = &error {
            egui::TopBottomPanel::bottom("errors").show(ctx, |ui| {
                ui.set_max_height(100.0);
                ui.label(egui::RichText::new(format!("Error: {}", error)).color(egui::Color32::RED));
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            let rect = ui.max_rect();
            let response = ui.allocate_rect(rect, egui::Sense::click());
            let view = View::new(rect, self.demo.view_extent());

            if let Some(snapshot) = self.runner.as_ref().and_then(|r| r.snapshots().read()) {
                paint_snapshot(ui.painter(), &view, &snapshot);
            }

            if response.clicked() {
                if let Some(pointer) = response.interact_pointer_pos() {
                    self.spawn_at(view.to_world(pointer));
                }
            }
        });

        if self.playing {
            ctx.request_repaint();
        } else if self.file_watcher.is_some() {
            // Poll for config edits while idle.
            ctx.request_repaint_after(Duration::from_millis(250));
        }
    }
}

/// World to screen transform, y up.
struct View {
    center: egui::Pos2,
    scale: f32,
}

impl View {
    fn new(rect: egui::Rect, half_extent: f32) -> Self {
        let world_range = 2.0 * half_extent;
        Self {
            center: rect.center(),
            scale: (rect.width().min(rect.height()) / world_range) * 0.9,
        }
    }

    fn to_screen(&self, world: Vec2) -> egui::Pos2 {
        self.center + egui::vec2(world.x * self.scale, -world.y * self.scale)
    }

    fn to_world(&self, screen: egui::Pos2) -> Vec2 {
        let offset = screen - self.center;
        Vec2::new(offset.x / self.scale, -offset.y / self.scale)
    }
}

fn to_color32(color: Vec4) -> egui::Color32 {
    let [r, g, b, a] = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round().to_array();
    egui::Color32::from_rgba_unmultiplied(r as u8, g as u8, b as u8, a as u8)
}

fn paint_snapshot(painter: &egui::Painter, view: &View, snapshot: &Snapshot) {
    let particles = snapshot
        .positions()
        .iter()
        .zip(snapshot.sizes())
        .zip(snapshot.colors());

    for ((position, size), color) in particles {
        let screen_pos = view.to_screen(*position);
        let color = to_color32(*color);
        match snapshot.display() {
            ParticleDisplay::Point => {
                painter.circle_filled(screen_pos, 1.5, color);
            }
            ParticleDisplay::Circle => {
                let radius = (size * view.scale).max(1.5);
                painter.circle_stroke(screen_pos, radius, egui::Stroke::new(1.0, color));
            }
            ParticleDisplay::Disc => {
                let radius = (size * view.scale).max(1.5);
                painter.circle_filled(screen_pos, radius, color);
            }
        }
    }
}
