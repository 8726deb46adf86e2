//! GUI module for the application.
//!
//! Provides the decode form using egui/eframe.

pub mod render;
pub mod state;

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

use eframe::egui::{self, TextureHandle, Vec2};
use image::DynamicImage;

use crate::acquire::ImageFetcher;
use crate::i18n::t;
use crate::session::{DecodeRequest, PipelineEvent, Session};

use state::{DecodeStatus, GuiState, Stage};

/// Main GUI application struct.
pub struct GuiApp {
    /// Application state.
    state: GuiState,
    session: Arc<Session>,
    fetcher: Arc<dyn ImageFetcher>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    /// Texture of the image being decoded.
    preview: Option<TextureHandle>,
}

impl GuiApp {
    /// Create a new GUI application instance.
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        session: Arc<Session>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self::setup_fonts(&cc.egui_ctx);

        let (events_tx, events_rx) = channel();
        let enhance = session.config().enhance_contrast;
        Self {
            state: GuiState::new(enhance),
            session,
            fetcher,
            events_tx,
            events_rx,
            preview: None,
        }
    }

    /// Setup fonts with Japanese support, for the ja message catalog.
    fn setup_fonts(ctx: &egui::Context) {
        let mut fonts = egui::FontDefinitions::default();

        let font_paths = [
            "C:\\Windows\\Fonts\\YuGothM.ttc",
            "C:\\Windows\\Fonts\\meiryo.ttc",
            "/System/Library/Fonts/ヒラギノ角ゴシック W3.ttc",
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
            "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
        ];

        for font_path in &font_paths {
            if let Ok(font_data) = std::fs::read(font_path) {
                fonts.font_data.insert(
                    "cjk_font".to_owned(),
                    egui::FontData::from_owned(font_data).into(),
                );

                // Fallback after the default fonts so Latin text is unchanged
                fonts
                    .families
                    .entry(egui::FontFamily::Proportional)
                    .or_default()
                    .push("cjk_font".to_owned());
                fonts
                    .families
                    .entry(egui::FontFamily::Monospace)
                    .or_default()
                    .push("cjk_font".to_owned());

                crate::log(&format!("Loaded CJK font from: {}", font_path));
                break;
            }
        }

        ctx.set_fonts(fonts);
    }

    fn set_preview(&mut self, ctx: &egui::Context, image: &DynamicImage) {
        let rgba = image.to_rgba8();
        let size = [rgba.width() as usize, rgba.height() as usize];
        let pixels = rgba.into_raw();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(size, &pixels);
        self.preview = Some(ctx.load_texture("preview", color_image, egui::TextureOptions::LINEAR));
    }

    /// Drain progress events from the worker thread.
    fn poll_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                PipelineEvent::Preview(image) => self.set_preview(ctx, &image),
                PipelineEvent::LoadingModel => {
                    self.state.status = DecodeStatus::Running(Stage::LoadingModel);
                }
                PipelineEvent::Processing => {
                    self.state.status = DecodeStatus::Running(Stage::Processing);
                }
                PipelineEvent::Finished(Ok(outcome)) => {
                    self.state.status = DecodeStatus::Completed(outcome);
                }
                PipelineEvent::Finished(Err(err)) => {
                    self.preview = None;
                    self.state.status = DecodeStatus::Failed(err);
                }
            }
        }
    }

    /// Accept files dropped onto the window as the file input.
    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        if self.state.status.is_running() {
            return;
        }
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if let Some(path) = dropped.into_iter().find_map(|f| f.path) {
            self.state.set_file(path.display().to_string());
        }
    }

    /// Handle Decode button click.
    fn handle_decode(&mut self) {
        match self.state.request() {
            Ok(request) => self.start(request),
            Err(err) => {
                self.state.status = DecodeStatus::Failed(err);
                self.state.last_request = None;
            }
        }
    }

    /// Handle Retry button click.
    fn handle_retry(&mut self) {
        if let Some(request) = self.state.last_request.clone() {
            self.start(request);
        }
    }

    fn handle_reset(&mut self) {
        self.state.reset();
        self.preview = None;
    }

    fn start(&mut self, request: DecodeRequest) {
        let started = self.session.spawn_decode(
            request.clone(),
            self.fetcher.clone(),
            self.events_tx.clone(),
        );
        if started {
            crate::log(&format!("GUI: Started decode of {:?}", request.input));
            self.state.status = DecodeStatus::Running(Stage::LoadingImage);
            self.state.last_request = Some(request);
        }
    }
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_events(ctx);
        self.handle_dropped_files(ctx);

        // Keep polling while the worker thread is running
        if self.state.status.is_running() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        let config = self.session.config();
        let (show_timing, show_confidences) = (config.show_timing, config.show_confidences);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(t("appTitle"));
            ui.add_space(12.0);

            egui::ScrollArea::vertical().show(ui, |ui| {
                render::render_inputs(ui, &mut self.state);

                let actions = render::render_controls(ui, &self.state);
                if actions.decode {
                    self.handle_decode();
                }
                if actions.retry {
                    self.handle_retry();
                }
                if actions.reset {
                    self.handle_reset();
                }

                render::render_preview(ui, self.preview.as_ref());
                render::render_result(ui, &self.state, show_timing, show_confidences);
            });
        });
    }
}

/// Run the GUI application.
/// This function blocks until the window is closed.
pub fn run_gui(session: Arc<Session>, fetcher: Arc<dyn ImageFetcher>) -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(Vec2::new(520.0, 480.0))
            .with_min_inner_size(Vec2::new(360.0, 320.0))
            .with_title(t("appTitle")),
        ..Default::default()
    };

    eframe::run_native(
        &t("appTitle"),
        options,
        Box::new(move |cc| {
            crate::log("GUI: Creating GuiApp instance...");
            Ok(Box::new(GuiApp::new(cc, session, fetcher)))
        }),
    )
}
