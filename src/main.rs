//! Progress review window and persistent user settings.

use dirs_next as dirs;
use eframe::{App, Frame, NativeOptions, egui};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod dispatch;
mod gateway;
mod model;
mod progress;
mod session;
#[cfg(test)]
mod test_support;

use dispatch::Dispatcher;
use gateway::{HttpGateway, TypeFilter, resolve_base_url};
use model::ExerciseField;
use progress::{Notice, NoticeLevel, ProgressView};
use session::{LocalStore, Session};

fn default_gateway_url() -> String {
    gateway::DEFAULT_BASE_URL.to_string()
}

fn default_refresh_after_save() -> bool {
    true
}

fn default_toast_seconds() -> u64 {
    3
}

/// Persistent preferences of the progress window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Settings {
    #[serde(default = "default_gateway_url")]
    gateway_url: String,
    /// Re-fetch the current filter after a successful save so the table shows
    /// what the server stored.
    #[serde(default = "default_refresh_after_save")]
    refresh_after_save: bool,
    #[serde(default = "default_toast_seconds")]
    toast_seconds: u64,
}

impl Settings {
    const FILE: &'static str = "training_arc_settings.json";

    fn path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join(Self::FILE))
    }

    fn load() -> Self {
        if let Some(path) = Self::path() {
            if let Ok(data) = std::fs::read_to_string(&path) {
                if let Ok(cfg) = serde_json::from_str(&data) {
                    return cfg;
                }
            }
        }
        Self::default()
    }

    fn save(&self) {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(data) = serde_json::to_string_pretty(self) {
                if let Err(e) = std::fs::write(&path, data) {
                    log::error!("Failed to save settings: {e}");
                }
            }
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            refresh_after_save: default_refresh_after_save(),
            toast_seconds: default_toast_seconds(),
        }
    }
}

/// Things the user did while the table was drawn, applied afterwards.
enum Action {
    Toggle(i64),
    Edit {
        workout_id: i64,
        exercise_id: i64,
        field: ExerciseField,
        value: String,
    },
    AskDelete {
        workout_id: i64,
        exercise_id: i64,
    },
    Save,
}

/// A signed-in progress page.
struct Live {
    view: ProgressView,
    dispatcher: Dispatcher,
}

struct ProgressApp {
    ctx: egui::Context,
    settings: Settings,
    settings_dirty: bool,
    store: LocalStore,
    live: Option<Live>,
    sign_in_text: String,
    confirm_delete: Option<(i64, i64)>,
    notice: Option<(Notice, Instant)>,
    show_settings: bool,
}

impl ProgressApp {
    fn new(ctx: egui::Context, settings: Settings, store: LocalStore) -> Self {
        let mut app = Self {
            ctx,
            settings,
            settings_dirty: false,
            store,
            live: None,
            sign_in_text: String::new(),
            confirm_delete: None,
            notice: None,
            show_settings: false,
        };
        if app.store.user_id().is_some() {
            app.sign_in();
        }
        app
    }

    /// Start a session from the local store and load all workouts.
    fn sign_in(&mut self) {
        let session = Session::begin(&self.store);
        let base_url = resolve_base_url(Some(&self.settings.gateway_url));
        log::info!("Using workout gateway at {base_url}");
        let ctx = self.ctx.clone();
        let mut dispatcher = Dispatcher::new(Arc::new(HttpGateway::new(base_url)))
            .with_refresh_after_save(self.settings.refresh_after_save)
            .with_waker(move || ctx.request_repaint());
        let mut view = ProgressView::new(session);
        dispatcher.set_filter(&mut view, TypeFilter::All);
        self.live = Some(Live { view, dispatcher });
    }

    fn sign_out(&mut self) {
        if let Some(live) = self.live.take() {
            live.view.into_session().end();
        }
        self.store.clear_user_id();
        self.store.save();
        self.confirm_delete = None;
    }

    fn notify(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => log::warn!("{}", notice.message),
            _ => log::info!("{}", notice.message),
        }
        self.notice = Some((notice, Instant::now()));
    }

    fn sign_in_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Training Arc | Start Your Saga.");
        ui.horizontal(|ui| {
            ui.label("User id:");
            ui.text_edit_singleline(&mut self.sign_in_text);
        });
        if ui.button("Log in").clicked() {
            match self.sign_in_text.trim().parse::<i64>() {
                Ok(id) => {
                    self.store.set_user_id(id);
                    self.store.save();
                    self.sign_in();
                }
                Err(_) => self.notify(Notice::error("User id must be a number.")),
            }
        }
    }

    fn progress_panel(live: &mut Live, ui: &mut egui::Ui) -> Vec<Action> {
        let mut actions = Vec::new();
        let view = &live.view;

        ui.heading("Your Progress");
        ui.group(|ui| {
            ui.vertical_centered(|ui| {
                ui.heading(view.total_workouts().to_string());
                ui.label("Total Workouts");
            });
        });

        let types = view.session().workout_types();
        let current = view.filter();
        let mut selected = current;
        let selected_text = match current {
            TypeFilter::All => "All".to_string(),
            TypeFilter::Type(id) => types
                .get(id)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| format!("Type {id}")),
        };
        ui.horizontal(|ui| {
            ui.label("Filter by workout type:");
            egui::ComboBox::from_id_source("type_filter_combo")
                .selected_text(selected_text)
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut selected, TypeFilter::All, "All");
                    for t in types.all() {
                        let value = TypeFilter::Type(t.id);
                        let label = ui.selectable_value(&mut selected, value, t.name.as_str());
                        if let Some(desc) = &t.description {
                            label.on_hover_text(desc.as_str());
                        }
                    }
                });
            if live.dispatcher.is_busy() {
                ui.spinner();
            }
        });
        if selected != current {
            live.dispatcher.set_filter(&mut live.view, selected);
        }
        let view = &live.view;

        ui.separator();
        egui::ScrollArea::vertical().show(ui, |ui| {
            egui::Grid::new("workout_header")
                .num_columns(3)
                .min_col_width(160.0)
                .show(ui, |ui| {
                    ui.strong("Date");
                    ui.strong("Type");
                    ui.strong("Notes");
                    ui.end_row();
                });
            let store = view.store();
            if store.is_empty() {
                ui.label("No workouts found.");
            }
            for w in store.workouts() {
                let expanded = view.expansion().is_expanded(w.id);
                let row = egui::Grid::new(("workout_row", w.id))
                    .num_columns(3)
                    .min_col_width(160.0)
                    .show(ui, |ui| {
                        let date = ui.selectable_label(expanded, w.display_date());
                        ui.label(w.kind.as_str());
                        ui.label(w.notes.as_deref().unwrap_or(""));
                        ui.end_row();
                        date.clicked()
                    });
                if row.inner || row.response.interact(egui::Sense::click()).clicked() {
                    actions.push(Action::Toggle(w.id));
                }
                if !expanded {
                    continue;
                }

                ui.indent(("exercises", w.id), |ui| {
                    if w.exercises.is_empty() {
                        ui.label("No exercises for this workout.");
                    } else {
                        egui::Grid::new(("exercise_grid", w.id))
                            .striped(true)
                            .num_columns(ExerciseField::ALL.len() + 1)
                            .show(ui, |ui| {
                                for field in ExerciseField::ALL {
                                    ui.strong(field.label());
                                }
                                ui.strong("Actions");
                                ui.end_row();

                                for ex in &w.exercises {
                                    let pending = view.edits().get(ex.id);
                                    for field in ExerciseField::ALL {
                                        let mut text = ex.field_text(field);
                                        let width = match field {
                                            ExerciseField::Name => 160.0,
                                            _ => 70.0,
                                        };
                                        let mut edit = egui::TextEdit::singleline(&mut text)
                                            .id_source(("exercise_field", ex.id, field.as_str()))
                                            .desired_width(width);
                                        if pending.is_some_and(|p| p.fields.contains_key(&field)) {
                                            edit = edit.text_color(egui::Color32::LIGHT_YELLOW);
                                        }
                                        if ui.add(edit).changed() {
                                            actions.push(Action::Edit {
                                                workout_id: w.id,
                                                exercise_id: ex.id,
                                                field,
                                                value: text,
                                            });
                                        }
                                    }
                                    let delete = ui
                                        .button("\u{1F5D1}")
                                        .on_hover_text("Delete exercise");
                                    if delete.clicked() {
                                        actions.push(Action::AskDelete {
                                            workout_id: w.id,
                                            exercise_id: ex.id,
                                        });
                                    }
                                    ui.end_row();
                                }
                            });
                    }
                    ui.horizontal(|ui| {
                        if ui.button("Save Changes").clicked() {
                            actions.push(Action::Save);
                        }
                        let pending = view.edits().len();
                        if pending > 0 {
                            ui.label(format!("{pending} exercise(s) with unsaved changes"));
                        }
                    });
                });
                ui.separator();
            }
        });
        actions
    }

    fn apply_actions(&mut self, actions: Vec<Action>) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let mut notices = Vec::new();
        for action in actions {
            match action {
                Action::Toggle(id) => live.view.toggle(id),
                Action::Edit {
                    workout_id,
                    exercise_id,
                    field,
                    value,
                } => {
                    live.view.record_edit(workout_id, exercise_id, field, &value);
                }
                Action::AskDelete {
                    workout_id,
                    exercise_id,
                } => self.confirm_delete = Some((workout_id, exercise_id)),
                Action::Save => notices.extend(live.dispatcher.save(&live.view)),
            }
        }
        for notice in notices {
            self.notify(notice);
        }
    }

    fn confirm_delete_window(&mut self, ctx: &egui::Context) {
        let Some((workout_id, exercise_id)) = self.confirm_delete else {
            return;
        };
        let mut answer = None;
        egui::Window::new("Delete exercise")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                let name = self
                    .live
                    .as_ref()
                    .and_then(|live| live.view.store().exercise(workout_id, exercise_id))
                    .map(|ex| ex.name.clone())
                    .unwrap_or_default();
                ui.label(format!("Delete exercise \"{name}\"?"));
                ui.label("Unsaved changes to it will be lost.");
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        answer = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        answer = Some(false);
                    }
                });
            });
        let Some(confirmed) = answer else {
            return;
        };
        self.confirm_delete = None;
        let notice = self.live.as_mut().and_then(|live| {
            live.dispatcher
                .delete_exercise(&live.view, workout_id, exercise_id, confirmed)
        });
        if let Some(notice) = notice {
            self.notify(notice);
        }
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        egui::Window::new("Settings")
            .open(&mut self.show_settings)
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid").num_columns(2).show(ui, |ui| {
                    ui.label("Gateway URL");
                    if ui.text_edit_singleline(&mut self.settings.gateway_url).changed() {
                        self.settings_dirty = true;
                    }
                    ui.end_row();
                    ui.label("");
                    ui.small("Takes effect on next sign-in.");
                    ui.end_row();

                    ui.label("After saving");
                    if ui
                        .checkbox(&mut self.settings.refresh_after_save, "Reload workouts")
                        .changed()
                    {
                        self.settings_dirty = true;
                        if let Some(live) = self.live.as_mut() {
                            live.dispatcher
                                .set_refresh_after_save(self.settings.refresh_after_save);
                        }
                    }
                    ui.end_row();

                    ui.label("Notice duration (s)");
                    if ui
                        .add(egui::Slider::new(&mut self.settings.toast_seconds, 1..=10))
                        .changed()
                    {
                        self.settings_dirty = true;
                    }
                    ui.end_row();
                });
            });
    }

    fn notice_toast(&mut self, ctx: &egui::Context) {
        let Some((notice, start)) = &self.notice else {
            return;
        };
        let ttl = Duration::from_secs(self.settings.toast_seconds);
        if start.elapsed() >= ttl {
            self.notice = None;
            return;
        }
        let color = match notice.level {
            NoticeLevel::Info => ctx.style().visuals.text_color(),
            NoticeLevel::Success => egui::Color32::LIGHT_GREEN,
            NoticeLevel::Error => egui::Color32::LIGHT_RED,
        };
        egui::Area::new(egui::Id::new("notice_toast"))
            .anchor(egui::Align2::RIGHT_TOP, [-10.0, 30.0])
            .show(ctx, |ui| {
                ui.colored_label(color, notice.message.as_str());
            });
        ctx.request_repaint_after(ttl.saturating_sub(start.elapsed()));
    }
}

impl App for ProgressApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        let mut notices = Vec::new();
        if let Some(live) = self.live.as_mut() {
            notices = live.dispatcher.poll(&mut live.view);
        }
        for notice in notices {
            self.notify(notice);
        }

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Settings").clicked() {
                        self.show_settings = true;
                        ui.close_menu();
                    }
                    if let Some(live) = self.live.as_mut() {
                        if ui.button("Reload").clicked() {
                            live.dispatcher.reload(&mut live.view);
                            ui.close_menu();
                        }
                    }
                    if self.live.is_some() && ui.button("Sign out").clicked() {
                        self.sign_out();
                        ui.close_menu();
                    }
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });

        let mut actions = Vec::new();
        egui::CentralPanel::default().show(ctx, |ui| match self.live.as_mut() {
            Some(live) => actions = Self::progress_panel(live, ui),
            None => self.sign_in_panel(ui),
        });
        self.apply_actions(actions);

        self.confirm_delete_window(ctx);
        if self.show_settings {
            self.settings_window(ctx);
        }
        self.notice_toast(ctx);

        if self.settings_dirty {
            self.settings.save();
            self.settings_dirty = false;
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.settings.save();
        if let Some(mut live) = self.live.take() {
            if live.dispatcher.is_busy() {
                log::info!("Waiting for in-flight workout requests");
                live.dispatcher.wait_idle(&mut live.view);
            }
            live.view.into_session().end();
        }
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();
    let options = NativeOptions::default();
    eframe::run_native(
        "Training Arc",
        options,
        Box::new(|cc| {
            Box::new(ProgressApp::new(
                cc.egui_ctx.clone(),
                Settings::load(),
                LocalStore::load(),
            ))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::ENV_MUTEX;

    fn with_config_dir(f: impl FnOnce()) {
        use std::env;

        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let prev_config = env::var_os("XDG_CONFIG_HOME");
        unsafe {
            env::set_var("XDG_CONFIG_HOME", dir.path());
        }

        f();

        if let Some(val) = prev_config {
            unsafe {
                env::set_var("XDG_CONFIG_HOME", val);
            }
        } else {
            unsafe {
                env::remove_var("XDG_CONFIG_HOME");
            }
        }
    }

    #[test]
    fn settings_roundtrip() {
        let s = Settings {
            gateway_url: "http://example:8080".into(),
            refresh_after_save: false,
            toast_seconds: 7,
        };
        let json = serde_json::to_string(&s).unwrap();
        let loaded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, loaded);
    }

    #[test]
    fn missing_settings_fields_use_defaults() {
        let loaded: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, Settings::default());
        assert!(loaded.refresh_after_save);
        assert_eq!(loaded.gateway_url, "http://localhost:4040");
    }

    #[test]
    fn settings_persist_in_config_dir() {
        with_config_dir(|| {
            let mut s = Settings::default();
            s.refresh_after_save = false;
            s.save();
            assert!(!Settings::load().refresh_after_save);

            std::fs::write(Settings::path().unwrap(), "not json").unwrap();
            assert_eq!(Settings::load(), Settings::default());
        });
    }

    #[test]
    fn starts_signed_out_without_user_id() {
        let app = ProgressApp::new(
            egui::Context::default(),
            Settings::default(),
            LocalStore::default(),
        );
        assert!(app.live.is_none());
    }

    #[test]
    fn sign_out_clears_user_and_session() {
        with_config_dir(|| {
            let mut store = LocalStore::default();
            store.set_user_id(4);
            let mut settings = Settings::default();
            // nothing listens here; the initial fetch just fails in the background
            settings.gateway_url = "http://127.0.0.1:1".into();
            let mut app = ProgressApp::new(egui::Context::default(), settings, store);
            assert_eq!(
                app.live.as_ref().and_then(|l| l.view.session().user_id()),
                Some(4)
            );

            app.sign_out();
            assert!(app.live.is_none());
            assert_eq!(LocalStore::load().user_id(), None);
        });
    }

    #[test]
    fn actions_drive_view_and_dispatcher() {
        let mut app = ProgressApp::new(
            egui::Context::default(),
            Settings::default(),
            LocalStore::default(),
        );
        let workouts = serde_json::json!([{"id": 1, "exercises": [{"id": 10, "name": "Bench"}]}]);
        let gateway = Arc::new(test_support::RecordingGateway::with_workouts(workouts));
        let mut dispatcher = Dispatcher::new(gateway.clone());
        let mut view = ProgressView::new(Session::new(Some(1), Vec::new()));
        dispatcher.set_filter(&mut view, TypeFilter::All);
        dispatcher.wait_idle(&mut view);
        app.live = Some(Live { view, dispatcher });

        app.apply_actions(vec![
            Action::Toggle(1),
            Action::Edit {
                workout_id: 1,
                exercise_id: 10,
                field: ExerciseField::Sets,
                value: "4".into(),
            },
            Action::AskDelete {
                workout_id: 1,
                exercise_id: 10,
            },
        ]);
        assert_eq!(app.confirm_delete, Some((1, 10)));
        let live = app.live.as_ref().unwrap();
        assert!(live.view.expansion().is_expanded(1));
        assert_eq!(live.view.edits().len(), 1);

        app.confirm_delete = None;
        app.apply_actions(vec![Action::Save]);
        let live = app.live.as_mut().unwrap();
        live.dispatcher.wait_idle(&mut live.view);
        assert!(live.view.edits().is_empty());
        assert_eq!(gateway.calls().len(), 3);
    }
}
