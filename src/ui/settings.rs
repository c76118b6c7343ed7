use std::path::PathBuf;

use eframe::egui;
use persona_backend::config::Settings;
use persona_backend::env_file::{write_env_file, SettingsUpdate};
use persona_backend::generation::{
    DIMENSION_STEP, MAX_CFG_SCALE, MAX_DIMENSION, MAX_STEPS, MIN_CFG_SCALE, MIN_DIMENSION,
    MIN_STEPS,
};

pub struct SettingsPanel {
    pub update: SettingsUpdate,
    pub show: bool,
    current: Settings,
    env_path: PathBuf,
    status: Option<Result<String, String>>,
    show_keys: bool,
}

impl SettingsPanel {
    pub fn new(settings: Settings, env_path: PathBuf) -> Self {
        Self {
            update: SettingsUpdate::from_settings(&settings),
            show: false,
            current: settings,
            env_path,
            status: None,
            show_keys: false,
        }
    }

    /// Write the edited values to the env file. The running process keeps its settings.
    pub fn save(&mut self) {
        self.status = Some(
            match write_env_file(&self.env_path, &self.update, &self.current) {
                Ok(()) => Ok(format!(
                    "Saved to {}. Restart the application for changes to take effect.",
                    self.env_path.display()
                )),
                Err(e) => Err(format!("{:#}", e)),
            },
        );
    }

    pub fn render(&mut self, ctx: &egui::Context) {
        if !self.show {
            return;
        }

        let mut open = self.show;
        let mut save_clicked = false;
        egui::Window::new("⚙ Settings")
            .open(&mut open)
            .default_width(460.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("API keys");
                    ui.add_space(4.0);
                    ui.checkbox(&mut self.show_keys, "Show keys");
                    ui.horizontal(|ui| {
                        ui.label("OpenRouter:");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.update.openrouter_api_key)
                                .password(!self.show_keys),
                        );
                    });
                    ui.horizontal(|ui| {
                        ui.label("Stable Diffusion:");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.update.stable_diffusion_api_key)
                                .password(!self.show_keys),
                        );
                    });
                    ui.add_space(12.0);

                    ui.separator();
                    ui.heading("Server");
                    ui.horizontal(|ui| {
                        ui.label("API host:");
                        ui.text_edit_singleline(&mut self.update.api_host);
                    });
                    ui.horizontal(|ui| {
                        ui.label("API port:");
                        ui.add(egui::DragValue::new(&mut self.update.api_port).range(1..=65535));
                        ui.label("Frontend port:");
                        ui.add(egui::DragValue::new(&mut self.update.frontend_port).range(1..=65535));
                    });
                    ui.add_space(12.0);

                    ui.separator();
                    ui.heading("Models");
                    ui.horizontal(|ui| {
                        ui.label("Chat model:");
                        ui.text_edit_singleline(&mut self.update.default_chat_model);
                    });
                    ui.horizontal(|ui| {
                        ui.label("Image model:");
                        ui.text_edit_singleline(&mut self.update.default_image_model);
                    });
                    ui.add_space(12.0);

                    ui.separator();
                    ui.heading("Image defaults");
                    ui.add(
                        egui::Slider::new(&mut self.update.default_sd_steps, MIN_STEPS..=MAX_STEPS)
                            .text("Steps"),
                    );
                    ui.add(
                        egui::Slider::new(
                            &mut self.update.default_sd_cfg_scale,
                            MIN_CFG_SCALE..=MAX_CFG_SCALE,
                        )
                        .step_by(0.5)
                        .text("CFG scale"),
                    );
                    ui.add(
                        egui::Slider::new(
                            &mut self.update.default_sd_width,
                            MIN_DIMENSION..=MAX_DIMENSION,
                        )
                        .step_by(f64::from(DIMENSION_STEP))
                        .text("Width"),
                    );
                    ui.add(
                        egui::Slider::new(
                            &mut self.update.default_sd_height,
                            MIN_DIMENSION..=MAX_DIMENSION,
                        )
                        .step_by(f64::from(DIMENSION_STEP))
                        .text("Height"),
                    );
                    ui.add_space(12.0);

                    ui.horizontal(|ui| {
                        if ui.button("💾 Save").clicked() {
                            save_clicked = true;
                        }
                        if ui.button("Reset").clicked() {
                            self.update = SettingsUpdate::from_settings(&self.current);
                            self.status = None;
                        }
                    });

                    match &self.status {
                        Some(Ok(message)) => {
                            ui.colored_label(egui::Color32::LIGHT_GREEN, message);
                        }
                        Some(Err(message)) => {
                            ui.colored_label(egui::Color32::RED, message);
                        }
                        None => {}
                    }
                    ui.label(
                        egui::RichText::new(format!("Writes {}", self.env_path.display()))
                            .small()
                            .weak(),
                    );
                });
            });

        if save_clicked {
            self.save();
        }
        self.show = open;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_backend::env_file::read_env_file;

    #[test]
    fn save_writes_env_file_and_reports_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "CUSTOM_FLAG=1\n").expect("seed");

        let mut panel = SettingsPanel::new(Settings::default(), env_path.clone());
        panel.update.openrouter_api_key = "sk-or-test".to_string();
        panel.update.default_sd_steps = 40;
        panel.save();

        match &panel.status {
            Some(Ok(message)) => assert!(message.contains("Restart")),
            other => panic!("unexpected status: {:?}", other),
        }
        let written = read_env_file(&env_path).expect("read env");
        assert_eq!(written.get("OPENROUTER_API_KEY").map(String::as_str), Some("sk-or-test"));
        assert_eq!(written.get("DEFAULT_SD_STEPS").map(String::as_str), Some("40"));
        assert_eq!(written.get("CUSTOM_FLAG").map(String::as_str), Some("1"));
    }

    #[test]
    fn invalid_values_surface_as_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut panel = SettingsPanel::new(Settings::default(), dir.path().join(".env"));
        panel.update.default_sd_width = 300;
        panel.save();
        assert!(matches!(panel.status, Some(Err(_))));
        assert!(!dir.path().join(".env").exists());
    }

    #[test]
    fn loaded_values_within_api_bounds_can_be_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::from_env_map([("DEFAULT_SD_STEPS", "120"), ("DEFAULT_SD_WIDTH", "1536")]);
        let mut panel = SettingsPanel::new(settings, dir.path().join(".env"));
        panel.update.default_chat_model = "openai/gpt-4o".to_string();
        panel.save();
        assert!(matches!(panel.status, Some(Ok(_))), "{:?}", panel.status);
    }
}
