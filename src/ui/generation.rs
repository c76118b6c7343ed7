use eframe::egui::{self, RichText};

use persona_backend::config::Settings;
use persona_backend::generation::{
    GenerationRequest, GenerationResponse, DIMENSION_STEP, MAX_CFG_SCALE, MAX_DIMENSION,
    MAX_STEPS, MIN_CFG_SCALE, MIN_DIMENSION, MIN_STEPS,
};

use super::{fit_within, texture_from_base64};

const IMAGE_SIDE: f32 = 384.0;

pub struct GenerationPanel {
    prompt: String,
    negative_prompt: String,
    steps: u32,
    cfg_scale: f32,
    width: u32,
    height: u32,
    use_seed: bool,
    seed: i64,
    texture: Option<egui::TextureHandle>,
    last_response: Option<GenerationResponse>,
    error: Option<String>,
}

impl GenerationPanel {
    pub fn new(settings: &Settings) -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            steps: settings.default_sd_steps.clamp(MIN_STEPS, MAX_STEPS),
            cfg_scale: settings.default_sd_cfg_scale.clamp(MIN_CFG_SCALE, MAX_CFG_SCALE),
            width: snap_dimension(settings.default_sd_width),
            height: snap_dimension(settings.default_sd_height),
            use_seed: false,
            seed: 0,
            texture: None,
            last_response: None,
            error: None,
        }
    }

    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            prompt: self.prompt.trim().to_string(),
            negative_prompt: Some(self.negative_prompt.trim().to_string()).filter(|n| !n.is_empty()),
            model: None,
            steps: Some(self.steps),
            cfg_scale: Some(self.cfg_scale),
            width: Some(self.width),
            height: Some(self.height),
            seed: self.use_seed.then_some(self.seed),
            return_image: true,
        }
    }

    pub fn apply_response(&mut self, ctx: &egui::Context, response: GenerationResponse) {
        self.texture = None;
        self.error = None;
        if let Some(data) = response.image_base64.as_deref() {
            match texture_from_base64(ctx, "generated_image", data) {
                Ok(texture) => self.texture = Some(texture),
                Err(e) => self.error = Some(format!("{:#}", e)),
            }
        }
        self.last_response = Some(response);
    }

    pub fn render(&mut self, ui: &mut egui::Ui, busy: bool) -> Option<GenerationRequest> {
        let mut request = None;

        ui.heading("Image generation");
        ui.label("Prompt:");
        ui.text_edit_multiline(&mut self.prompt);
        ui.label("Negative prompt:");
        ui.text_edit_singleline(&mut self.negative_prompt);

        ui.add(egui::Slider::new(&mut self.steps, MIN_STEPS..=MAX_STEPS).text("Steps"));
        ui.add(
            egui::Slider::new(&mut self.cfg_scale, MIN_CFG_SCALE..=MAX_CFG_SCALE)
                .step_by(0.5)
                .text("CFG scale"),
        );
        ui.add(
            egui::Slider::new(&mut self.width, MIN_DIMENSION..=MAX_DIMENSION)
                .step_by(f64::from(DIMENSION_STEP))
                .text("Width"),
        );
        ui.add(
            egui::Slider::new(&mut self.height, MIN_DIMENSION..=MAX_DIMENSION)
                .step_by(f64::from(DIMENSION_STEP))
                .text("Height"),
        );
        ui.horizontal(|ui| {
            ui.checkbox(&mut self.use_seed, "Fixed seed");
            ui.add_enabled(
                self.use_seed,
                egui::DragValue::new(&mut self.seed).range(0..=i64::from(u32::MAX)),
            );
        });

        let ready = !self.prompt.trim().is_empty() && !busy;
        if ui.add_enabled(ready, egui::Button::new("🎨 Generate image")).clicked() {
            request = Some(self.request());
        }
        if busy {
            ui.label(RichText::new("Generating...").weak().italics());
        }
        if let Some(error) = &self.error {
            ui.colored_label(egui::Color32::RED, error);
        }

        if let Some(texture) = &self.texture {
            ui.add_space(6.0);
            ui.image((texture.id(), fit_within(texture.size_vec2(), IMAGE_SIDE)));
        }
        if let Some(response) = &self.last_response {
            let seed = response
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "random".to_string());
            ui.label(
                RichText::new(format!(
                    "{} · {}x{} · {} steps · seed {}",
                    response.model,
                    response.parameters.width,
                    response.parameters.height,
                    response.parameters.steps,
                    seed
                ))
                .small()
                .weak(),
            );
        }

        request
    }
}

/// Clamp to the accepted range and round to the nearest multiple of the step.
fn snap_dimension(value: u32) -> u32 {
    let clamped = value.clamp(MIN_DIMENSION, MAX_DIMENSION);
    ((clamped + DIMENSION_STEP / 2) / DIMENSION_STEP * DIMENSION_STEP).min(MAX_DIMENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_configured_sizes_onto_slider_grid() {
        assert_eq!(snap_dimension(512), 512);
        assert_eq!(snap_dimension(500), 512);
        assert_eq!(snap_dimension(100), 128);
        assert_eq!(snap_dimension(10), 64);
        assert_eq!(snap_dimension(1536), 1536);
        assert_eq!(snap_dimension(4096), 2048);
    }

    #[test]
    fn request_uses_panel_values() {
        let mut panel = GenerationPanel::new(&Settings::default());
        panel.prompt = "  a paper boat ".to_string();
        let request = panel.request();
        assert_eq!(request.prompt, "a paper boat");
        assert_eq!(request.width, Some(512));
        assert_eq!(request.seed, None);
        assert!(request.negative_prompt.is_none());

        let wide = GenerationPanel::new(&Settings::from_env_map([
            ("DEFAULT_SD_STEPS", "120"),
            ("DEFAULT_SD_CFG_SCALE", "30"),
        ]));
        assert_eq!(wide.request().steps, Some(120));
        assert_eq!(wide.request().cfg_scale, Some(30.0));

        panel.use_seed = true;
        panel.seed = 11;
        assert_eq!(panel.request().seed, Some(11));
    }
}
