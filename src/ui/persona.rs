use std::path::PathBuf;

use base64::Engine;
use eframe::egui::{self, RichText};

use persona_backend::analysis::{AnalysisResponse, UploadResponse};
use persona_backend::persona::{
    ImageAnalysisRequest, Persona, PersonaCreateRequest, PersonaTraits,
    PersonalityGenerationResponse,
};
use persona_backend::personality::GeneratedPersonality;

use super::{fit_within, texture_from_bytes};

const PREVIEW_SIDE: f32 = 256.0;

pub enum PersonaAction {
    Generate(ImageAnalysisRequest),
    Refresh,
    Select(Option<String>),
    RefreshPersonalities,
    ShowPersonality(String),
    Upload { filename: String, bytes: Vec<u8> },
    Analyze(String),
}

/// Image upload, persona generation and persona selection.
pub struct PersonaPanel {
    image_path: Option<PathBuf>,
    image_bytes: Option<Vec<u8>>,
    image_base64: Option<String>,
    preview: Option<egui::TextureHandle>,
    object_name: String,
    description: String,
    pub personas: Vec<Persona>,
    pub selected_id: Option<String>,
    pub last_generated: Option<PersonalityGenerationResponse>,
    pub personalities: Vec<String>,
    pub personality_detail: Option<(String, Vec<GeneratedPersonality>)>,
    pub upload: Option<UploadResponse>,
    pub analysis: Option<AnalysisResponse>,
    analysis_input: String,
    error: Option<String>,
}

impl PersonaPanel {
    pub fn new() -> Self {
        Self {
            image_path: None,
            image_bytes: None,
            image_base64: None,
            preview: None,
            object_name: String::new(),
            description: String::new(),
            personas: Vec::new(),
            selected_id: None,
            last_generated: None,
            personalities: Vec::new(),
            personality_detail: None,
            upload: None,
            analysis: None,
            analysis_input: String::new(),
            error: None,
        }
    }

    pub fn selected(&self) -> Option<&Persona> {
        let id = self.selected_id.as_deref()?;
        self.personas.iter().find(|p| p.id == id)
    }

    /// The create request that follows a successful generation.
    pub fn create_request_for(&self, generated: &PersonalityGenerationResponse) -> PersonaCreateRequest {
        let description = if self.description.trim().is_empty() {
            format!("An image of {}", generated.object_name)
        } else {
            self.description.trim().to_string()
        };
        PersonaCreateRequest {
            name: generated.object_name.clone(),
            description,
            traits: PersonaTraits {
                system_prompt: Some(generated.system_prompt.clone()),
                ..Default::default()
            },
            image_base64: self.image_base64.clone(),
            object_name: Some(generated.object_name.clone()),
        }
    }

    fn pick_image(&mut self, ctx: &egui::Context) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "webp", "gif"])
            .pick_file()
        else {
            return;
        };

        match std::fs::read(&path) {
            Ok(bytes) => match texture_from_bytes(ctx, "persona_preview", &bytes) {
                Ok(texture) => {
                    if self.object_name.trim().is_empty() {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            self.object_name = stem.replace(['_', '-'], " ");
                        }
                    }
                    self.image_base64 =
                        Some(base64::engine::general_purpose::STANDARD.encode(&bytes));
                    self.image_bytes = Some(bytes);
                    self.upload = None;
                    self.preview = Some(texture);
                    self.image_path = Some(path);
                    self.error = None;
                }
                Err(e) => self.error = Some(format!("{:#}", e)),
            },
            Err(e) => self.error = Some(format!("Failed to read {}: {}", path.display(), e)),
        }
    }

    pub fn render(&mut self, ui: &mut egui::Ui, busy: bool) -> Option<PersonaAction> {
        let mut action = None;

        ui.heading("Persona");
        ui.add_space(4.0);

        if ui.button("📁 Choose image...").clicked() {
            self.pick_image(ui.ctx());
        }
        if let Some(path) = &self.image_path {
            ui.label(RichText::new(path.display().to_string()).small().weak());
        }
        if let Some(texture) = &self.preview {
            let size = fit_within(texture.size_vec2(), PREVIEW_SIDE);
            ui.image((texture.id(), size));
        }
        if let (Some(path), Some(bytes)) = (&self.image_path, &self.image_bytes) {
            if ui
                .add_enabled(!busy, egui::Button::new("📤 Upload to backend"))
                .clicked()
            {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "image".to_string());
                action = Some(PersonaAction::Upload {
                    filename,
                    bytes: bytes.clone(),
                });
            }
        }
        if let Some(upload) = &self.upload {
            ui.label(RichText::new(format_upload_summary(upload)).small().weak());
        }
        ui.add_space(6.0);

        ui.label("Object name:");
        ui.text_edit_singleline(&mut self.object_name);
        ui.label("Description (optional):");
        ui.text_edit_multiline(&mut self.description);

        let ready = self.image_base64.is_some() && !self.object_name.trim().is_empty();
        if ui
            .add_enabled(ready && !busy, egui::Button::new("✨ Generate persona"))
            .clicked()
        {
            if let Some(image_base64) = self.image_base64.clone() {
                action = Some(PersonaAction::Generate(ImageAnalysisRequest {
                    image_base64,
                    object_name: self.object_name.trim().to_string(),
                    description: Some(self.description.trim().to_string())
                        .filter(|d| !d.is_empty()),
                }));
            }
        }
        if busy {
            ui.label(RichText::new("Generating...").weak().italics());
        }
        if let Some(error) = &self.error {
            ui.colored_label(egui::Color32::RED, error);
        }

        if let Some(generated) = &self.last_generated {
            ui.add_space(6.0);
            ui.collapsing("Latest system prompt", |ui| {
                ui.label(&generated.system_prompt);
                ui.label(RichText::new(format!("Saved to {}", generated.saved_path)).small().weak());
            });
        }

        ui.separator();
        ui.horizontal(|ui| {
            ui.label(RichText::new("Saved personas").strong());
            if ui.small_button("⟳").clicked() {
                action = Some(PersonaAction::Refresh);
            }
        });

        let mut selection = self.selected_id.clone();
        egui::ScrollArea::vertical()
            .id_salt("persona_list")
            .max_height(220.0)
            .show(ui, |ui| {
                ui.radio_value(&mut selection, None, "Default assistant");
                for persona in &self.personas {
                    ui.radio_value(&mut selection, Some(persona.id.clone()), &persona.name)
                        .on_hover_text(format_persona_summary(persona));
                }
            });
        if selection != self.selected_id {
            action = Some(PersonaAction::Select(selection));
        }

        ui.separator();
        egui::CollapsingHeader::new("Stored personalities")
            .id_salt("stored_personalities")
            .show(ui, |ui| {
                if ui.small_button("⟳ Refresh").clicked() {
                    action = Some(PersonaAction::RefreshPersonalities);
                }
                if self.personalities.is_empty() {
                    ui.label(RichText::new("None loaded").weak());
                }
                for name in &self.personalities {
                    if ui.link(name).clicked() {
                        action = Some(PersonaAction::ShowPersonality(name.clone()));
                    }
                }
                if let Some((name, entries)) = &self.personality_detail {
                    ui.add_space(4.0);
                    ui.label(RichText::new(format!("{} ({} saved)", name, entries.len())).strong());
                    if let Some(latest) = entries.last() {
                        ui.label(&latest.system_prompt);
                        ui.label(
                            RichText::new(format!(
                                "{} · {}",
                                latest.model,
                                latest.created_at.format("%Y-%m-%d %H:%M")
                            ))
                            .small()
                            .weak(),
                        );
                    }
                }
            });

        egui::CollapsingHeader::new("Analyze text")
            .id_salt("analyze_text")
            .show(ui, |ui| {
                ui.text_edit_multiline(&mut self.analysis_input);
                let ready = !self.analysis_input.trim().is_empty() && !busy;
                if ui.add_enabled(ready, egui::Button::new("🔍 Analyze")).clicked() {
                    action = Some(PersonaAction::Analyze(self.analysis_input.trim().to_string()));
                }
                if let Some(analysis) = &self.analysis {
                    ui.label(&analysis.analysis);
                    ui.label(RichText::new(&analysis.model).small().weak());
                }
            });

        action
    }
}

pub fn format_upload_summary(upload: &UploadResponse) -> String {
    format!(
        "{} {}: {}x{} {} → {}",
        upload.status, upload.filename, upload.width, upload.height, upload.format, upload.saved_path
    )
}

/// Short description used in hover text and the status bar.
pub fn format_persona_summary(persona: &Persona) -> String {
    let mut summary = persona.name.clone();
    if let Some(object) = persona.object_name.as_deref().filter(|o| !o.trim().is_empty()) {
        summary.push_str(&format!(" ({})", object));
    }
    summary.push_str(": ");
    summary.push_str(persona.description.trim());
    if persona
        .traits
        .system_prompt
        .as_deref()
        .is_some_and(|p| !p.trim().is_empty())
    {
        summary.push_str(" [custom prompt]");
    }
    summary.push_str(&format!(" · created {}", persona.created_at.format("%Y-%m-%d %H:%M")));
    summary
}
