use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use eframe::egui::{self, RichText};
use flume::{Receiver, Sender};

use persona_backend::analysis::{AnalysisResponse, UploadResponse};
use persona_backend::chat::{ChatRequest, ChatResponse};
use persona_backend::config::Settings;
use persona_backend::generation::GenerationResponse;
use persona_backend::llm_client::Message;
use persona_backend::models::ModelInfo;
use persona_backend::persona::{Persona, PersonalityGenerationResponse};
use persona_backend::personality::GeneratedPersonality;

use super::chat::{ChatAction, ChatPanel};
use super::generation::GenerationPanel;
use super::persona::{format_persona_summary, format_upload_summary, PersonaAction, PersonaPanel};
use super::settings::SettingsPanel;
use crate::api::ApiClient;

const MAX_STATUS_LINES: usize = 50;

/// Results of background API calls, drained once per frame.
pub enum UiEvent {
    Health(Result<String, String>),
    Personas(Result<Vec<Persona>, String>),
    PersonaLoaded(Result<Persona, String>),
    Personalities(Result<Vec<String>, String>),
    PersonalityDetail {
        name: String,
        result: Result<Vec<GeneratedPersonality>, String>,
    },
    PersonalityGenerated(Result<PersonalityGenerationResponse, String>),
    PersonaCreated(Result<Persona, String>),
    ChatReply(Result<ChatResponse, String>),
    History {
        conversation_id: String,
        result: Result<Vec<Message>, String>,
    },
    HistoryCleared {
        conversation_id: String,
        result: Result<bool, String>,
    },
    ImageGenerated(Result<GenerationResponse, String>),
    Models(Result<Vec<ModelInfo>, String>),
    Uploaded(Result<UploadResponse, String>),
    Analyzed(Result<AnalysisResponse, String>),
}

fn flatten<T>(result: anyhow::Result<T>) -> Result<T, String> {
    result.map_err(|e| format!("{:#}", e))
}

#[derive(Default)]
struct Busy {
    persona: bool,
    chat: bool,
    image: bool,
}

pub struct PersonaApp {
    api_client: ApiClient,
    runtime: tokio::runtime::Runtime,
    ctx: egui::Context,
    event_tx: Sender<UiEvent>,
    event_rx: Receiver<UiEvent>,
    persona_panel: PersonaPanel,
    chat_panel: ChatPanel,
    generation_panel: GenerationPanel,
    settings_panel: SettingsPanel,
    models: Vec<ModelInfo>,
    show_models: bool,
    backend_status: Option<Result<String, String>>,
    status_log: Vec<String>,
    busy: Busy,
}

impl PersonaApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        api_client: ApiClient,
        settings: Settings,
        env_path: PathBuf,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new().context("failed to start UI runtime")?;
        let (event_tx, event_rx) = flume::unbounded();

        let mut app = Self {
            api_client,
            runtime,
            ctx: cc.egui_ctx.clone(),
            event_tx,
            event_rx,
            persona_panel: PersonaPanel::new(),
            chat_panel: ChatPanel::new(),
            generation_panel: GenerationPanel::new(&settings),
            settings_panel: SettingsPanel::new(settings, env_path),
            models: Vec::new(),
            show_models: false,
            backend_status: None,
            status_log: Vec::new(),
            busy: Busy::default(),
        };

        app.check_health();
        app.refresh_personas();
        app.refresh_personalities();
        Ok(app)
    }

    fn dispatch<F>(&self, task: F)
    where
        F: Future<Output = UiEvent> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            let _ = tx.send(task.await);
            ctx.request_repaint();
        });
    }

    fn log(&mut self, line: impl Into<String>) {
        self.status_log.push(line.into());
        if self.status_log.len() > MAX_STATUS_LINES {
            let overflow = self.status_log.len() - MAX_STATUS_LINES;
            self.status_log.drain(..overflow);
        }
    }

    fn check_health(&self) {
        let client = self.api_client.clone();
        self.dispatch(async move {
            UiEvent::Health(flatten(client.health().await.map(|h| h.status)))
        });
    }

    fn refresh_personas(&self) {
        let client = self.api_client.clone();
        self.dispatch(async move { UiEvent::Personas(flatten(client.list_personas().await)) });
    }

    fn refresh_models(&self) {
        let client = self.api_client.clone();
        self.dispatch(async move { UiEvent::Models(flatten(client.image_models().await)) });
    }

    fn refresh_history(&self, conversation_id: String) {
        let client = self.api_client.clone();
        self.dispatch(async move {
            let result = flatten(client.chat_history(&conversation_id).await);
            UiEvent::History {
                conversation_id,
                result,
            }
        });
    }

    fn refresh_personalities(&self) {
        let client = self.api_client.clone();
        self.dispatch(async move {
            UiEvent::Personalities(flatten(client.list_personalities().await))
        });
    }

    fn send_chat(&mut self, message: String) {
        let request = ChatRequest {
            message,
            conversation_id: self.chat_panel.conversation_id.clone(),
            persona_id: self.persona_panel.selected_id.clone(),
            model: None,
            temperature: None,
            max_tokens: None,
            stream: false,
        };
        // Show the user's line immediately; history is reloaded after the reply.
        self.chat_panel.messages.push(Message::user(request.message.clone()));
        self.busy.chat = true;

        let client = self.api_client.clone();
        self.dispatch(async move { UiEvent::ChatReply(flatten(client.send_chat(&request).await)) });
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Health(result) => {
                if let Err(error) = &result {
                    tracing::warn!("Backend health check failed: {}", error);
                }
                self.backend_status = Some(result);
            }
            UiEvent::Personas(Ok(personas)) => {
                tracing::debug!("Loaded {} personas", personas.len());
                self.persona_panel.personas = personas;
            }
            UiEvent::Personas(Err(error)) => self.log(format!("Failed to load personas: {}", error)),
            UiEvent::PersonaLoaded(Ok(persona)) => {
                match self.persona_panel.personas.iter_mut().find(|p| p.id == persona.id) {
                    Some(existing) => *existing = persona,
                    None => self.persona_panel.personas.push(persona),
                }
            }
            UiEvent::PersonaLoaded(Err(error)) => self.log(format!("Failed to load persona: {}", error)),
            UiEvent::Personalities(Ok(names)) => self.persona_panel.personalities = names,
            UiEvent::Personalities(Err(error)) => {
                self.log(format!("Failed to list personalities: {}", error))
            }
            UiEvent::PersonalityDetail { name, result } => match result {
                Ok(entries) => self.persona_panel.personality_detail = Some((name, entries)),
                Err(error) => self.log(format!("Failed to load personality {}: {}", name, error)),
            },
            UiEvent::PersonalityGenerated(Ok(generated)) => {
                self.log(format!("Generated personality for {}", generated.object_name));
                let request = self.persona_panel.create_request_for(&generated);
                self.persona_panel.last_generated = Some(generated);

                let client = self.api_client.clone();
                self.dispatch(async move {
                    UiEvent::PersonaCreated(flatten(client.create_persona(&request).await))
                });
            }
            UiEvent::PersonalityGenerated(Err(error)) => {
                self.busy.persona = false;
                self.log(format!("Persona generation failed: {}", error));
            }
            UiEvent::PersonaCreated(Ok(persona)) => {
                self.busy.persona = false;
                self.log(format!("Created persona {}", format_persona_summary(&persona)));
                self.persona_panel.selected_id = Some(persona.id.clone());
                self.persona_panel.personas.push(persona);
                self.chat_panel.reset();
                self.refresh_personalities();
            }
            UiEvent::PersonaCreated(Err(error)) => {
                self.busy.persona = false;
                self.log(format!("Failed to save persona: {}", error));
            }
            UiEvent::ChatReply(Ok(reply)) => {
                self.busy.chat = false;
                self.chat_panel.apply_reply(&reply);
                self.chat_panel.messages.push(Message::assistant(reply.response.clone()));
                self.refresh_history(reply.conversation_id);
            }
            UiEvent::ChatReply(Err(error)) => {
                self.busy.chat = false;
                self.log(format!("Chat failed: {}", error));
            }
            UiEvent::History {
                conversation_id,
                result,
            } => match result {
                Ok(messages) => {
                    if self.chat_panel.conversation_id.as_deref() == Some(conversation_id.as_str()) {
                        self.chat_panel.messages = messages;
                    }
                }
                Err(error) => self.log(format!("Failed to load history: {}", error)),
            },
            UiEvent::HistoryCleared {
                conversation_id,
                result,
            } => match result {
                Ok(cleared) => {
                    if self.chat_panel.conversation_id.as_deref() == Some(conversation_id.as_str()) {
                        self.chat_panel.reset();
                    }
                    let outcome = if cleared { "Cleared" } else { "Nothing stored for" };
                    self.log(format!("{} conversation {}", outcome, conversation_id));
                }
                Err(error) => self.log(format!("Failed to clear history: {}", error)),
            },
            UiEvent::ImageGenerated(result) => {
                self.busy.image = false;
                match result {
                    Ok(response) => self.generation_panel.apply_response(&self.ctx, response),
                    Err(error) => self.log(format!("Image generation failed: {}", error)),
                }
            }
            UiEvent::Models(Ok(models)) => self.models = models,
            UiEvent::Models(Err(error)) => self.log(format!("Failed to load models: {}", error)),
            UiEvent::Uploaded(result) => {
                self.busy.persona = false;
                match result {
                    Ok(upload) => {
                        self.log(format_upload_summary(&upload));
                        self.persona_panel.upload = Some(upload);
                    }
                    Err(error) => self.log(format!("Upload failed: {}", error)),
                }
            }
            UiEvent::Analyzed(result) => {
                self.busy.persona = false;
                match result {
                    Ok(analysis) => self.persona_panel.analysis = Some(analysis),
                    Err(error) => self.log(format!("Analysis failed: {}", error)),
                }
            }
        }
    }

    fn render_top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("AI Persona Generator");
                ui.separator();
                match &self.backend_status {
                    Some(Ok(status)) => {
                        ui.colored_label(egui::Color32::LIGHT_GREEN, format!("● {}", status));
                    }
                    Some(Err(_)) => {
                        ui.colored_label(egui::Color32::RED, "● Backend unreachable");
                    }
                    None => {
                        ui.label(RichText::new("● Connecting...").weak());
                    }
                }
                if ui.small_button("⟳").on_hover_text("Check backend").clicked() {
                    self.check_health();
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("⚙ Settings").clicked() {
                        self.settings_panel.show = true;
                    }
                    if ui.button("Vision models").clicked() {
                        self.show_models = true;
                        self.refresh_models();
                    }
                });
            });
        });
    }

    fn render_models_window(&mut self, ctx: &egui::Context) {
        if !self.show_models {
            return;
        }
        let mut open = self.show_models;
        egui::Window::new("Image-capable models")
            .open(&mut open)
            .default_width(420.0)
            .show(ctx, |ui| {
                if self.models.is_empty() {
                    ui.label(RichText::new("No models listed (is the OpenRouter key set?)").weak());
                }
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for model in &self.models {
                        ui.horizontal(|ui| {
                            let tag = if model.is_free { "FREE" } else { "paid" };
                            ui.label(RichText::new(tag).small().strong());
                            ui.label(&model.name).on_hover_text(&model.id);
                        });
                    }
                });
            });
        self.show_models = open;
    }

    fn render_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            match self.status_log.last() {
                Some(line) => ui.label(RichText::new(line).small()),
                None => ui.label(RichText::new("Ready").small().weak()),
            };
        });
    }
}

impl eframe::App for PersonaApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }

        self.render_top_bar(ctx);
        self.render_status_bar(ctx);

        let persona_action = egui::SidePanel::left("persona_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .show(ui, |ui| self.persona_panel.render(ui, self.busy.persona))
                    .inner
            })
            .inner;
        match persona_action {
            Some(PersonaAction::Generate(request)) => {
                self.busy.persona = true;
                let client = self.api_client.clone();
                self.dispatch(async move {
                    UiEvent::PersonalityGenerated(flatten(client.generate_from_image(&request).await))
                });
            }
            Some(PersonaAction::Refresh) => self.refresh_personas(),
            Some(PersonaAction::Select(id)) => {
                if let Some(id) = id.clone() {
                    let client = self.api_client.clone();
                    self.dispatch(async move {
                        UiEvent::PersonaLoaded(flatten(client.get_persona(&id).await))
                    });
                }
                self.persona_panel.selected_id = id;
                // The persona prompt only applies when a conversation starts.
                self.chat_panel.reset();
            }
            Some(PersonaAction::RefreshPersonalities) => self.refresh_personalities(),
            Some(PersonaAction::ShowPersonality(name)) => {
                let client = self.api_client.clone();
                self.dispatch(async move {
                    let result = flatten(client.personality(&name).await);
                    UiEvent::PersonalityDetail { name, result }
                });
            }
            Some(PersonaAction::Upload { filename, bytes }) => {
                self.busy.persona = true;
                let client = self.api_client.clone();
                self.dispatch(async move {
                    UiEvent::Uploaded(flatten(client.upload(&filename, bytes).await))
                });
            }
            Some(PersonaAction::Analyze(content)) => {
                self.busy.persona = true;
                let client = self.api_client.clone();
                self.dispatch(async move {
                    UiEvent::Analyzed(flatten(client.analyze(&content).await))
                });
            }
            None => {}
        }

        let image_request = egui::SidePanel::right("generation_panel")
            .default_width(320.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .show(ui, |ui| self.generation_panel.render(ui, self.busy.image))
                    .inner
            })
            .inner;
        if let Some(request) = image_request {
            self.busy.image = true;
            let client = self.api_client.clone();
            self.dispatch(async move {
                UiEvent::ImageGenerated(flatten(client.generate_image(&request).await))
            });
        }

        let persona_name = self.persona_panel.selected().map(|p| p.name.clone());
        let chat_action = egui::CentralPanel::default()
            .show(ctx, |ui| {
                self.chat_panel
                    .render(ui, persona_name.as_deref(), self.busy.chat)
            })
            .inner;
        match chat_action {
            Some(ChatAction::Send(message)) => self.send_chat(message),
            Some(ChatAction::RefreshHistory) => {
                if let Some(id) = self.chat_panel.conversation_id.clone() {
                    self.refresh_history(id);
                }
            }
            Some(ChatAction::ClearHistory) => {
                if let Some(conversation_id) = self.chat_panel.conversation_id.clone() {
                    let client = self.api_client.clone();
                    self.dispatch(async move {
                        let result = flatten(client.clear_history(&conversation_id).await);
                        UiEvent::HistoryCleared {
                            conversation_id,
                            result,
                        }
                    });
                }
            }
            Some(ChatAction::NewConversation) => self.chat_panel.reset(),
            None => {}
        }

        self.render_models_window(ctx);
        self.settings_panel.render(ctx);
    }
}
