use eframe::egui::{self, Color32, RichText, ScrollArea};

use persona_backend::chat::ChatResponse;
use persona_backend::llm_client::{Message, Role};

pub enum ChatAction {
    Send(String),
    RefreshHistory,
    ClearHistory,
    NewConversation,
}

#[derive(Default)]
pub struct ChatPanel {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub last_reply_footer: Option<String>,
    pub show_system: bool,
    input: String,
}

impl ChatPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_reply(&mut self, reply: &ChatResponse) {
        self.conversation_id = Some(reply.conversation_id.clone());
        self.last_reply_footer = Some(format_chat_reply(reply));
    }

    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.messages.clear();
        self.last_reply_footer = None;
    }

    pub fn render(&mut self, ui: &mut egui::Ui, persona_name: Option<&str>, busy: bool) -> Option<ChatAction> {
        let mut action = None;

        ui.horizontal(|ui| {
            ui.heading("Chat");
            match persona_name {
                Some(name) => ui.label(RichText::new(format!("with {}", name)).strong()),
                None => ui.label(RichText::new("default assistant").weak()),
            };
        });
        ui.horizontal(|ui| {
            if ui.button("New conversation").clicked() {
                action = Some(ChatAction::NewConversation);
            }
            let can_refresh = self.conversation_id.is_some();
            if ui
                .add_enabled(can_refresh, egui::Button::new("Refresh history"))
                .clicked()
            {
                action = Some(ChatAction::RefreshHistory);
            }
            if ui
                .add_enabled(can_refresh && !busy, egui::Button::new("🗑 Clear history"))
                .on_hover_text("Delete this conversation on the backend")
                .clicked()
            {
                action = Some(ChatAction::ClearHistory);
            }
            ui.checkbox(&mut self.show_system, "Show system prompt");
        });
        if let Some(id) = &self.conversation_id {
            ui.label(RichText::new(format!("Conversation {}", id)).small().weak());
        }
        ui.separator();

        ScrollArea::vertical()
            .stick_to_bottom(true)
            .max_height(ui.available_height() - 70.0)
            .show(ui, |ui| {
                let visible: Vec<&Message> = self
                    .messages
                    .iter()
                    .filter(|m| self.show_system || m.role != Role::System)
                    .collect();
                if visible.is_empty() {
                    ui.label(RichText::new("No messages yet. Say hello below.").weak().italics());
                    return;
                }

                for message in visible {
                    let (label, color) = match message.role {
                        Role::User => ("You", Color32::from_rgb(100, 149, 237)),
                        Role::Assistant => (persona_name.unwrap_or("Assistant"), Color32::from_rgb(144, 238, 144)),
                        Role::System => ("System", Color32::GRAY),
                    };
                    ui.group(|ui| {
                        ui.label(RichText::new(label).color(color).strong());
                        ui.label(&message.content);
                    });
                    ui.add_space(6.0);
                }
                if let Some(footer) = &self.last_reply_footer {
                    ui.label(RichText::new(footer).small().weak());
                }
            });

        ui.separator();
        ui.horizontal(|ui| {
            let input = ui.add_sized(
                [ui.available_width() - 70.0, 24.0],
                egui::TextEdit::singleline(&mut self.input).hint_text("Type a message"),
            );
            let enter = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let clicked = ui.add_enabled(!busy, egui::Button::new("Send")).clicked();
            if (enter || clicked) && !busy && !self.input.trim().is_empty() {
                action = Some(ChatAction::Send(std::mem::take(&mut self.input)));
            }
        });
        if busy {
            ui.label(RichText::new("Waiting for reply...").weak().italics());
        }

        action
    }
}

/// One-line summary shown under the latest reply.
pub fn format_chat_reply(reply: &ChatResponse) -> String {
    format!(
        "{} · {} tokens · {} · {}",
        reply.model,
        reply.tokens_used,
        reply.finish_reason,
        reply.timestamp.format("%H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reply_footer_lists_model_usage_and_time() {
        let reply = ChatResponse {
            response: "hi".to_string(),
            conversation_id: "c".to_string(),
            model: "openai/gpt-4".to_string(),
            tokens_used: 15,
            finish_reason: "stop".to_string(),
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap(),
        };
        assert_eq!(format_chat_reply(&reply), "openai/gpt-4 · 15 tokens · stop · 13:04:05");
    }

    #[test]
    fn apply_reply_tracks_conversation() {
        let mut panel = ChatPanel::new();
        let reply = ChatResponse {
            response: "ok".to_string(),
            conversation_id: "abc".to_string(),
            model: "m".to_string(),
            tokens_used: 1,
            finish_reason: "stop".to_string(),
            timestamp: chrono::Utc::now(),
        };
        panel.apply_reply(&reply);
        assert_eq!(panel.conversation_id.as_deref(), Some("abc"));
        panel.reset();
        assert!(panel.conversation_id.is_none());
    }
}
