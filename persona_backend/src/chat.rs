use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::error::{ensure, ApiResult};
use crate::llm_client::{ChatCompletionParams, ChatProvider, Message};
use crate::persona::PersonaService;
use crate::prompt::{persona_system_prompt, DEFAULT_SYSTEM_PROMPT};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
const MAX_TOKENS_LIMIT: u32 = 4096;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn validate(&self) -> ApiResult<()> {
        ensure(!self.message.trim().is_empty(), "message must not be empty")?;
        if let Some(temperature) = self.temperature {
            ensure(
                (0.0..=2.0).contains(&temperature),
                "temperature must be between 0 and 2",
            )?;
        }
        if let Some(max_tokens) = self.max_tokens {
            ensure(
                (1..=MAX_TOKENS_LIMIT).contains(&max_tokens),
                format!("max_tokens must be between 1 and {}", MAX_TOKENS_LIMIT),
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub model: String,
    pub tokens_used: u32,
    pub finish_reason: String,
    pub timestamp: DateTime<Utc>,
}

pub struct ChatService {
    provider: Arc<dyn ChatProvider>,
    conversations: Arc<dyn ConversationStore>,
    personas: Arc<PersonaService>,
    default_model: String,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        conversations: Arc<dyn ConversationStore>,
        personas: Arc<PersonaService>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            conversations,
            personas,
            default_model: default_model.into(),
        }
    }

    pub async fn send(&self, request: ChatRequest) -> ApiResult<ChatResponse> {
        request.validate()?;
        if request.stream {
            tracing::debug!("Streaming was requested but responses are always returned whole");
        }

        let conversation_id = request
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = self.conversations.history(&conversation_id).await?;
        let opening = if history.is_empty() {
            Some(Message::system(
                self.system_prompt(request.persona_id.as_deref()).await,
            ))
        } else {
            None
        };
        let user_message = Message::user(request.message.clone());

        let mut messages = history;
        messages.extend(opening.iter().cloned());
        messages.push(user_message.clone());

        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string();

        let completion = self
            .provider
            .complete(ChatCompletionParams {
                model,
                messages,
                temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            })
            .await?;

        let turn = vec![user_message, Message::assistant(completion.content.clone())];
        match opening {
            // Another request may have opened the conversation meanwhile; the store
            // keeps only the first system message.
            Some(system) => {
                self.conversations
                    .append_opening(&conversation_id, system, turn)
                    .await?
            }
            None => self.conversations.append(&conversation_id, turn).await?,
        }

        Ok(ChatResponse {
            response: completion.content,
            conversation_id,
            model: completion.model,
            tokens_used: completion.tokens_used,
            finish_reason: completion.finish_reason,
            timestamp: Utc::now(),
        })
    }

    pub async fn history(&self, conversation_id: &str) -> ApiResult<Vec<Message>> {
        Ok(self.conversations.history(conversation_id).await?)
    }

    pub async fn clear(&self, conversation_id: &str) -> ApiResult<bool> {
        Ok(self.conversations.clear(conversation_id).await?)
    }

    /// Unknown or unreadable personas fall back to the default prompt.
    async fn system_prompt(&self, persona_id: Option<&str>) -> String {
        let Some(persona_id) = persona_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return DEFAULT_SYSTEM_PROMPT.to_string();
        };

        match self.personas.find(persona_id).await {
            Ok(Some(persona)) => persona_system_prompt(&persona),
            Ok(None) => {
                tracing::debug!("Persona {} not found; using default prompt", persona_id);
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
            Err(e) => {
                tracing::warn!("Could not load persona {}: {:#}", persona_id, e);
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::InMemoryConversationStore;
    use crate::llm_client::Role;
    use crate::personality::PersonalityGenerator;
    use crate::testing::StubChatProvider;
    use axum::http::StatusCode;

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: Arc<StubChatProvider>,
        conversations: Arc<InMemoryConversationStore>,
        service: ChatService,
    }

    fn fixture(provider: StubChatProvider) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(provider);
        let generator = Arc::new(PersonalityGenerator::new(
            provider.clone(),
            dir.path().join("personalities"),
            "glm",
        ));
        let personas = Arc::new(PersonaService::new(dir.path().join("personas"), generator));
        let conversations = Arc::new(InMemoryConversationStore::new());
        let service = ChatService::new(provider.clone(), conversations.clone(), personas, "gpt-4");
        Fixture {
            _dir: dir,
            provider,
            conversations,
            service,
        }
    }

    fn request(message: &str, conversation_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            persona_id: None,
            model: None,
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    #[tokio::test]
    async fn first_message_gets_exactly_one_system_prompt() {
        let f = fixture(StubChatProvider::replying("Hello there"));

        let first = f.service.send(request("hi", None)).await.expect("first");
        let second = f
            .service
            .send(request("again", Some(&first.conversation_id)))
            .await
            .expect("second");
        assert_eq!(first.conversation_id, second.conversation_id);

        let calls = f.provider.calls();
        assert_eq!(calls[0].messages.len(), 2);
        assert_eq!(calls[0].messages[0], Message::system(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(calls[0].messages[1], Message::user("hi"));
        assert_eq!(calls[0].temperature, DEFAULT_TEMPERATURE);
        assert_eq!(calls[0].max_tokens, DEFAULT_MAX_TOKENS);

        let system_count = calls[1]
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(calls[1].messages.len(), 4);

        let history = f.service.history(&first.conversation_id).await.expect("history");
        assert_eq!(history.len(), 5);
        assert_eq!(history[4], Message::assistant("Hello there"));
    }

    #[tokio::test]
    async fn failed_completion_leaves_history_untouched() {
        let f = fixture(StubChatProvider::failing());

        let err = f.service.send(request("hi", Some("c-1"))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(f.conversations.history("c-1").await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn out_of_range_parameters_are_rejected() {
        let f = fixture(StubChatProvider::replying("unused"));

        let mut hot = request("hi", None);
        hot.temperature = Some(2.5);
        assert_eq!(
            f.service.send(hot).await.unwrap_err().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let mut long = request("hi", None);
        long.max_tokens = Some(0);
        assert!(f.service.send(long).await.is_err());

        assert!(f.service.send(request("   ", None)).await.is_err());
        assert!(f.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn persona_system_prompt_opens_the_conversation() {
        let f = fixture(StubChatProvider::replying("You are a wise old clock."));
        let persona = f
            .service
            .personas
            .create(crate::persona::PersonaCreateRequest {
                name: "Tick".to_string(),
                description: "A grandfather clock".to_string(),
                traits: Default::default(),
                image_base64: None,
                object_name: Some("clock".to_string()),
            })
            .await
            .expect("persona");

        let mut req = request("what time is it?", None);
        req.persona_id = Some(persona.id.clone());
        req.model = Some("openai/gpt-4o".to_string());
        f.service.send(req).await.expect("send");

        let calls = f.provider.calls();
        let chat_call = calls.last().expect("chat call");
        assert_eq!(chat_call.model, "openai/gpt-4o");
        assert_eq!(chat_call.messages[0], Message::system("You are a wise old clock."));
    }

    #[tokio::test]
    async fn unknown_persona_falls_back_to_default_prompt() {
        let f = fixture(StubChatProvider::replying("ok"));
        let mut req = request("hi", None);
        req.persona_id = Some("missing".to_string());
        f.service.send(req).await.expect("send");
        assert_eq!(
            f.provider.calls()[0].messages[0],
            Message::system(DEFAULT_SYSTEM_PROMPT)
        );
    }

    #[tokio::test]
    async fn concurrent_first_messages_store_one_system_prompt() {
        let f = fixture(StubChatProvider::replying("hey").with_barrier(2));

        let (a, b) = tokio::join!(
            f.service.send(request("one", Some("shared"))),
            f.service.send(request("two", Some("shared"))),
        );
        a.expect("first send");
        b.expect("second send");

        // Both requests read the empty history before either reply was stored.
        let calls = f.provider.calls();
        assert!(calls.iter().all(|c| c.messages[0].role == Role::System));

        let history = f.service.history("shared").await.expect("history");
        assert_eq!(history.len(), 5);
        let system_count = history.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(system_count, 1);
        assert_eq!(history[0].role, Role::System);
    }
}
