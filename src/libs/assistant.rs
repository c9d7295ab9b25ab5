pub mod gemini;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::libs::core::error::AiError;

pub const SYSTEM_INSTRUCTION: &str = "You are Vibogram AI, an advanced coding and social media assistant. \
Use Google Search for real-time dev info. If search is used, provide links. Be concise and futuristic.";

/// Shown in place of a reply when the completion call fails.
pub const FALLBACK_REPLY: &str = "The link to the AI core dropped out... 🌌";

pub const GREETING: &str = "Hey! Vibogram AI is online. Got some code or an idea? 🚀";

pub fn styled_image_prompt(prompt: &str) -> String {
    format!(
        "High quality futuristic developer concept: {}, neon colors, cyber-tech aesthetic, 4k",
        prompt
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    /// Allow the model to ground the answer with web search.
    pub grounded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

#[async_trait]
pub trait AiService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError>;
    /// `Ok(None)` when the model answered without an image.
    async fn generate_image(&self, prompt: &str) -> Result<Option<GeneratedImage>, AiError>;
}

/// Stand-in used when no AI key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredAi;

#[async_trait]
impl AiService for UnconfiguredAi {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, AiError> {
        Err(AiError::NotConfigured)
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Option<GeneratedImage>, AiError> {
        Err(AiError::NotConfigured)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub id: String,
    pub role: TurnRole,
    pub text: String,
    pub citations: Vec<Citation>,
    pub image: Option<GeneratedImage>,
}

impl Turn {
    fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            text: text.into(),
            citations: Vec::new(),
            image: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    #[error("Wait for the current answer before asking again")]
    Busy,
    #[error("Prompt is empty")]
    EmptyPrompt,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One assistant panel: a transcript and at most one turn in flight.
pub struct AssistantBridge {
    ai: Arc<dyn AiService>,
    transcript: RwLock<Vec<Turn>>,
    busy: AtomicBool,
}

impl AssistantBridge {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self {
            ai,
            transcript: RwLock::new(vec![Turn::new(TurnRole::Assistant, GREETING)]),
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn transcript(&self) -> Vec<Turn> {
        self.transcript.read().await.clone()
    }

    /// Text turn with web grounding. Service failures become [`FALLBACK_REPLY`]
    /// with no citations; the reply is appended either way.
    pub async fn ask(&self, prompt: &str) -> Result<Turn, AssistantError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyPrompt);
        }
        let _guard = self.begin_turn()?;
        self.append(Turn::new(TurnRole::User, prompt)).await;

        let request = CompletionRequest {
            prompt: prompt.to_string(),
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
            grounded: true,
        };
        let reply = match self.ai.complete(&request).await {
            Ok(completion) => {
                debug!(citations = completion.citations.len(), "assistant replied");
                Turn {
                    citations: completion.citations,
                    ..Turn::new(TurnRole::Assistant, completion.text)
                }
            }
            Err(e) => {
                warn!(error = %e, "completion failed");
                Turn::new(TurnRole::Assistant, FALLBACK_REPLY)
            }
        };

        self.append(reply.clone()).await;
        Ok(reply)
    }

    /// Image turn. Any failure yields `None`; the turn is appended either way.
    pub async fn imagine(&self, prompt: &str) -> Result<Option<GeneratedImage>, AssistantError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyPrompt);
        }
        let _guard = self.begin_turn()?;
        self.append(Turn::new(TurnRole::User, prompt)).await;

        let image = match self.ai.generate_image(&styled_image_prompt(prompt)).await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "image generation failed");
                None
            }
        };

        self.append(Turn {
            image: image.clone(),
            ..Turn::new(TurnRole::Assistant, "")
        })
        .await;
        Ok(image)
    }

    fn begin_turn(&self) -> Result<BusyGuard<'_>, AssistantError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| AssistantError::Busy)
    }

    async fn append(&self, turn: Turn) {
        self.transcript.write().await.push(turn);
    }
}
