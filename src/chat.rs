//! Interactive question answering over the index.
//!
//! Each question is embedded with the same [`Embedder`] the pipeline uses,
//! the nearest chunks are fetched by vector query, and the chunks plus the
//! running conversation go to a chat-completions endpoint.
//!
//! History is persisted as a JSON array of
//! `{"inputs": {"chat_input": ..}, "outputs": {"chat_output": ..}}` turns,
//! loaded at startup and rewritten after every answer.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::config::{Config, ProviderKind};
use crate::embedding::Embedder;
use crate::error::ChatError;
use crate::models::SearchHit;
use crate::store::azure::AzureSearchStore;
use crate::store::IndexStore;

pub const QUIT_COMMAND: &str = "q!";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant that answers questions about \
the organisation's documents. Answer only from the sources provided. If the sources do not \
contain the answer, say that you don't know.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInputs {
    pub chat_input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutputs {
    pub chat_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub inputs: ChatInputs,
    pub outputs: ChatOutputs,
}

impl ChatTurn {
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            inputs: ChatInputs {
                chat_input: question.to_string(),
            },
            outputs: ChatOutputs {
                chat_output: answer.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    /// Load history from `path`. A missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chat history: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse chat history: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write chat history: {}", path.display()))
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completions backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;
}

pub struct HttpChatModel {
    http: reqwest::Client,
    provider: ProviderKind,
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
}

impl HttpChatModel {
    pub fn new(
        provider: ProviderKind,
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment: deployment.to_string(),
            api_version: api_version.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Uses `[chat]`, falling back to `[embedding]` for provider and endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let deployment = config
            .chat
            .deployment
            .as_deref()
            .context("[chat].deployment is required for chat")?;
        let endpoint = config
            .chat
            .endpoint
            .as_deref()
            .or(config.embedding.endpoint.as_deref())
            .unwrap_or("https://api.openai.com/v1");
        let api_key = config
            .secrets
            .openai_api_key
            .as_deref()
            .context("AOAI_KEY or OPENAI_API_KEY environment variable not set")?;

        Ok(Self::new(
            config.embedding.provider,
            endpoint,
            deployment,
            &config.chat.api_version,
            api_key,
            Duration::from_secs(config.embedding.timeout_secs.max(60)),
        )?)
    }

    fn url(&self) -> String {
        match self.provider {
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, self.deployment, self.api_version
            ),
            ProviderKind::OpenAi => format!("{}/chat/completions", self.endpoint),
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let body = serde_json::json!({
            "model": self.deployment,
            "messages": messages,
        });

        let request = self.http.post(self.url()).json(&body);
        let request = match self.provider {
            ProviderKind::Azure => request.header("api-key", &self.api_key),
            ProviderKind::OpenAi => request.bearer_auth(&self.api_key),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ChatError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ChatError::InvalidResponse("missing choices[0].message.content".into()))
}

/// System prompt with the retrieved passages, then the conversation so
/// far, then the new question.
pub fn build_messages(
    system_prompt: &str,
    history: &ChatHistory,
    hits: &[SearchHit],
    question: &str,
) -> Vec<ChatMessage> {
    let mut system = system_prompt.to_string();
    if !hits.is_empty() {
        system.push_str("\n\nSources:");
        for hit in hits {
            system.push_str(&format!("\n\n[{}] {}\n{}", hit.name, hit.source, hit.content));
        }
    }

    let mut messages = Vec::with_capacity(2 + history.len() * 2);
    messages.push(ChatMessage::new("system", system));
    for turn in history.turns() {
        messages.push(ChatMessage::new("user", turn.inputs.chat_input.as_str()));
        messages.push(ChatMessage::new("assistant", turn.outputs.chat_output.as_str()));
    }
    messages.push(ChatMessage::new("user", question));
    messages
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

/// One conversation: retrieval plus chat, accumulating history.
pub struct RagSession<'a> {
    pub embedder: &'a Embedder,
    pub store: &'a dyn IndexStore,
    pub model: &'a dyn ChatModel,
    pub top_k: usize,
    pub system_prompt: String,
    pub history: ChatHistory,
}

impl RagSession<'_> {
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .context("Failed to embed question")?;
        let hits = self
            .store
            .vector_search(&vector, self.top_k)
            .await
            .context("Vector query failed")?;
        debug!(hits = hits.len(), "retrieved context");

        let messages = build_messages(&self.system_prompt, &self.history, &hits, question);
        let text = self
            .model
            .complete(&messages)
            .await
            .context("Chat completion failed")?;

        self.history.push(ChatTurn::new(question, &text));
        Ok(Answer { text, sources: hits })
    }
}

/// `docidx chat`
pub async fn run_chat(config: &Config) -> Result<()> {
    let embedder = Embedder::from_config(config)?;
    let store = AzureSearchStore::from_config(config)?;
    let model = HttpChatModel::from_config(config)?;
    let history_path = config.chat.history_path.as_path();

    let mut session = RagSession {
        embedder: &embedder,
        store: &store,
        model: &model,
        top_k: config.chat.top_k,
        system_prompt: config
            .chat
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        history: ChatHistory::load(history_path)?,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You (type {} to quit): ", QUIT_COMMAND);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question == QUIT_COMMAND {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match session.ask(question).await {
            Ok(answer) => {
                println!("\n{}\n", answer.text);
                for hit in &answer.sources {
                    println!("  - {} ({})", hit.name, hit.source);
                }
                println!();
                session.history.save(history_path)?;
            }
            Err(e) => {
                warn!(error = %e, "question failed");
                eprintln!("Error: {:#}", e);
            }
        }
    }
    Ok(())
}
