//! Command handlers
//!
//! The reasoning side of the robot lives elsewhere; these bridge recognized
//! commands to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::turn::{CommandHandler, VoiceCommand};
use crate::voice::{CommandTag, PromptEmitter};
use crate::{Error, Result};

/// Body POSTed for every command
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    tag: CommandTag,
    text: &'a str,
    duration_ms: u64,
}

/// Optional reply from the webhook
#[derive(Debug, Default, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    reply: Option<String>,
}

/// POSTs commands as JSON and speaks the reply, if any
pub struct WebhookHandler {
    client: reqwest::Client,
    url: String,
    prompter: Arc<dyn PromptEmitter>,
}

impl WebhookHandler {
    /// Create a handler posting to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: String, timeout: Duration, prompter: Arc<dyn PromptEmitter>) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("handler URL is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            prompter,
        })
    }
}

#[async_trait]
impl CommandHandler for WebhookHandler {
    async fn handle(&self, command: VoiceCommand) -> Result<()> {
        let request = CommandRequest {
            tag: command.tag,
            text: &command.text,
            duration_ms: u64::try_from(command.duration.as_millis()).unwrap_or(u64::MAX),
        };

        tracing::debug!(url = %self.url, tag = %command.tag, "posting command");
        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Handler(format!("webhook error {status}: {body}")));
        }

        let body = response.bytes().await?;
        let reply = parse_reply(&body);
        if let Some(reply) = reply {
            tracing::info!(reply = %reply, "speaking handler reply");
            self.prompter.speak(&reply).await?;
        }
        Ok(())
    }
}

/// Reply text from a webhook body; empty or non-JSON bodies carry none
fn parse_reply(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<CommandResponse>(body) {
        Ok(response) => response.reply.filter(|r| !r.trim().is_empty()),
        Err(e) => {
            tracing::debug!(error = %e, "webhook response is not a reply object");
            None
        }
    }
}

/// Logs commands and does nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl CommandHandler for LogHandler {
    async fn handle(&self, command: VoiceCommand) -> Result<()> {
        tracing::info!(
            tag = %command.tag,
            text = %command.text,
            frames = command.frames.len(),
            duration = ?command.duration,
            "command received"
        );
        Ok(())
    }
}
