use crate::api::{ApiClient, ApiErrorKind};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }
}

/// One earlier turn sent under `context.history`.
#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    role: Role,
    content: &'a str,
}

/// What the front-end should show after one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Reply(String),
    Notice(String),
    Failure {
        message: String,
        status: &'static str,
    },
    Nothing,
    Quit,
}

const NO_REPLY: &str = "No response from AI";

/// Chat session for the local user. Messages live in memory only.
pub struct ChatSession {
    api: ApiClient,
    messages: Vec<ChatMessage>,
    status: &'static str,
}

impl ChatSession {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            messages: Vec::new(),
            status: "Connecting...",
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Last known connection status label.
    pub fn status(&self) -> &'static str {
        self.status
    }

    /// Process one line of user input
    pub async fn process_input(&mut self, input: &str) -> Output {
        let input = input.trim();

        if input.is_empty() {
            debug!("Empty message received, ignoring");
            return Output::Nothing;
        }

        if input.starts_with('/') {
            return self.handle_command(input).await;
        }

        let max = self.api.settings().max_message_length;
        if input.chars().count() > max {
            let message = format!("Message too long. Maximum {} characters.", max);
            warn!("{}", message);
            return Output::Failure {
                message,
                status: self.status,
            };
        }

        self.send(input).await
    }

    async fn send(&mut self, input: &str) -> Output {
        let context = self.context();
        self.record(ChatMessage::new(Role::User, input));

        // One request in flight; the input loop waits on the task
        let api = self.api.clone();
        let text = input.to_string();
        let handle =
            tokio::spawn(async move { api.send_chat_message(&text, context).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("API task failed: {}", e);
                self.status = "Error";
                return Output::Failure {
                    message: format!("Unexpected error: {}", e),
                    status: self.status,
                };
            }
        };

        match result {
            Ok(response) => {
                debug!("Reply received ({})", response.status);
                let field = &self.api.settings().response_reply_field;
                let reply = response.reply(field).unwrap_or(NO_REPLY).to_string();
                self.record(ChatMessage::new(Role::Assistant, reply.clone()));
                self.status = "Connected";
                Output::Reply(reply)
            }
            Err(e) => {
                match e.status {
                    Some(status) => warn!("API error {}: {}", status, e),
                    None => warn!("API error: {}", e),
                }
                self.status = e.kind.status_label();
                let message = match e.kind {
                    ApiErrorKind::ServerError | ApiErrorKind::Request => e.message,
                    kind => kind.user_message().to_string(),
                };
                Output::Failure {
                    message,
                    status: self.status,
                }
            }
        }
    }

    /// Prior messages attached as request metadata, if configured.
    fn context(&self) -> Option<Value> {
        let n = self.api.settings().context_history;
        if n == 0 || self.messages.is_empty() {
            return None;
        }
        let start = self.messages.len().saturating_sub(n);
        let history: Vec<HistoryEntry<'_>> = self.messages[start..]
            .iter()
            .map(|m| HistoryEntry {
                role: m.role,
                content: &m.content,
            })
            .collect();
        Some(json!({ "history": history }))
    }

    fn record(&mut self, message: ChatMessage) {
        self.messages.push(message);

        let max = self.api.settings().max_chat_history;
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
        }
    }

    /// Probe the backend and update the connection status.
    pub async fn check_health(&mut self) -> Output {
        info!("Checking API connection...");
        match self.api.check_health().await {
            Ok(_) => {
                info!("API connection healthy");
                self.status = "Connected";
                Output::Notice("Connected".to_string())
            }
            Err(e) => {
                warn!("API connection unhealthy: {}", e);
                self.status = "Disconnected";
                Output::Failure {
                    message: e.kind.user_message().to_string(),
                    status: self.status,
                }
            }
        }
    }

    /// Handle slash commands
    async fn handle_command(&mut self, input: &str) -> Output {
        let cmd = input
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match cmd.as_str() {
            "/clear" => {
                self.messages.clear();
                Output::Notice("Chat history cleared.".to_string())
            }
            "/health" => self.check_health().await,
            "/history" => {
                if self.messages.is_empty() {
                    return Output::Notice("No messages yet.".to_string());
                }
                let lines: Vec<String> = self
                    .messages
                    .iter()
                    .map(|m| format!("[{}] {}: {}", m.timestamp.format("%H:%M:%S"), m.role, m.content))
                    .collect();
                Output::Notice(lines.join("\n"))
            }
            "/help" => Output::Notice(
                "Commands:\n  /health - Check the API connection\n  /history - Show this session's messages\n  /clear - Clear history\n  /help - Show this\n  /quit - Exit"
                    .to_string(),
            ),
            "/quit" | "/exit" => Output::Quit,
            _ => Output::Notice("Unknown command. Type /help for available commands.".to_string()),
        }
    }

    pub fn welcome_message(&self) -> String {
        let settings = self.api.settings();
        format!(
            "{} v{}. Type a message, or /help for commands.",
            settings.app_name, settings.app_version
        )
    }
}
