//! Telegram transport over the Bot API
//!
//! Uses long polling (`getUpdates`), so no public endpoint is needed.
//! Every answer carries a 👍/👎 inline keyboard. Button presses arrive as
//! callback queries whose data holds a short token; the token maps back to
//! the answered knowledge key through a bounded LRU table, since callback
//! data is limited to 64 bytes. Tokens start from a random base in each
//! process and only resolve for the chat and message they were sent with,
//! so buttons left over from an earlier run are reported as expired.
//!
//! # Setup
//!
//! 1. Create a bot via @BotFather on Telegram
//! 2. Set `TELEGRAM_BOT_TOKEN` or `telegram.bot_token` in the config
//! 3. Run `learnbot telegram`

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{render, Inbound, Reply, Transport};
use crate::config::TelegramConfig;
use crate::knowledge::{Answer, FeedbackSignal};

/// Telegram API base URL
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Pause after a failed poll before trying again
const RETRY_DELAY: Duration = Duration::from_secs(5);

const CALLBACK_PREFIX: &str = "fb";

/// Telegram API envelope
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i32>,
}

/// Telegram message info
#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub text: Option<String>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

/// Telegram chat info
#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Telegram user info
#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

/// Inline keyboard button press
#[derive(Debug, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

/// Telegram update (incoming message/event)
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<TelegramCallbackQuery>,
}

/// Send message request
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    limit: i32,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EditMarkupRequest {
    chat_id: i64,
    message_id: i64,
    reply_markup: serde_json::Value,
}

/// Answered key behind a feedback keyboard and the message carrying it
#[derive(Debug, Clone, PartialEq, Eq)]
struct FeedbackTarget {
    key: String,
    chat_id: String,
    /// Set once the message is delivered
    message_id: Option<i64>,
}

impl FeedbackTarget {
    fn matches(&self, chat_id: &str, message_id: Option<i64>) -> bool {
        self.chat_id == chat_id && (self.message_id.is_none() || self.message_id == message_id)
    }
}

/// Bot API long-polling transport
pub struct TelegramTransport {
    api_base: String,
    bot_token: String,
    http_client: reqwest::Client,
    poll_timeout_secs: u64,
    /// Next update id to request
    offset: Option<i64>,
    /// Events already fetched but not yet handed out
    pending: VecDeque<Inbound>,
    /// Callback token -> answered knowledge key
    feedback_keys: LruCache<u64, FeedbackTarget>,
    next_token: u64,
}

impl TelegramTransport {
    /// Create a transport for `bot_token`
    pub fn new(bot_token: impl Into<String>, config: &TelegramConfig) -> Result<Self> {
        let bot_token = bot_token.into();
        if !is_valid_token(&bot_token) {
            bail!("Telegram bot token looks malformed (expected '<id>:<secret>')");
        }

        let http_client = reqwest::Client::builder()
            // Requests must outlive the long poll
            .timeout(Duration::from_secs(config.poll_timeout_secs + 10))
            .build()
            .context("Failed to create HTTP client")?;

        let window = NonZeroUsize::new(config.feedback_window).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token,
            http_client,
            poll_timeout_secs: config.poll_timeout_secs,
            offset: None,
            pending: VecDeque::new(),
            feedback_keys: LruCache::new(window),
            next_token: token_base(),
        })
    }

    /// Create a transport from config, resolving the token
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        Self::new(config.resolve_token()?, config)
    }

    /// Point the transport at a self-hosted Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Get API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        let response: TelegramResponse<T> = self
            .http_client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {}", method))?
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if response.ok {
            response.result.context("No result in response")
        } else {
            let error_msg = response.description.unwrap_or_else(|| "Unknown error".to_string());
            error!("Telegram API error: {} (code: {:?})", error_msg, response.error_code);
            bail!("Telegram API error: {}", error_msg)
        }
    }

    /// Test the bot token and get bot info
    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", &serde_json::json!({})).await
    }

    async fn get_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let request = GetUpdatesRequest {
            offset: self.offset,
            limit: 100,
            timeout: self.poll_timeout_secs,
            allowed_updates: ["message", "callback_query"],
        };
        self.call("getUpdates", &request).await
    }

    async fn send_message(&self, chat_id: &str, text: &str, reply_markup: Option<serde_json::Value>) -> Result<TelegramMessage> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            reply_markup,
        };
        debug!("Sending Telegram message to {}", chat_id);
        self.call("sendMessage", &request).await
    }

    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<bool> {
        let request = AnswerCallbackRequest { callback_query_id, text };
        self.call("answerCallbackQuery", &request).await
    }

    /// Drop the feedback buttons from an answered message
    async fn clear_keyboard(&self, message: &TelegramMessage) -> Result<serde_json::Value> {
        let request = EditMarkupRequest {
            chat_id: message.chat.id,
            message_id: message.message_id,
            reply_markup: serde_json::json!({ "inline_keyboard": [] }),
        };
        self.call("editMessageReplyMarkup", &request).await
    }

    /// Remember `key` for `chat_id` and build the 👍/👎 keyboard that refers to it
    fn feedback_keyboard(&mut self, chat_id: &str, key: &str) -> (u64, serde_json::Value) {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.feedback_keys.put(
            token,
            FeedbackTarget {
                key: key.to_string(),
                chat_id: chat_id.to_string(),
                message_id: None,
            },
        );

        let keyboard = serde_json::json!({
            "inline_keyboard": [[
                { "text": "👍", "callback_data": callback_data(FeedbackSignal::Positive, token) },
                { "text": "👎", "callback_data": callback_data(FeedbackSignal::Negative, token) },
            ]]
        });
        (token, keyboard)
    }

    /// Bind a token to the message that carries its keyboard
    fn bind_feedback_message(&mut self, token: u64, message_id: i64) {
        if let Some(target) = self.feedback_keys.get_mut(&token) {
            target.message_id = Some(message_id);
        }
    }

    /// Knowledge key behind a callback token pressed in `chat_id` on
    /// `message_id`. A token is consumed once, and only by its own message.
    fn take_feedback_key(&mut self, token: u64, chat_id: &str, message_id: Option<i64>) -> Option<String> {
        if !self.feedback_keys.peek(&token)?.matches(chat_id, message_id) {
            warn!("Callback token {} pressed outside its message in chat {}", token, chat_id);
            return None;
        }
        self.feedback_keys.pop(&token).map(|target| target.key)
    }

    async fn translate(&mut self, update: TelegramUpdate) -> Option<Inbound> {
        if let Some(message) = update.message {
            return message_inbound(&message);
        }

        let query = update.callback_query?;
        let chat_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id)
            .to_string();
        let message_id = query.message.as_ref().map(|m| m.message_id);

        let parsed = query.data.as_deref().and_then(parse_callback_data);
        let key = parsed.and_then(|(_, token)| self.take_feedback_key(token, &chat_id, message_id));

        let notice = if key.is_some() { None } else { Some("Este feedback expirou.") };
        if let Err(e) = self.answer_callback(&query.id, notice).await {
            warn!("Failed to acknowledge callback: {:#}", e);
        }

        let (signal, key) = match (parsed, key) {
            (Some((signal, _)), Some(key)) => (signal, key),
            _ => {
                debug!("Ignoring stale or malformed callback {:?}", query.data);
                return None;
            }
        };

        if let Some(message) = &query.message {
            if let Err(e) = self.clear_keyboard(message).await {
                debug!("Failed to clear feedback keyboard: {:#}", e);
            }
        }

        Some(Inbound::Feedback {
            user_id: chat_id,
            key,
            signal,
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn receive(&mut self) -> Result<Option<Inbound>> {
        loop {
            if let Some(inbound) = self.pending.pop_front() {
                return Ok(Some(inbound));
            }

            match self.get_updates().await {
                Ok(updates) => {
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        if let Some(inbound) = self.translate(update).await {
                            self.pending.push_back(inbound);
                        }
                    }
                }
                Err(e) => {
                    warn!("Telegram polling failed, retrying in {:?}: {:#}", RETRY_DELAY, e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn send(&mut self, user_id: &str, reply: &Reply) -> Result<()> {
        let text = escape_html(&render(reply));
        let (token, markup) = match reply {
            Reply::Answer(Answer::Answered { key, .. }) => {
                let (token, keyboard) = self.feedback_keyboard(user_id, key);
                (Some(token), Some(keyboard))
            }
            _ => (None, None),
        };

        match self.send_message(user_id, &text, markup).await {
            Ok(sent) => {
                if let Some(token) = token {
                    self.bind_feedback_message(token, sent.message_id);
                }
            }
            Err(e) => {
                if let Some(token) = token {
                    self.feedback_keys.pop(&token);
                }
                return Err(e);
            }
        }
        info!("Telegram reply sent to {}", user_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Check a bot token has the `<id>:<secret>` shape
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.contains(':')
}

/// Escape HTML characters for Telegram HTML parse mode
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Random starting token so tokens from an earlier run do not resolve
fn token_base() -> u64 {
    // 48 bits keep callback data short
    uuid::Uuid::new_v4().as_u64_pair().0 >> 16
}

fn callback_data(signal: FeedbackSignal, token: u64) -> String {
    let sign = match signal {
        FeedbackSignal::Positive => '+',
        FeedbackSignal::Negative => '-',
    };
    format!("{}:{}:{}", CALLBACK_PREFIX, sign, token)
}

/// Parse `fb:<+|->:<token>`
fn parse_callback_data(data: &str) -> Option<(FeedbackSignal, u64)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != CALLBACK_PREFIX {
        return None;
    }
    let signal = match parts.next()? {
        "+" => FeedbackSignal::Positive,
        "-" => FeedbackSignal::Negative,
        _ => return None,
    };
    let token = parts.next()?.parse().ok()?;
    Some((signal, token))
}

/// Text messages from people; bots and non-text messages are skipped
fn message_inbound(message: &TelegramMessage) -> Option<Inbound> {
    if message.from.as_ref().is_some_and(|user| user.is_bot) {
        return None;
    }
    let text = message.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(Inbound::from_text(message.chat.id.to_string(), text))
}
