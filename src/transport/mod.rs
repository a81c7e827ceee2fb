//! Chat transports for the knowledge core
//!
//! Supported transports:
//! - Telegram: Bot API long polling with 👍/👎 feedback buttons
//! - Console: line-based REPL on stdin/stdout
//!
//! A transport turns platform events into [`Inbound`] values and renders
//! [`Reply`] values back. [`serve`] drives one transport against a core.

pub mod console;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::knowledge::{Answer, CoreStats, FeedbackReply, FeedbackSignal, KnowledgeCore, KnowledgeEntry};

/// Chat commands shared by every transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Teach { question: String, answer: String },
    /// `/teach` without a `question | answer` pair
    TeachUsage,
    Stats,
}

/// Event delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Question { user_id: String, text: String },
    Feedback { user_id: String, key: String, signal: FeedbackSignal },
    Command { user_id: String, command: Command },
}

impl Inbound {
    /// Address replies to this event go to
    pub fn user_id(&self) -> &str {
        match self {
            Inbound::Question { user_id, .. }
            | Inbound::Feedback { user_id, .. }
            | Inbound::Command { user_id, .. } => user_id,
        }
    }

    /// Classify a text message as a command or a question
    pub fn from_text(user_id: impl Into<String>, text: &str) -> Self {
        let user_id = user_id.into();
        match parse_command(text) {
            Some(command) => Inbound::Command { user_id, command },
            None => Inbound::Question {
                user_id,
                text: text.to_string(),
            },
        }
    }
}

/// Response sent back through a transport
#[derive(Debug, Clone)]
pub enum Reply {
    Answer(Answer),
    Feedback { signal: FeedbackSignal, reply: FeedbackReply },
    Taught(KnowledgeEntry),
    Stats(CoreStats),
    Text(String),
}

/// Bidirectional chat channel
#[async_trait]
pub trait Transport: Send {
    /// Next inbound event, or `None` once the channel is closed
    async fn receive(&mut self) -> Result<Option<Inbound>>;

    /// Deliver a reply to `user_id`
    async fn send(&mut self, user_id: &str, reply: &Reply) -> Result<()>;

    /// Get transport name
    fn name(&self) -> &'static str;
}

pub const START_TEXT: &str = "Olá! Sou uma IA em treinamento. 😊\n\
    Converse comigo para me ajudar a aprender!\n\
    Use /ajuda para ver os comandos disponíveis.";

pub const HELP_TEXT: &str = "Comandos disponíveis:\n\
    /start - Inicia a conversa\n\
    /ajuda - Exibe esta mensagem\n\
    /ensinar pergunta | resposta - Ensina algo novo\n\
    /estatisticas - Mostra minhas estatísticas de aprendizado\n\n\
    Qualquer outra mensagem será processada como uma pergunta.";

pub const TEACH_USAGE_TEXT: &str = "Formato incorreto. Use: /ensinar pergunta | resposta";

/// Parse a `/command`, ignoring a trailing `@botname`. Returns `None` for
/// plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    Some(match name.as_str() {
        "start" => Command::Start,
        "stats" | "estatisticas" | "estatísticas" => Command::Stats,
        "teach" | "ensinar" => match args.split_once('|') {
            Some((question, answer)) if !question.trim().is_empty() && !answer.trim().is_empty() => Command::Teach {
                question: question.trim().to_string(),
                answer: answer.trim().to_string(),
            },
            _ => Command::TeachUsage,
        },
        _ => Command::Help,
    })
}

/// Run one inbound event through the core
pub async fn handle(core: &KnowledgeCore, inbound: Inbound) -> Reply {
    match inbound {
        Inbound::Question { user_id, text } => Reply::Answer(core.ask(&user_id, &text).await),
        Inbound::Feedback { user_id, key, signal } => Reply::Feedback {
            signal,
            reply: core.feedback(&user_id, &key, signal).await,
        },
        Inbound::Command { command, .. } => match command {
            Command::Start => Reply::Text(START_TEXT.to_string()),
            Command::Help => Reply::Text(HELP_TEXT.to_string()),
            Command::TeachUsage => Reply::Text(TEACH_USAGE_TEXT.to_string()),
            Command::Stats => Reply::Stats(core.stats().await),
            Command::Teach { question, answer } => match core.teach(&question, &answer).await {
                Ok(entry) => Reply::Taught(entry),
                Err(e) => Reply::Text(format!("Não consegui aprender isso: {}", e)),
            },
        },
    }
}

/// Serve `transport` until it closes
pub async fn serve(core: &KnowledgeCore, transport: &mut dyn Transport) -> Result<()> {
    while let Some(inbound) = transport.receive().await? {
        let user_id = inbound.user_id().to_string();
        debug!("{} event from {}: {:?}", transport.name(), user_id, inbound);

        let reply = handle(core, inbound).await;
        if let Err(e) = transport.send(&user_id, &reply).await {
            warn!("Failed to send {} reply to {}: {:#}", transport.name(), user_id, e);
        }
    }
    debug!("{} transport closed", transport.name());
    Ok(())
}

/// Plain-text rendering of a reply
pub fn render(reply: &Reply) -> String {
    match reply {
        Reply::Answer(Answer::Answered { text, .. }) => text.clone(),
        Reply::Answer(Answer::Rejected) => "Não entendi a pergunta. Pode reformular?".to_string(),
        Reply::Answer(Answer::Unanswerable { .. }) => {
            "Ainda não sei responder isso. Use /ensinar pergunta | resposta para me ensinar.".to_string()
        }
        Reply::Feedback { signal, reply } => match (reply, signal) {
            (FeedbackReply::Adjusted { .. }, FeedbackSignal::Positive) => {
                "Obrigado pelo feedback! Isso me ajuda a melhorar. 😊".to_string()
            }
            (FeedbackReply::Adjusted { .. }, FeedbackSignal::Negative) => {
                "Obrigado pelo feedback. Vou tentar melhorar! 🤔".to_string()
            }
            (FeedbackReply::Forgotten { .. }, _) => {
                "Obrigado pelo feedback. Esqueci essa resposta e vou buscar outra da próxima vez.".to_string()
            }
            (FeedbackReply::NotFound { .. }, _) => "Essa resposta não está mais na minha memória.".to_string(),
        },
        Reply::Taught(entry) => format!(
            "Obrigado! Aprendi que quando me perguntarem sobre '{}', devo responder: '{}'",
            entry.question, entry.answer
        ),
        Reply::Stats(stats) => format!(
            "📊 Estatísticas de aprendizado\n\n\
             Total de interações: {}\n\
             Respondidas da memória: {}\n\
             Aprendidas agora: {}\n\
             Sem resposta: {}\n\
             Feedback positivo: {}\n\
             Feedback negativo: {}\n\
             Respostas esquecidas: {}\n\n\
             Base de conhecimento: {} itens (confiança média {:.2})",
            stats.interactions,
            stats.answered_from_store,
            stats.acquired,
            stats.unanswerable,
            stats.positive_feedback,
            stats.negative_feedback,
            stats.forgotten,
            stats.store.total,
            stats.store.mean_confidence,
        ),
        Reply::Text(text) => text.clone(),
    }
}
