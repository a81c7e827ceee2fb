//! Console transport - a line-based chat on stdin/stdout
//!
//! Every line is a question or a `/command`. `+` and `-` (or `/up`, `/down`)
//! rate the last answer. `/quit` or end of input closes the session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

use super::{render, Inbound, Reply, Transport};
use crate::knowledge::{Answer, FeedbackSignal};

const CONSOLE_USER: &str = "console";
const PROMPT: &str = "> ";

/// Console chat over any line reader and writer
pub struct ConsoleTransport<R, W> {
    reader: R,
    writer: W,
    /// Key of the last answered question, target of `+`/`-`
    last_key: Option<String>,
    prompt: bool,
}

impl ConsoleTransport<BufReader<Stdin>, Stdout> {
    /// Interactive session on the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).with_prompt(true)
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            last_key: None,
            prompt: false,
        }
    }

    /// Print a prompt before reading each line
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn rating(line: &str) -> Option<FeedbackSignal> {
    match line {
        "+" | "/up" | "👍" => Some(FeedbackSignal::Positive),
        "-" | "/down" | "👎" => Some(FeedbackSignal::Negative),
        _ => None,
    }
}

#[async_trait]
impl<R, W> Transport for ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<Inbound>> {
        loop {
            if self.prompt {
                self.writer.write_all(PROMPT.as_bytes()).await?;
                self.writer.flush().await?;
            }

            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("Failed to read console input")?;
            if read == 0 {
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "/quit" | "/exit" | "/sair") {
                return Ok(None);
            }

            if let Some(signal) = rating(line) {
                match self.last_key.take() {
                    Some(key) => {
                        return Ok(Some(Inbound::Feedback {
                            user_id: CONSOLE_USER.to_string(),
                            key,
                            signal,
                        }))
                    }
                    None => {
                        self.write_line("Nenhuma resposta para avaliar.").await?;
                        continue;
                    }
                }
            }

            return Ok(Some(Inbound::from_text(CONSOLE_USER, line)));
        }
    }

    async fn send(&mut self, _user_id: &str, reply: &Reply) -> Result<()> {
        let mut text = render(reply);
        if let Reply::Answer(Answer::Answered { key, confidence, .. }) = reply {
            self.last_key = Some(key.clone());
            text.push_str(&format!("\n  (confiança {:.2}; avalie com + ou -)", confidence));
        }
        self.write_line(&text).await
    }

    fn name(&self) -> &'static str {
        "console"
    }
}
