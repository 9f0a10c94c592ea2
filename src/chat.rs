//! Text chatbot. It only talks about the products; site control stays with
//! the voice agent.

use crate::types::chat::{Content, Role};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub mod gemini;

pub use gemini::GeminiChat;

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant for Clouds Gadgets. You can explain products. \
If the user explicitly asks to perform an action on the site (like 'go to contact', 'dark mode', 'start scroll'), \
respond confirming you would do it if you had hands, but for now guide them to use the Voice AI (the red button) \
for direct control.";

pub const GREETING: &str =
    "Hello! I'm the Clouds AI. Ask me about our gadgets or tell me to change the website theme.";

pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Incremental text of one model reply.
pub type TextStream = BoxStream<'static, anyhow::Result<String>>;

// The chatbot depends on this seam rather than on HTTP, so tests drive it
// with `MockChatTransport`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Starts a reply to the last entry of `history`.
    async fn stream_reply(
        &self,
        history: &[Content],
        system_instruction: &str,
    ) -> anyhow::Result<TextStream>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
        }
    }

    pub fn model(text: &str) -> Self {
        Self {
            role: Role::Model,
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, or a reply was still streaming.
    Ignored,
    Replied,
    /// The transport failed; the fallback message was appended.
    Failed,
}

struct Loading<'a>(&'a AtomicBool);

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Chatbot {
    transport: Arc<dyn ChatTransport>,
    instructions: String,
    /// Completed exchanges, as the model sees them.
    history: Mutex<Vec<Content>>,
    loading: AtomicBool,
    transcript: watch::Sender<Vec<ChatMessage>>,
}

impl Chatbot {
    pub fn new<T: ChatTransport + 'static>(transport: T) -> Self {
        let (transcript, _) = watch::channel(vec![ChatMessage::model(GREETING)]);
        Self {
            transport: Arc::new(transport),
            instructions: SYSTEM_INSTRUCTION.to_string(),
            history: Mutex::new(Vec::new()),
            loading: AtomicBool::new(false),
            transcript,
        }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.borrow().clone()
    }

    /// Every change to the transcript, streamed deltas included.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.transcript.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    fn history(&self) -> MutexGuard<'_, Vec<Content>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, message: ChatMessage) {
        self.transcript.send_modify(|transcript| transcript.push(message));
    }

    fn replace_last(&self, text: &str) {
        self.transcript.send_modify(|transcript| {
            if let Some(last) = transcript.last_mut() {
                last.text = text.to_string();
            }
        });
    }

    /// Sends one user message and streams the reply into the transcript.
    pub async fn send(&self, input: &str) -> SendOutcome {
        if input.trim().is_empty() {
            return SendOutcome::Ignored;
        }
        if self.loading.swap(true, Ordering::AcqRel) {
            tracing::debug!("reply still streaming, ignoring input");
            return SendOutcome::Ignored;
        }
        let _loading = Loading(&self.loading);

        self.append(ChatMessage::user(input));
        let mut contents = self.history().clone();
        contents.push(Content::new(Role::User, input));

        let mut stream = match self
            .transport
            .stream_reply(&contents, &self.instructions)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("chat request failed: {:#}", e);
                self.append(ChatMessage::model(FALLBACK_REPLY));
                return SendOutcome::Failed;
            }
        };

        self.append(ChatMessage::model(""));
        let mut reply = String::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(delta) => {
                    reply.push_str(&delta);
                    self.replace_last(&reply);
                }
                Err(e) => {
                    tracing::error!("chat stream failed: {:#}", e);
                    self.append(ChatMessage::model(FALLBACK_REPLY));
                    return SendOutcome::Failed;
                }
            }
        }

        tracing::debug!("chat reply complete, {} chars", reply.len());
        let mut history = self.history();
        history.push(Content::new(Role::User, input));
        history.push(Content::new(Role::Model, &reply));
        SendOutcome::Replied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn deltas(parts: &[&str]) -> TextStream {
        let items: Vec<anyhow::Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
        Box::pin(stream::iter(items))
    }

    fn texts(bot: &Chatbot) -> Vec<(Role, String)> {
        bot.transcript()
            .into_iter()
            .map(|m| (m.role, m.text))
            .collect()
    }

    #[test]
    fn transcript_starts_with_greeting() {
        let bot = Chatbot::new(MockChatTransport::new());
        assert_eq!(bot.transcript(), vec![ChatMessage::model(GREETING)]);
    }

    #[tokio::test]
    async fn reply_is_accumulated_into_one_entry() {
        let mut transport = MockChatTransport::new();
        transport
            .expect_stream_reply()
            .withf(|history, instructions| {
                history.len() == 1
                    && history[0].joined_text() == "What is the Nimbus?"
                    && instructions.to_string() == SYSTEM_INSTRUCTION
            })
            .times(1)
            .returning(|_, _| Ok(deltas(&["A cloud ", "speaker."])));
        let bot = Chatbot::new(transport);

        assert_eq!(bot.send("What is the Nimbus?").await, SendOutcome::Replied);
        assert_eq!(
            texts(&bot)[1..],
            [
                (Role::User, "What is the Nimbus?".to_string()),
                (Role::Model, "A cloud speaker.".to_string()),
            ]
        );
        assert!(!bot.is_loading());
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let bot = Chatbot::new(MockChatTransport::new());
        assert_eq!(bot.send("   ").await, SendOutcome::Ignored);
        assert_eq!(bot.transcript().len(), 1);
    }

    #[tokio::test]
    async fn failed_request_appends_one_fallback() {
        let mut transport = MockChatTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_stream_reply()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("503 Service Unavailable")));
        transport
            .expect_stream_reply()
            .withf(|history, _| history.len() == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(deltas(&["ok"])));
        let bot = Chatbot::new(transport);

        assert_eq!(bot.send("hi").await, SendOutcome::Failed);
        assert_eq!(
            texts(&bot)[1..],
            [
                (Role::User, "hi".to_string()),
                (Role::Model, FALLBACK_REPLY.to_string()),
            ]
        );

        // The failed exchange never reached the model history.
        assert_eq!(bot.send("again").await, SendOutcome::Replied);
    }

    #[tokio::test]
    async fn broken_stream_keeps_partial_text() {
        let mut transport = MockChatTransport::new();
        transport.expect_stream_reply().returning(|_, _| {
            let items: Vec<anyhow::Result<String>> =
                vec![Ok("Part".to_string()), Err(anyhow::anyhow!("reset"))];
            Ok(Box::pin(stream::iter(items)))
        });
        let bot = Chatbot::new(transport);

        assert_eq!(bot.send("hi").await, SendOutcome::Failed);
        let transcript = texts(&bot);
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[2], (Role::Model, "Part".to_string()));
        assert_eq!(transcript[3], (Role::Model, FALLBACK_REPLY.to_string()));
    }

    #[tokio::test]
    async fn history_carries_previous_exchanges() {
        let mut transport = MockChatTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_stream_reply()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(deltas(&["Hi there"])));
        transport
            .expect_stream_reply()
            .withf(|history, _| {
                let roles: Vec<_> = history.iter().map(|c| c.role).collect();
                roles == [Some(Role::User), Some(Role::Model), Some(Role::User)]
                    && history[1].joined_text() == "Hi there"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(deltas(&["Sure"])));
        let bot = Chatbot::new(transport);

        assert_eq!(bot.send("hello").await, SendOutcome::Replied);
        assert_eq!(bot.send("tell me more").await, SendOutcome::Replied);
    }

    #[tokio::test]
    async fn partial_updates_are_observable_and_input_waits() {
        let (delta_tx, delta_rx) = mpsc::channel::<String>(4);
        let delta_rx = Arc::new(Mutex::new(Some(delta_rx)));
        let mut transport = MockChatTransport::new();
        transport.expect_stream_reply().times(1).returning(move |_, _| {
            let rx = delta_rx.lock().unwrap().take().unwrap();
            Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|delta| (Ok::<_, anyhow::Error>(delta), rx))
            })))
        });
        let bot = Arc::new(Chatbot::new(transport));
        let mut updates = bot.subscribe();

        let sender = bot.clone();
        let reply = tokio::spawn(async move { sender.send("specs?").await });

        delta_tx.send("Eight ".to_string()).await.unwrap();
        timeout(
            Duration::from_secs(5),
            updates.wait_for(|t| t.last().is_some_and(|m| m.text == "Eight ")),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(bot.is_loading());
        assert_eq!(bot.send("another").await, SendOutcome::Ignored);

        delta_tx.send("cores.".to_string()).await.unwrap();
        drop(delta_tx);
        assert_eq!(reply.await.unwrap(), SendOutcome::Replied);
        assert_eq!(
            bot.transcript().last(),
            Some(&ChatMessage::model("Eight cores."))
        );
        assert_eq!(bot.transcript().len(), 3);
    }
}
