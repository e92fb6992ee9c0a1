use std::collections::HashSet;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};

use whisker_chat::{ChatMessage, ChatSession, Conversation, NetworkEvent, UserId};

/// Line-oriented chat screen: prints the reconciled conversation and sends
/// every non-empty stdin line to the peer.
pub struct ChatApp {
    session: ChatSession,
    conversation: Conversation,
    transcript: Transcript,
}

impl ChatApp {
    pub fn new(session: ChatSession, conversation: Conversation) -> Self {
        Self {
            session,
            conversation,
            transcript: Transcript::default(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("-- Connecting...");
        self.render();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                event = self.session.next_event() => match event {
                    Some(NetworkEvent::Connected) => {
                        println!("-- Connected - chat with user {}", self.conversation.peer());
                    }
                    Some(NetworkEvent::Disconnected) => println!("-- Connecting..."),
                    Some(NetworkEvent::MessageReceived(_)) => {}
                    None => break,
                },
                line = lines.next_line() => match line? {
                    Some(text) => self.submit(&text),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
            self.render();
        }

        self.session.shutdown().await;
        Ok(())
    }

    fn submit(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Err(err) = self.session.send(self.conversation.peer(), text) {
            println!("-- not sent: {err}");
        }
    }

    /// Prints whatever the view gained since the last call.
    fn render(&mut self) {
        let view = self.conversation.view(&self.session.messages());
        for message in self.transcript.unseen(&view) {
            println!("{}", format_line(message, self.conversation.local()));
        }
    }
}

type MessageKey = (Option<i64>, UserId, Option<String>, String);

/// Remembers which messages are already on screen. The reconciled view is
/// sorted by timestamp, so a late arrival can land anywhere in it.
#[derive(Default)]
struct Transcript {
    printed: HashSet<MessageKey>,
}

impl Transcript {
    /// Messages of `view` not printed yet, in view order. Marks them printed.
    fn unseen<'a>(&mut self, view: &'a [ChatMessage]) -> Vec<&'a ChatMessage> {
        view.iter()
            .filter(|message| self.printed.insert(key(message)))
            .collect()
    }
}

fn key(message: &ChatMessage) -> MessageKey {
    (
        message.id,
        message.sender_id,
        message.timestamp.clone(),
        message.content.clone(),
    )
}

fn format_line(message: &ChatMessage, local: UserId) -> String {
    let who = if message.sender_id == local {
        "me".to_string()
    } else {
        format!("user {}", message.sender_id)
    };
    let time = message
        .sent_at()
        .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    format!("[{time}] {who}: {}", message.content)
}
