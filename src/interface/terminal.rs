use crate::{
    bus::{Event, EventBus},
    chat::{Conversation, Message, SearchMode, Sender},
    pipeline::{Dispatch, MessagePipeline, Submission},
    session::ConversationStore,
    speech::{SpeechEvent, VoiceInput, VoiceState},
};
use chrono::{DateTime, Local, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, info};

const FEATURES: [&str; 5] = [
    "AI-Powered Conversations",
    "Lightning Fast Responses",
    "Smart & Intuitive",
    "Advanced Technology",
    "Global Knowledge",
];

const HELP: &str = "These commands are supported:
/help - Display this text.
/new - Start a new conversation.
/history [query] - List conversations, optionally filtered.
/open <n|id> - Switch to a conversation by list number or id.
/delete <n|id> - Delete a conversation.
/search [general|google|knowledge] <query> - Search instead of chatting.
/voice - Toggle voice input.
/quit - Leave.
Anything else is sent to the assistant.";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    New,
    History(String),
    Open(i64),
    Delete(i64),
    Search(SearchMode, String),
    Voice,
    Quit,
    Say(String),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let target = |arg: &str| {
            arg.parse::<i64>()
                .map_err(|_| format!("Usage: /{} <n|id>", name.to_lowercase()))
        };

        match name.to_lowercase().as_str() {
            "help" | "start" => Ok(Command::Help),
            "new" => Ok(Command::New),
            "history" => Ok(Command::History(arg.to_string())),
            "open" => target(arg).map(Command::Open),
            "delete" => target(arg).map(Command::Delete),
            "search" => {
                let (mode, query) = match arg.split_once(char::is_whitespace) {
                    Some((tag, query)) => match SearchMode::parse(tag) {
                        Some(mode) => (mode, query.trim()),
                        None => (SearchMode::General, arg),
                    },
                    None => match SearchMode::parse(arg) {
                        Some(_) => (SearchMode::General, ""),
                        None => (SearchMode::General, arg),
                    },
                };
                if query.is_empty() {
                    return Err("Usage: /search [general|google|knowledge] <query>".to_string());
                }
                Ok(Command::Search(mode, query.to_string()))
            }
            "voice" => Ok(Command::Voice),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command /{}. Use /help.", other)),
        }
    }
}

enum Input {
    Line(Option<String>),
    Voice(SpeechEvent),
}

/// Line-oriented chat view over stdin/stdout.
pub struct TerminalInterface {
    bus: Arc<EventBus>,
    session: Arc<Mutex<ConversationStore>>,
    pipeline: Arc<MessagePipeline>,
    voice: VoiceInput,
}

impl TerminalInterface {
    pub fn new(
        bus: Arc<EventBus>,
        session: Arc<Mutex<ConversationStore>>,
        pipeline: Arc<MessagePipeline>,
        voice: VoiceInput,
    ) -> Self {
        Self {
            bus,
            session,
            pipeline,
            voice,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        print_banner();
        self.show_active().await;

        // Replies arrive asynchronously, so they are printed from the bus.
        let mut bus_rx = self.bus.subscribe();
        let session = self.session.clone();
        tokio::spawn(async move {
            while let Ok(event) = bus_rx.recv().await {
                match event {
                    Event::MessageAppended {
                        conversation_id,
                        message,
                    } if message.sender != Sender::User => {
                        let session = session.lock().await;
                        if session.active_id() != Some(conversation_id) {
                            let title = session
                                .get(conversation_id)
                                .map(|c| c.title.clone())
                                .unwrap_or_default();
                            println!("[in \"{}\"]", title);
                        }
                        println!("{}", render_message(&message));
                    }
                    Event::Typing(true) => println!("  Assistant is typing..."),
                    Event::SpellChecking(true) => println!("  Checking spelling..."),
                    _ => {}
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let input = tokio::select! {
                line = lines.next_line() => Input::Line(line?),
                event = self.voice.next_event() => Input::Voice(event),
            };
            match input {
                Input::Line(None) => break,
                Input::Line(Some(line)) if line.trim().is_empty() => {}
                Input::Line(Some(line)) => match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => self.handle(command).await,
                    Err(usage) => println!("{}", usage),
                },
                Input::Voice(event) => self.on_voice_event(event).await,
            }
        }

        info!("Input closed, leaving chat");
        Ok(())
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Help => println!("{}", HELP),
            Command::New => {
                self.session.lock().await.start_new().await;
                self.show_active().await;
            }
            Command::History(query) => {
                let session = self.session.lock().await;
                let matches = session.filter(&query);
                if matches.is_empty() {
                    println!("No conversations found.");
                }
                let now = Utc::now();
                for conversation in matches {
                    // Numbered by position in the full history so /open and /delete agree.
                    let n = session
                        .history()
                        .iter()
                        .position(|c| c.id == conversation.id)
                        .unwrap_or_default();
                    let marker = if session.active_id() == Some(conversation.id) {
                        "→"
                    } else {
                        " "
                    };
                    println!("{}", render_summary(n + 1, marker, conversation, now));
                }
            }
            Command::Open(target) => {
                let Some(id) = self.resolve(target).await else {
                    println!("No such conversation.");
                    return;
                };
                if self.session.lock().await.switch_to(id).await {
                    self.show_active().await;
                }
            }
            Command::Delete(target) => {
                let Some(id) = self.resolve(target).await else {
                    println!("No such conversation.");
                    return;
                };
                let mut session = self.session.lock().await;
                let was_active = session.active_id() == Some(id);
                if session.delete_by_id(id).await {
                    println!("Conversation deleted.");
                }
                drop(session);
                if was_active {
                    self.show_active().await;
                }
            }
            Command::Search(mode, query) => self.submit(query, Dispatch::Search(mode)),
            Command::Say(text) => self.submit(text, Dispatch::Chat),
            Command::Voice => {
                if !self.voice.is_supported() {
                    println!("Voice input is not supported here. Please type your message.");
                } else if self.voice.state() == VoiceState::Listening {
                    // The transcript is sent once the recognizer reports the end.
                    self.voice.toggle();
                    println!("Stopped listening.");
                } else if self.voice.toggle() {
                    println!("Listening... use /voice again to stop.");
                }
            }
            Command::Quit => {}
        }
    }

    async fn on_voice_event(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Result(transcript) => {
                println!("  🎤 {}", transcript);
                self.voice.on_result(&transcript);
            }
            SpeechEvent::End => {
                self.voice.on_end();
                let transcript = self.voice.take_transcript();
                if !transcript.trim().is_empty() {
                    self.submit(transcript, Dispatch::Chat);
                }
            }
            SpeechEvent::Error(e) => {
                let mut session = self.session.lock().await;
                self.voice.on_error(&mut session, &e).await;
            }
        }
    }

    /// Send in the background so the prompt stays usable while waiting.
    fn submit(&self, text: String, dispatch: Dispatch) {
        if self.pipeline.is_in_flight() {
            println!("Still waiting for the previous reply...");
            return;
        }
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            match pipeline.submit(&text, dispatch).await {
                Submission::Busy => println!("Still waiting for the previous reply..."),
                Submission::Completed { reply: None, .. } => {
                    error!("Reply arrived for a deleted conversation")
                }
                _ => {}
            }
        });
    }

    /// Accept either a 1-based list position or a raw conversation id.
    async fn resolve(&self, target: i64) -> Option<i64> {
        let session = self.session.lock().await;
        let history = session.history();
        if target >= 1 && (target as usize) <= history.len() {
            return Some(history[target as usize - 1].id);
        }
        session.get(target).map(|c| c.id)
    }

    async fn show_active(&self) {
        let session = self.session.lock().await;
        let Some(conversation) = session.active() else {
            return;
        };
        println!("── {} ──", conversation.title);
        for message in &conversation.messages {
            println!("{}", render_message(message));
        }
    }
}

fn print_banner() {
    println!("Welcome to your AI assistant! 🚀");
    for feature in FEATURES {
        println!("  ✦ {}", feature);
    }
    println!("Use /help to see what I can do.\n");
}

fn render_message(message: &Message) -> String {
    let time = format_time(message.timestamp);
    match message.sender {
        Sender::User => match message.search_type {
            Some(_) => format!("[{}] You: 🔍 Searching: {}", time, message.text),
            None => format!("[{}] You: {}", time, message.text),
        },
        Sender::Bot => match message.search_type {
            Some(mode) => format!("[{}] Assistant ({}): {}", time, mode.label(), message.text),
            None => format!("[{}] Assistant: {}", time, message.text),
        },
        Sender::System => format!("  {}", message.text),
    }
}

fn render_summary(n: usize, marker: &str, conversation: &Conversation, now: DateTime<Utc>) -> String {
    format!(
        "{} {:>2}. {} ({}, {} messages)\n      {}",
        marker,
        n,
        conversation.title,
        format_date(conversation.timestamp, now),
        conversation.message_count,
        conversation.last_message.lines().next().unwrap_or_default(),
    )
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M").to_string()
}

fn format_date(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - timestamp).num_days() {
        0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        days @ 2..=6 => format!("{} days ago", days),
        _ => timestamp.with_timezone(&Local).format("%x").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ChatBackend, ChatReply, SearchReply};
    use crate::chat::{Intent, SPEECH_APOLOGY};
    use crate::config::Config;
    use crate::speech::ScriptedRecognizer;
    use async_trait::async_trait;
    use chrono::Duration;

    struct EchoBackend;

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn correct_spelling(&self, text: &str) -> Result<String, ApiError> {
            Ok(text.to_string())
        }

        async fn chat(&self, message: &str) -> Result<ChatReply, ApiError> {
            Ok(ChatReply {
                response: Some(format!("echo: {}", message)),
                intent: None,
            })
        }

        async fn search(&self, _query: &str, _mode: SearchMode) -> Result<SearchReply, ApiError> {
            Ok(SearchReply::default())
        }
    }

    async fn terminal(
        recognizer: ScriptedRecognizer,
    ) -> (tempfile::TempDir, TerminalInterface, Arc<Mutex<ConversationStore>>) {
        let (dir, session) = crate::session::test_session().await;
        let session = Arc::new(Mutex::new(session));
        let bus = Arc::new(EventBus::new());
        let pipeline = Arc::new(MessagePipeline::new(
            session.clone(),
            Arc::new(EchoBackend),
            bus.clone(),
            Config::default().without_delays(),
        ));
        let voice = VoiceInput::new(Some(Box::new(recognizer)));
        let terminal = TerminalInterface::new(bus, session.clone(), pipeline, voice);
        (dir, terminal, session)
    }

    /// Pump recognizer events into the view until the session ends.
    async fn pump_voice(terminal: &mut TerminalInterface) {
        loop {
            let event = terminal.voice.next_event().await;
            let done = event == SpeechEvent::End;
            terminal.on_voice_event(event).await;
            if done {
                break;
            }
        }
    }

    #[tokio::test]
    async fn voice_transcript_is_sent_and_voice_can_restart() {
        let (_dir, mut terminal, session) = terminal(ScriptedRecognizer::new("what is rust")).await;
        terminal.handle(Command::Voice).await;
        assert_eq!(terminal.voice.state(), VoiceState::Listening);
        terminal.handle(Command::Voice).await;
        pump_voice(&mut terminal).await;
        assert_eq!(terminal.voice.state(), VoiceState::Idle);

        let reply = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let last = session.lock().await.messages().last().cloned();
                match last {
                    Some(message) if message.text.starts_with("echo:") => return message,
                    _ => tokio::task::yield_now().await,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply.text, "echo: what is rust");
        {
            let session = session.lock().await;
            let user = session.messages().iter().find(|m| m.sender == Sender::User).unwrap();
            assert_eq!(user.text, "what is rust");
        }

        terminal.handle(Command::Voice).await;
        assert_eq!(terminal.voice.state(), VoiceState::Listening);
    }

    #[tokio::test]
    async fn voice_error_apologises_and_returns_to_idle() {
        let (_dir, mut terminal, session) = terminal(ScriptedRecognizer::new("")).await;
        terminal.handle(Command::Voice).await;

        terminal
            .on_voice_event(SpeechEvent::Error("no-speech".into()))
            .await;
        terminal.on_voice_event(SpeechEvent::End).await;

        assert_eq!(terminal.voice.state(), VoiceState::Idle);
        let session = session.lock().await;
        let last = session.messages().last().unwrap();
        assert_eq!(last.text, SPEECH_APOLOGY);
        assert_eq!(last.intent, Some(Intent::Error));
        assert!(session.messages().iter().all(|m| m.sender != Sender::User));
    }

    #[test]
    fn plain_text_is_a_chat_message() {
        assert_eq!(
            "  how are you?  ".parse::<Command>(),
            Ok(Command::Say("how are you?".into()))
        );
    }

    #[test]
    fn parses_conversation_commands() {
        assert_eq!("/new".parse::<Command>(), Ok(Command::New));
        assert_eq!("/HELP".parse::<Command>(), Ok(Command::Help));
        assert_eq!("/open 3".parse::<Command>(), Ok(Command::Open(3)));
        assert_eq!(
            "/delete 1714817800000".parse::<Command>(),
            Ok(Command::Delete(1_714_817_800_000))
        );
        assert_eq!(
            "/history rust".parse::<Command>(),
            Ok(Command::History("rust".into()))
        );
        assert_eq!("/history".parse::<Command>(), Ok(Command::History(String::new())));
        assert!("/open".parse::<Command>().is_err());
        assert!("/frobnicate".parse::<Command>().is_err());
    }

    #[test]
    fn parses_search_modes() {
        assert_eq!(
            "/search google rust async".parse::<Command>(),
            Ok(Command::Search(SearchMode::Google, "rust async".into()))
        );
        assert_eq!(
            "/search knowledge refunds".parse::<Command>(),
            Ok(Command::Search(SearchMode::Knowledge, "refunds".into()))
        );
        assert_eq!(
            "/search tokio runtime".parse::<Command>(),
            Ok(Command::Search(SearchMode::General, "tokio runtime".into()))
        );
        assert!("/search".parse::<Command>().is_err());
        assert!("/search google".parse::<Command>().is_err());
    }

    #[test]
    fn relative_dates() {
        let now = Utc::now();
        assert_eq!(format_date(now - Duration::hours(3), now), "Today");
        assert_eq!(format_date(now - Duration::hours(30), now), "Yesterday");
        assert_eq!(format_date(now - Duration::days(4), now), "4 days ago");
        let old = now - Duration::days(30);
        assert_eq!(
            format_date(old, now),
            old.with_timezone(&Local).format("%x").to_string()
        );
    }

    #[test]
    fn renders_search_messages_with_labels() {
        let query = Message::user(2, "rust").with_search_type(SearchMode::Google);
        assert!(render_message(&query).ends_with("You: 🔍 Searching: rust"));

        let result = Message::bot(3, "found it", Intent::SearchResult)
            .with_search_type(SearchMode::Google);
        assert!(render_message(&result).ends_with("Assistant (Google Search): found it"));

        let notice = Message::spell_correction(4, "teh", "the");
        assert_eq!(render_message(&notice), "  ✓ Spell check applied: \"teh\" → \"the\"");
    }
}
