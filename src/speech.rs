//! Voice input on top of a pluggable speech-to-text engine.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chat::{Intent, Message, SPEECH_APOLOGY};
use crate::session::ConversationStore;

/// What a recognizer reports while a session is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Latest transcript, interim or final.
    Result(String),
    /// The session is over, whether stopped or finished on its own.
    End,
    Error(String),
}

/// A speech-to-text engine. It reports through the sender it is given on
/// `start` until it sends [`SpeechEvent::End`].
pub trait SpeechRecognizer: Send {
    fn start(&mut self, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<()>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Unsupported,
    Idle,
    Listening,
}

pub struct VoiceInput {
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    state: VoiceState,
    transcript: String,
    events_tx: mpsc::UnboundedSender<SpeechEvent>,
    events_rx: mpsc::UnboundedReceiver<SpeechEvent>,
}

impl VoiceInput {
    pub fn new(recognizer: Option<Box<dyn SpeechRecognizer>>) -> Self {
        let state = if recognizer.is_some() {
            VoiceState::Idle
        } else {
            info!("Speech recognition not available");
            VoiceState::Unsupported
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            recognizer,
            state,
            transcript: String::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_supported(&self) -> bool {
        self.state != VoiceState::Unsupported
    }

    /// Start listening when idle, stop when listening.
    /// Returns whether voice input is now listening.
    pub fn toggle(&mut self) -> bool {
        let Some(recognizer) = self.recognizer.as_mut() else {
            return false;
        };

        match self.state {
            VoiceState::Idle => {
                self.transcript.clear();
                match recognizer.start(self.events_tx.clone()) {
                    Ok(()) => self.state = VoiceState::Listening,
                    Err(e) => error!(error = %e, "Failed to start speech recognition"),
                }
            }
            VoiceState::Listening => recognizer.stop(),
            VoiceState::Unsupported => {}
        }
        self.state == VoiceState::Listening
    }

    /// Wait for the recognizer's next event. Never resolves when there is none.
    pub async fn next_event(&mut self) -> SpeechEvent {
        match self.events_rx.recv().await {
            Some(event) => event,
            // Unreachable while `events_tx` is alive.
            None => std::future::pending().await,
        }
    }

    /// Latest (possibly interim) transcript from the engine.
    pub fn on_result(&mut self, transcript: &str) {
        self.transcript = transcript.to_string();
    }

    pub fn on_end(&mut self) {
        if self.state == VoiceState::Listening {
            self.state = VoiceState::Idle;
        }
    }

    /// Ends the session and tells the user to type instead.
    pub async fn on_error(&mut self, session: &mut ConversationStore, error: &str) -> Option<Message> {
        error!(error, "Speech recognition error");
        self.on_end();
        self.transcript.clear();

        let id = session.active_id()?;
        let message = Message::bot(session.next_message_id(id), SPEECH_APOLOGY, Intent::Error);
        session.append_to(id, message).await
    }

    pub fn take_transcript(&mut self) -> String {
        std::mem::take(&mut self.transcript)
    }
}

/// Recognizer that replays a fixed transcript when stopped.
#[cfg(test)]
pub(crate) struct ScriptedRecognizer {
    transcript: String,
    pub(crate) calls: std::sync::Arc<std::sync::Mutex<(usize, usize)>>,
    events: Option<mpsc::UnboundedSender<SpeechEvent>>,
}

#[cfg(test)]
impl ScriptedRecognizer {
    pub(crate) fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            calls: Default::default(),
            events: None,
        }
    }
}

#[cfg(test)]
impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&mut self, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<()> {
        self.calls.lock().unwrap().0 += 1;
        self.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().1 += 1;
        if let Some(events) = self.events.take() {
            let _ = events.send(SpeechEvent::Result(self.transcript.clone()));
            let _ = events.send(SpeechEvent::End);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Sender;
    use std::sync::{Arc, Mutex};

    fn voice(transcript: &str) -> (VoiceInput, Arc<Mutex<(usize, usize)>>) {
        let recognizer = ScriptedRecognizer::new(transcript);
        let calls = recognizer.calls.clone();
        (VoiceInput::new(Some(Box::new(recognizer))), calls)
    }

    /// Feed every queued event back into the state machine.
    fn drain(input: &mut VoiceInput) -> Vec<SpeechEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = input.events_rx.try_recv() {
            match &event {
                SpeechEvent::Result(text) => input.on_result(text),
                SpeechEvent::End => input.on_end(),
                SpeechEvent::Error(_) => {}
            }
            seen.push(event);
        }
        seen
    }

    #[test]
    fn unsupported_without_recognizer() {
        let mut input = VoiceInput::new(None);
        assert!(!input.is_supported());
        assert!(!input.toggle());
        assert_eq!(input.state(), VoiceState::Unsupported);
    }

    #[tokio::test]
    async fn toggle_starts_and_stops() {
        let (mut input, calls) = voice("hello there");
        input.on_result("stale");

        assert!(input.toggle());
        assert_eq!(input.state(), VoiceState::Listening);
        assert_eq!(input.take_transcript(), "");

        // Still listening until the engine confirms the end.
        assert!(input.toggle());
        let events = drain(&mut input);

        assert_eq!(
            events,
            vec![SpeechEvent::Result("hello there".into()), SpeechEvent::End]
        );
        assert_eq!(input.state(), VoiceState::Idle);
        assert_eq!(input.take_transcript(), "hello there");
        assert_eq!(*calls.lock().unwrap(), (1, 1));

        assert!(input.toggle());
        assert_eq!(*calls.lock().unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn next_event_delivers_in_order() {
        let (mut input, _calls) = voice("ok");
        input.toggle();
        input.toggle();

        assert_eq!(input.next_event().await, SpeechEvent::Result("ok".into()));
        assert_eq!(input.next_event().await, SpeechEvent::End);
    }

    #[tokio::test]
    async fn error_appends_apology_and_ends_session() {
        let (_dir, mut session) = crate::session::test_session().await;
        let (mut input, _calls) = voice("");
        input.toggle();
        input.on_result("half a sen");

        let message = input.on_error(&mut session, "no-speech").await.unwrap();

        assert_eq!(input.state(), VoiceState::Idle);
        assert_eq!(input.take_transcript(), "");
        assert_eq!(message.sender, Sender::Bot);
        assert_eq!(message.text, SPEECH_APOLOGY);
        assert_eq!(message.intent, Some(Intent::Error));
        assert_eq!(session.messages().last(), Some(&message));
    }
}
