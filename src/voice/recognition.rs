//! Speech recognition as an explicit state machine.
//!
//! The recognizer itself is an injected [`SpeechRecognizer`]; the machine only
//! decides which effects each recognizer or user event produces.

use regex::Regex;

/// Default wake word for standby listening.
pub const DEFAULT_WAKE_WORD: &str = "Jarvis";

/// Standby errors after which the recognizer is simply restarted.
const BENIGN_STANDBY_ERRORS: [&str; 2] = ["no-speech", "aborted"];

/// Listening mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    /// Not listening.
    Idle,
    /// One-shot dictation into the input field.
    PushToTalk,
    /// Continuous listening for the wake word.
    Standby,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The microphone button was pressed.
    PushToTalkToggled,
    /// The standby switch was flipped.
    StandbyToggled,
    /// The recognizer produced a transcript.
    Result {
        /// Recognized text.
        transcript: String,
        /// Whether the recognizer committed to this text.
        is_final: bool,
    },
    /// The recognizer session ended.
    Ended,
    /// The recognizer failed with an error code.
    Error(String),
}

/// Outputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEffect {
    /// Start a recognizer session.
    StartRecognizer {
        /// Keep listening across utterances.
        continuous: bool,
    },
    /// Stop the running session.
    StopRecognizer,
    /// Empty the input field.
    ClearInput,
    /// Show a provisional transcript; empty hides it.
    SetInterim(String),
    /// Replace the input field content.
    SetInput(String),
    /// Send a message as if typed and submitted.
    Submit(String),
}

/// Platform speech recognizer.
pub trait SpeechRecognizer {
    /// Begin a session.
    fn start(&mut self, continuous: bool);
    /// End the current session.
    fn stop(&mut self);
}

/// Recognition state machine.
#[derive(Debug, Clone)]
pub struct RecognitionMachine {
    state: ListeningState,
    wake_word: Regex,
}

impl RecognitionMachine {
    /// Create an idle machine listening for `wake_word` in standby.
    ///
    /// # Errors
    /// Returns an error if the wake-word pattern cannot be compiled.
    pub fn new(wake_word: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"(?is)^\s*{}(?:[\s,.!?:;]+(.*)|$)",
            regex::escape(wake_word.trim())
        );
        Ok(Self {
            state: ListeningState::Idle,
            wake_word: Regex::new(&pattern)?,
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ListeningState {
        self.state
    }

    /// Whether a recognizer session should be running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state != ListeningState::Idle
    }

    /// Command following the wake word, if `transcript` starts with it.
    #[must_use]
    pub fn strip_wake_word<'a>(&self, transcript: &'a str) -> Option<&'a str> {
        self.wake_word
            .captures(transcript)
            .map(|caps| caps.get(1).map_or("", |m| m.as_str().trim()))
    }

    /// Apply `event` and return the resulting effects.
    pub fn handle(&mut self, event: RecognitionEvent) -> Vec<RecognitionEffect> {
        use ListeningState::{Idle, PushToTalk, Standby};
        use RecognitionEffect::{ClearInput, SetInput, SetInterim, StartRecognizer, StopRecognizer, Submit};

        match (self.state, event) {
            (Idle, RecognitionEvent::PushToTalkToggled) => {
                self.state = PushToTalk;
                vec![ClearInput, StartRecognizer { continuous: false }]
            }
            (PushToTalk, RecognitionEvent::PushToTalkToggled) => {
                self.state = Idle;
                vec![StopRecognizer, SetInterim(String::new())]
            }
            (Idle, RecognitionEvent::StandbyToggled) => {
                self.state = Standby;
                vec![StartRecognizer { continuous: true }]
            }
            (Standby, RecognitionEvent::StandbyToggled) => {
                self.state = Idle;
                vec![StopRecognizer, SetInterim(String::new())]
            }
            (PushToTalk, RecognitionEvent::Result { transcript, is_final }) => {
                if is_final {
                    vec![SetInterim(String::new()), SetInput(transcript)]
                } else {
                    vec![SetInterim(transcript)]
                }
            }
            (Standby, RecognitionEvent::Result { transcript, is_final }) => {
                let Some(command) = self.strip_wake_word(&transcript) else {
                    return Vec::new();
                };
                if !is_final {
                    return vec![SetInterim(command.to_string())];
                }
                if command.is_empty() {
                    return vec![SetInterim(String::new())];
                }
                tracing::debug!(command, "wake word heard");
                vec![SetInterim(String::new()), Submit(command.to_string())]
            }
            (PushToTalk, RecognitionEvent::Ended) => {
                self.state = Idle;
                vec![SetInterim(String::new())]
            }
            (Standby, RecognitionEvent::Ended) => vec![StartRecognizer { continuous: true }],
            (Standby, RecognitionEvent::Error(code))
                if BENIGN_STANDBY_ERRORS.contains(&code.as_str()) =>
            {
                Vec::new()
            }
            (PushToTalk | Standby, RecognitionEvent::Error(code)) => {
                tracing::warn!(%code, state = ?self.state, "speech recognition error");
                self.state = Idle;
                vec![StopRecognizer, SetInterim(String::new())]
            }
            // Mode switches while the other mode runs are ignored; events from
            // a stopped session are stale.
            (PushToTalk, RecognitionEvent::StandbyToggled)
            | (Standby, RecognitionEvent::PushToTalkToggled)
            | (
                Idle,
                RecognitionEvent::Result { .. } | RecognitionEvent::Ended | RecognitionEvent::Error(_),
            ) => Vec::new(),
        }
    }

    /// Apply `event`, run recognizer effects on `recognizer`, and return the
    /// remaining effects for the input surface.
    pub fn drive<R>(&mut self, event: RecognitionEvent, recognizer: &mut R) -> Vec<RecognitionEffect>
    where
        R: SpeechRecognizer + ?Sized,
    {
        self.handle(event)
            .into_iter()
            .filter(|effect| match effect {
                RecognitionEffect::StartRecognizer { continuous } => {
                    recognizer.start(*continuous);
                    false
                }
                RecognitionEffect::StopRecognizer => {
                    recognizer.stop();
                    false
                }
                _ => true,
            })
            .collect()
    }
}
