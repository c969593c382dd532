//! Voice input and output.
//!
//! Platform speech engines are injected through [`SpeechRecognizer`] and
//! [`SpeechOutput`].

pub mod recognition;
pub mod synthesis;

pub use recognition::{
    DEFAULT_WAKE_WORD, ListeningState, RecognitionEffect, RecognitionEvent, RecognitionMachine,
    SpeechRecognizer,
};
pub use synthesis::{
    SPEECH_PITCH, SPEECH_RATE, Speaker, SpeechOutput, Utterance, Voice, select_voice, speech_text,
};
