//! Spoken responses: voice selection and utterance playback.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Speaking rate of every utterance.
pub const SPEECH_RATE: f32 = 1.05;
/// Pitch of every utterance.
pub const SPEECH_PITCH: f32 = 0.9;

const PREFERRED_VOICE: &str = "Google UK English Male";

/// Installed platform voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Display name, e.g. `Google UK English Male`.
    pub name: String,
    /// BCP 47 language tag.
    pub lang: String,
}

impl Voice {
    /// Create a voice descriptor.
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }

    fn is_male(&self) -> bool {
        self.name.contains("Male")
    }
}

/// Pick the voice closest to a British male butler.
///
/// Preference: the named Google voice, then an `en-GB` male voice, then any
/// `en-GB` voice, then any English male voice.
#[must_use]
pub fn select_voice(voices: &[Voice]) -> Option<&Voice> {
    voices
        .iter()
        .find(|v| v.name == PREFERRED_VOICE)
        .or_else(|| voices.iter().find(|v| v.lang == "en-GB" && v.is_male()))
        .or_else(|| voices.iter().find(|v| v.lang == "en-GB"))
        .or_else(|| {
            voices
                .iter()
                .find(|v| v.lang.starts_with("en-") && v.is_male())
        })
}

/// One thing to say.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Plain text.
    pub text: String,
    /// Voice, or the platform default.
    pub voice: Option<Voice>,
    /// Speaking rate.
    pub rate: f32,
    /// Pitch.
    pub pitch: f32,
}

impl Utterance {
    /// Utterance with the standard rate and pitch.
    pub fn new(text: impl Into<String>, voice: Option<Voice>) -> Self {
        Self {
            text: text.into(),
            voice,
            rate: SPEECH_RATE,
            pitch: SPEECH_PITCH,
        }
    }
}

/// Platform speech synthesizer.
pub trait SpeechOutput {
    /// Stop whatever is being spoken.
    fn cancel(&mut self);
    /// Queue `utterance`.
    fn speak(&mut self, utterance: Utterance);
}

/// Speaks responses through a [`SpeechOutput`] with the selected voice.
#[derive(Debug)]
pub struct Speaker<O> {
    output: O,
    voice: Option<Voice>,
}

impl<O: SpeechOutput> Speaker<O> {
    /// Create a speaker using the platform default voice until voices load.
    pub const fn new(output: O) -> Self {
        Self {
            output,
            voice: None,
        }
    }

    /// Re-select the voice after the platform voice list changed.
    pub fn update_voices(&mut self, voices: &[Voice]) {
        if voices.is_empty() {
            return;
        }
        self.voice = select_voice(voices).cloned();
    }

    /// Selected voice.
    #[must_use]
    pub const fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    /// Interrupt current speech and say `text`. Blank text is not spoken.
    pub fn speak(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        self.output.cancel();
        self.output
            .speak(Utterance::new(text, self.voice.clone()));
        true
    }

    /// Underlying output.
    pub const fn output(&self) -> &O {
        &self.output
    }
}

/// Flatten markdown to the plain text that should be read aloud.
///
/// Formatting marks and link targets are dropped; code blocks are skipped.
#[must_use]
pub fn speech_text(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(markdown.len());
    let mut in_code_block = false;
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Text(text) | Event::Code(text) if !in_code_block => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::TableCell,
            ) => out.push('\n'),
            _ => {}
        }
    }

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
