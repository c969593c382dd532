//! Streaming response assembly.
//!
//! [`StreamAssembler`] is a synchronous reducer over response chunks: it keeps
//! the running text and citation set and produces the update to publish after
//! each chunk. [`consume_stream`] drives it from an async chunk stream, with
//! an idle timeout on every wait and a cancellation token checked before
//! every partial publish.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::errors::{JarvisError, JarvisResult};
use crate::core::ids::MessageId;
use crate::tasks::TaskStore;

use super::citations::CitationSet;
use super::command::{AppliedAction, apply_action, extract_actions, strip_partial_command};
use super::render::{render_markdown, render_streaming};
use super::types::{MessageUpdate, ResponseChunk, UpdatePhase};

/// Text shown in place of a response whose stream failed.
pub const APOLOGY_MESSAGE: &str =
    "Apologies, Sir. I seem to be experiencing a communication issue with my core servers.";

/// Receiver of message updates.
pub trait UpdateSink {
    /// Publish an update. Returns `false` once nobody is listening anymore.
    fn publish(&mut self, update: MessageUpdate) -> bool;
}

impl UpdateSink for Vec<MessageUpdate> {
    fn publish(&mut self, update: MessageUpdate) -> bool {
        self.push(update);
        true
    }
}

impl UpdateSink for mpsc::UnboundedSender<MessageUpdate> {
    fn publish(&mut self, update: MessageUpdate) -> bool {
        self.send(update).is_ok()
    }
}

/// Stream consumption settings.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Longest wait for the next chunk.
    pub idle_timeout: Duration,
    /// Cancelled when the consumer of the updates goes away.
    pub cancel: CancellationToken,
}

impl StreamOptions {
    /// Options with a fresh cancellation token.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            cancel: CancellationToken::new(),
        }
    }
}

/// A fully assembled response.
#[derive(Debug, Clone)]
pub struct FinishedResponse {
    /// Final update, without cursor and without embedded commands.
    pub update: MessageUpdate,
    /// Task commands applied at stream end.
    pub applied: Vec<AppliedAction>,
}

impl FinishedResponse {
    /// Whether any applied command changed the task list.
    #[must_use]
    pub fn tasks_changed(&self) -> bool {
        self.applied.iter().any(|a| a.changed)
    }
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream ran to completion.
    Completed(FinishedResponse),
    /// The stream failed; the apology was published.
    Failed(JarvisError),
    /// The update consumer went away; nothing more was published.
    Cancelled,
}

/// Incremental reducer over response chunks.
#[derive(Debug)]
pub struct StreamAssembler {
    message_id: MessageId,
    raw_text: String,
    citations: CitationSet,
    chunks: usize,
}

impl StreamAssembler {
    /// Start assembling the response for `message_id`.
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            raw_text: String::new(),
            citations: CitationSet::new(),
            chunks: 0,
        }
    }

    /// Message being assembled.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Text safe to display mid-stream.
    #[must_use]
    pub fn display_text(&self) -> &str {
        strip_partial_command(&self.raw_text)
    }

    /// Fold one chunk in and return the partial update to publish.
    pub fn push(&mut self, chunk: ResponseChunk) -> MessageUpdate {
        self.chunks += 1;
        self.raw_text.push_str(&chunk.text_delta);
        if let Some(records) = &chunk.citations {
            self.citations.extend(records);
        }

        MessageUpdate {
            message_id: self.message_id,
            phase: UpdatePhase::Partial,
            raw_text: self.raw_text.clone(),
            rendered_html: render_streaming(self.display_text()),
            citations: self.citations.to_vec(),
        }
    }

    /// Finish the response: apply embedded commands to `tasks` and render the
    /// final text.
    pub fn finish<S>(self, tasks: &mut S) -> FinishedResponse
    where
        S: TaskStore + ?Sized,
    {
        let extraction = extract_actions(&self.raw_text);
        for failure in &extraction.failures {
            tracing::warn!(message_id = %self.message_id, "ignored task command: {failure}");
        }

        let applied = extraction
            .actions
            .into_iter()
            .map(|action| apply_action(&mut *tasks, action))
            .collect();

        tracing::debug!(
            message_id = %self.message_id,
            chunks = self.chunks,
            citations = self.citations.len(),
            "response assembled"
        );

        FinishedResponse {
            update: MessageUpdate {
                message_id: self.message_id,
                phase: UpdatePhase::Final,
                rendered_html: render_markdown(&extraction.cleaned_text),
                raw_text: extraction.cleaned_text,
                citations: self.citations.to_vec(),
            },
            applied,
        }
    }
}

/// Update replacing a failed response with the apology.
#[must_use]
pub fn failure_update(message_id: MessageId) -> MessageUpdate {
    MessageUpdate {
        message_id,
        phase: UpdatePhase::Failed,
        raw_text: APOLOGY_MESSAGE.to_string(),
        rendered_html: render_markdown(APOLOGY_MESSAGE),
        citations: Vec::new(),
    }
}

/// Publish the apology for `error` and report the failure.
pub fn fail_response<K>(message_id: MessageId, error: JarvisError, sink: &mut K) -> StreamOutcome
where
    K: UpdateSink + ?Sized,
{
    tracing::error!(%message_id, "response stream failed: {error}");
    sink.publish(failure_update(message_id));
    StreamOutcome::Failed(error)
}

/// Consume a response stream to completion.
///
/// Chunks are folded in arrival order and each partial update is published.
/// On normal end the embedded commands are applied to `tasks` and the final
/// update is published. A stream error or idle timeout publishes the apology
/// instead; no retry is attempted.
///
/// Once the commands are applied the outcome is `Completed`, even if the
/// final update can no longer be delivered.
pub async fn consume_stream<St, K, S>(
    message_id: MessageId,
    mut stream: St,
    sink: &mut K,
    tasks: &mut S,
    options: &StreamOptions,
) -> StreamOutcome
where
    St: Stream<Item = JarvisResult<ResponseChunk>> + Unpin,
    K: UpdateSink + ?Sized,
    S: TaskStore + ?Sized,
{
    let mut assembler = StreamAssembler::new(message_id);

    loop {
        let next = tokio::select! {
            biased;
            () = options.cancel.cancelled() => return StreamOutcome::Cancelled,
            next = tokio::time::timeout(options.idle_timeout, stream.next()) => next,
        };

        let chunk = match next {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(error))) => return fail_response(message_id, error, sink),
            Ok(None) => break,
            Err(_) => {
                return fail_response(
                    message_id,
                    JarvisError::StreamTimeout(options.idle_timeout),
                    sink,
                );
            }
        };

        let update = assembler.push(chunk);
        if !publish_unless_cancelled(sink, update, &options.cancel) {
            return StreamOutcome::Cancelled;
        }
    }

    let finished = assembler.finish(tasks);
    if !sink.publish(finished.update.clone()) {
        tracing::debug!(%message_id, "final update not delivered");
        options.cancel.cancel();
    }
    StreamOutcome::Completed(finished)
}

fn publish_unless_cancelled<K>(sink: &mut K, update: MessageUpdate, cancel: &CancellationToken) -> bool
where
    K: UpdateSink + ?Sized,
{
    if cancel.is_cancelled() {
        return false;
    }
    if sink.publish(update) {
        return true;
    }
    tracing::debug!("update receiver gone, cancelling stream");
    cancel.cancel();
    false
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::assistant::command::{TASK_COMMAND_SENTINEL, TASK_COMMAND_SEPARATOR};
    use crate::assistant::types::CitationRecord;
    use crate::tasks::TaskList;

    fn ok_chunks(chunks: Vec<ResponseChunk>) -> impl Stream<Item = JarvisResult<ResponseChunk>> + Unpin {
        stream::iter(chunks.into_iter().map(Ok))
    }

    fn options() -> StreamOptions {
        StreamOptions::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stream_produces_partials_then_final() {
        let id = MessageId::new();
        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();

        let outcome = consume_stream(
            id,
            ok_chunks(vec![ResponseChunk::text("Hello, "), ResponseChunk::text("**Sir**.")]),
            &mut sink,
            &mut tasks,
            &options(),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Completed(_)));
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[0].phase, UpdatePhase::Partial);
        assert_eq!(sink[0].raw_text, "Hello, ");
        assert!(sink[1].rendered_html.contains("█"));

        let last = sink.last().unwrap();
        assert_eq!(last.phase, UpdatePhase::Final);
        assert_eq!(last.raw_text, "Hello, **Sir**.");
        assert!(last.rendered_html.contains("<strong>Sir</strong>"));
        assert!(!last.rendered_html.contains("█"));
    }

    #[tokio::test]
    async fn test_split_marker_never_displayed() {
        let id = MessageId::new();
        let full = format!(
            "Consider it done.\n{TASK_COMMAND_SENTINEL}{TASK_COMMAND_SEPARATOR}{}",
            r#"{"action":"add","task":"Buy milk"}"#
        );
        let chunks: Vec<ResponseChunk> = full
            .as_bytes()
            .chunks(4)
            .map(|piece| ResponseChunk::text(String::from_utf8(piece.to_vec()).unwrap()))
            .collect();

        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();
        let outcome = consume_stream(id, ok_chunks(chunks), &mut sink, &mut tasks, &options()).await;

        assert!(matches!(outcome, StreamOutcome::Completed(_)));
        for update in &sink {
            assert!(!update.rendered_html.contains('@'), "leaked: {}", update.rendered_html);
            assert!(!update.rendered_html.contains("action"));
        }

        let last = sink.last().unwrap();
        assert_eq!(last.raw_text, "Consider it done.");
        assert_eq!(tasks.items().len(), 1);
        assert_eq!(tasks.items()[0].text, "Buy milk");
        assert!(!tasks.items()[0].completed);
    }

    #[tokio::test]
    async fn test_citations_deduplicated_across_chunks() {
        let id = MessageId::new();
        let chunks = vec![
            ResponseChunk::text("Per ").with_citations(vec![CitationRecord::new("https://a.example", "A")]),
            ResponseChunk::text("sources").with_citations(vec![
                CitationRecord::new("https://a.example", "A"),
                CitationRecord {
                    uri: None,
                    title: Some("nameless".to_string()),
                },
                CitationRecord::new("https://b.example", "B"),
            ]),
        ];

        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();
        consume_stream(id, ok_chunks(chunks), &mut sink, &mut tasks, &options()).await;

        let uris: Vec<&str> = sink
            .last()
            .unwrap()
            .citations
            .iter()
            .map(|c| c.uri.as_str())
            .collect();
        assert_eq!(uris, vec!["https://a.example", "https://b.example"]);
        assert_eq!(sink[0].citations.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_publishes_apology() {
        let id = MessageId::new();
        let items: Vec<JarvisResult<ResponseChunk>> = vec![
            Ok(ResponseChunk::text("Partial")),
            Err(JarvisError::Stream("connection reset".to_string())),
            Ok(ResponseChunk::text(" never seen")),
        ];

        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();
        let outcome = consume_stream(id, stream::iter(items), &mut sink, &mut tasks, &options()).await;

        assert!(matches!(outcome, StreamOutcome::Failed(JarvisError::Stream(_))));
        let last = sink.last().unwrap();
        assert_eq!(last.phase, UpdatePhase::Failed);
        assert_eq!(last.raw_text, APOLOGY_MESSAGE);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_idle_timeout_is_a_stream_error() {
        let id = MessageId::new();
        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();
        let opts = StreamOptions::new(Duration::from_millis(20));

        let outcome = consume_stream(
            id,
            stream::pending::<JarvisResult<ResponseChunk>>(),
            &mut sink,
            &mut tasks,
            &opts,
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Failed(JarvisError::StreamTimeout(_))));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].phase, UpdatePhase::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_publishes_nothing() {
        let id = MessageId::new();
        let mut sink: Vec<MessageUpdate> = Vec::new();
        let mut tasks = TaskList::new();
        let opts = options();
        opts.cancel.cancel();

        let outcome = consume_stream(
            id,
            ok_chunks(vec![ResponseChunk::text("ignored")]),
            &mut sink,
            &mut tasks,
            &opts,
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Cancelled));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_and_skips_commands() {
        let id = MessageId::new();
        let (mut tx, rx) = mpsc::unbounded_channel::<MessageUpdate>();
        drop(rx);
        let mut tasks = TaskList::new();
        let opts = options();
        let text = format!(
            "Ok {TASK_COMMAND_SENTINEL}{TASK_COMMAND_SEPARATOR}{}",
            r#"{"action":"add","task":"x"}"#
        );

        let outcome = consume_stream(
            id,
            ok_chunks(vec![ResponseChunk::text(text)]),
            &mut tx,
            &mut tasks,
            &opts,
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Cancelled));
        assert!(opts.cancel.is_cancelled());
        assert!(tasks.is_empty());
    }

    /// Accepts a fixed number of updates, then reports the receiver gone.
    struct ClosingSink {
        accepted: Vec<MessageUpdate>,
        limit: usize,
    }

    impl UpdateSink for ClosingSink {
        fn publish(&mut self, update: MessageUpdate) -> bool {
            if self.accepted.len() >= self.limit {
                return false;
            }
            self.accepted.push(update);
            true
        }
    }

    #[tokio::test]
    async fn test_final_publish_failure_still_completes() {
        let id = MessageId::new();
        let mut sink = ClosingSink {
            accepted: Vec::new(),
            limit: 1,
        };
        let mut tasks = TaskList::new();
        let opts = options();
        let text = format!(
            "Noted. {TASK_COMMAND_SENTINEL}{TASK_COMMAND_SEPARATOR}{}",
            r#"{"action":"add","task":"Call Pepper"}"#
        );

        let outcome = consume_stream(
            id,
            ok_chunks(vec![ResponseChunk::text(text)]),
            &mut sink,
            &mut tasks,
            &opts,
        )
        .await;

        let finished = match outcome {
            StreamOutcome::Completed(finished) => finished,
            other => panic!("expected a completed outcome, got {other:?}"),
        };
        assert!(finished.tasks_changed());
        assert_eq!(finished.update.raw_text, "Noted.");
        assert_eq!(tasks.items().len(), 1);
        assert_eq!(sink.accepted.len(), 1);
        assert!(opts.cancel.is_cancelled());
    }

    #[test]
    fn test_assembler_is_a_pure_reducer() {
        let mut assembler = StreamAssembler::new(MessageId::new());
        let first = assembler.push(ResponseChunk::text("abc"));
        let again = StreamAssembler::new(first.message_id).push(ResponseChunk::text("abc"));
        assert_eq!(first.rendered_html, again.rendered_html);

        assembler.push(ResponseChunk::default());
        assert_eq!(assembler.raw_text(), "abc");
    }

    #[test]
    fn test_finish_with_malformed_command_keeps_text() {
        let mut assembler = StreamAssembler::new(MessageId::new());
        let text = format!("Hmm {TASK_COMMAND_SENTINEL}{TASK_COMMAND_SEPARATOR}{{invalid json");
        assembler.push(ResponseChunk::text(text.clone()));

        let mut tasks = TaskList::new();
        let finished = assembler.finish(&mut tasks);
        assert_eq!(finished.update.raw_text, text);
        assert!(finished.applied.is_empty());
        assert!(!finished.tasks_changed());
        assert!(tasks.is_empty());
    }
}
