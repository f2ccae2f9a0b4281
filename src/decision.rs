//! Where answers come from.
//!
//! The engine only ever sees a `ComparisonResult`; how the pair is shown
//! and how the person answers lives behind `DecisionSource`.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::types::{ComparisonResult, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Judgement for `(a, b)` as presented.
    Answer(ComparisonResult),
    /// Stop asking; the session is persisted and can be resumed later.
    Pause,
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decision source closed: {0}")]
    Closed(String),
}

#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(&self, a: &str, b: &str, progress: Progress)
        -> Result<Decision, DecisionError>;
}

/// Adapts a plain function, e.g. a scripted oracle in tests.
pub struct FnDecisionSource<F> {
    f: F,
}

impl<F> FnDecisionSource<F>
where
    F: Fn(&str, &str) -> Decision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> DecisionSource for FnDecisionSource<F>
where
    F: Fn(&str, &str) -> Decision + Send + Sync,
{
    async fn decide(
        &self,
        a: &str,
        b: &str,
        _progress: Progress,
    ) -> Result<Decision, DecisionError> {
        Ok((self.f)(a, b))
    }
}

/// Line-oriented prompt: writes the pair to `W`, reads one answer per line
/// from `R`. End of input counts as a pause.
pub struct LineDecisionSource<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> LineDecisionSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

#[async_trait]
impl<R, W> DecisionSource for LineDecisionSource<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&self, a: &str, b: &str, progress: Progress) -> Result<Decision, DecisionError> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        let prompt = format!(
            "\n[{}/~{} {}%] Which is more important?\n  1) {a}\n  2) {b}\n",
            progress.asked + 1,
            progress.estimated_total,
            progress.percentage
        );
        writer.write_all(prompt.as_bytes()).await?;

        loop {
            writer.write_all(b"(1/2/=/p) > ").await?;
            writer.flush().await?;

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(Decision::Pause);
            }
            match parse_answer(&line) {
                Some(decision) => return Ok(decision),
                None => {
                    writer
                        .write_all(b"answer 1 or 2 for the more important item, = if equal, p to pause\n")
                        .await?;
                }
            }
        }
    }
}

/// Parse one typed answer. `1` means the first item shown is more important.
pub fn parse_answer(line: &str) -> Option<Decision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "1" | "a" => Some(Decision::Answer(ComparisonResult::Greater)),
        "2" | "b" => Some(Decision::Answer(ComparisonResult::Less)),
        "=" | "e" | "equal" => Some(Decision::Answer(ComparisonResult::Equal)),
        "p" | "q" | "pause" | "quit" => Some(Decision::Pause),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_parse_case_insensitively() {
        assert_eq!(
            parse_answer(" A\n"),
            Some(Decision::Answer(ComparisonResult::Greater))
        );
        assert_eq!(
            parse_answer("2"),
            Some(Decision::Answer(ComparisonResult::Less))
        );
        assert_eq!(
            parse_answer("="),
            Some(Decision::Answer(ComparisonResult::Equal))
        );
        assert_eq!(parse_answer("Quit"), Some(Decision::Pause));
        assert_eq!(parse_answer("maybe"), None);
    }

    #[tokio::test]
    async fn line_source_reprompts_then_pauses_at_eof() {
        let input: &[u8] = b"what\n1\n";
        let source = LineDecisionSource::new(input, Vec::<u8>::new());
        let progress = Progress::new(0, 5);

        let first = source.decide("x", "y", progress).await.unwrap();
        assert_eq!(first, Decision::Answer(ComparisonResult::Greater));

        let second = source.decide("x", "y", progress).await.unwrap();
        assert_eq!(second, Decision::Pause);

        let io = source.io.lock().await;
        let shown = String::from_utf8_lossy(&io.1);
        assert!(shown.contains("1) x"));
        assert!(shown.contains("answer 1 or 2"));
    }
}
