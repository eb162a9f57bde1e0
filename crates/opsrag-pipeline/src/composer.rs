//! Prompt assembly and the call into the completion service.
//!
//! Context truncation: chunks are kept in rank order while the joined context
//! (blank-line separated, counted in chars) fits `max_context_chars`. The first
//! chunk that does not fit and every chunk after it are dropped. A top-ranked
//! chunk that alone exceeds the budget is cut to its first `max_context_chars`
//! chars, so some context always reaches the model.

use std::sync::Arc;
use tracing::{debug, warn};

use opsrag_core::traits::CompletionService;
use opsrag_core::types::Chunk;
use opsrag_core::Result;

pub const PROMPT_TEMPLATE: &str = "Answer the question based only on the following context:\n{context}\n\nQuestion: {question}\n\nAnswer in a helpful and concise way:";

const SEPARATOR: &str = "\n\n";

/// The context block actually sent, and what was left out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub text: String,
    /// Chunks included (a cut top chunk counts).
    pub kept: usize,
    pub dropped: usize,
    /// The top chunk was cut to fit.
    pub cut: bool,
}

impl ContextWindow {
    pub fn fit(chunks: &[Chunk], max_chars: usize) -> Self {
        let sep_len = SEPARATOR.chars().count();
        let mut parts: Vec<&str> = Vec::new();
        let mut used = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.text.chars().count();
            let needed = if parts.is_empty() { len } else { used + sep_len + len };
            if needed <= max_chars {
                parts.push(&chunk.text);
                used = needed;
                continue;
            }
            if i == 0 {
                let text: String = chunk.text.chars().take(max_chars).collect();
                return Self { text, kept: 1, dropped: chunks.len() - 1, cut: true };
            }
            return Self { text: parts.join(SEPARATOR), kept: i, dropped: chunks.len() - i, cut: false };
        }
        Self { text: parts.join(SEPARATOR), kept: chunks.len(), dropped: 0, cut: false }
    }
}

pub struct AnswerComposer {
    completion: Arc<dyn CompletionService>,
    max_context_chars: usize,
}

impl AnswerComposer {
    pub fn new(completion: Arc<dyn CompletionService>, max_context_chars: usize) -> Self {
        Self { completion, max_context_chars }
    }

    pub fn completion(&self) -> &Arc<dyn CompletionService> { &self.completion }
    pub fn max_context_chars(&self) -> usize { self.max_context_chars }

    pub fn build_prompt(&self, question: &str, chunks: &[Chunk]) -> String {
        let window = ContextWindow::fit(chunks, self.max_context_chars);
        if window.dropped > 0 || window.cut {
            warn!(kept = window.kept, dropped = window.dropped, cut = window.cut, max_chars = self.max_context_chars, "context truncated");
        }
        render(&window.text, question)
    }

    /// Answer `question` from `chunks` (best first). Completion failures are returned as is.
    pub async fn compose(&self, question: &str, chunks: &[Chunk]) -> Result<String> {
        let prompt = self.build_prompt(question, chunks);
        debug!(service = self.completion.name(), chunks = chunks.len(), prompt_chars = prompt.chars().count(), "composing answer");
        self.completion.complete(&prompt).await
    }
}

/// Placeholders are substituted positionally, so braces inside chunk text are left alone.
fn render(context: &str, question: &str) -> String {
    let (head, rest) = PROMPT_TEMPLATE.split_once("{context}").unwrap_or((PROMPT_TEMPLATE, ""));
    let (middle, tail) = rest.split_once("{question}").unwrap_or((rest, ""));
    format!("{head}{context}{middle}{question}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts.iter().enumerate().map(|(i, t)| Chunk::new(i, None, *t)).collect()
    }

    #[test]
    fn everything_fits() {
        let w = ContextWindow::fit(&chunks(&["aaa", "bbb"]), 8);
        assert_eq!(w.text, "aaa\n\nbbb");
        assert_eq!((w.kept, w.dropped, w.cut), (2, 0, false));
    }

    #[test]
    fn lower_ranked_chunks_are_dropped_first() {
        let w = ContextWindow::fit(&chunks(&["aaa", "bbb", "c"]), 7);
        assert_eq!(w.text, "aaa");
        assert_eq!((w.kept, w.dropped), (1, 2));
    }

    #[test]
    fn dropping_stops_at_first_chunk_that_does_not_fit() {
        // "c" would fit after "aaa" but rank order is preserved.
        let w = ContextWindow::fit(&chunks(&["aaa", "bbbbbbbb", "c"]), 8);
        assert_eq!(w.text, "aaa");
        assert_eq!(w.dropped, 2);
    }

    #[test]
    fn oversized_top_chunk_is_cut() {
        let w = ContextWindow::fit(&chunks(&["ééééé", "b"]), 3);
        assert_eq!(w.text, "ééé");
        assert!(w.cut);
        assert_eq!((w.kept, w.dropped), (1, 1));
    }

    #[test]
    fn empty_retrieval_gives_empty_context() {
        let w = ContextWindow::fit(&[], 10);
        assert_eq!(w.text, "");
        assert_eq!((w.kept, w.dropped, w.cut), (0, 0, false));
    }

    #[test]
    fn template_placeholders_are_filled_once() {
        let prompt = render("ctx {question}", "why?");
        assert_eq!(
            prompt,
            "Answer the question based only on the following context:\nctx {question}\n\nQuestion: why?\n\nAnswer in a helpful and concise way:"
        );
    }
}
