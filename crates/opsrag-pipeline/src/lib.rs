//! Question answering over the indexed corpus: retrieval, prompt composition
//! and the error boundary exposed to callers.

pub mod composer;
pub mod pipeline;

pub use composer::{AnswerComposer, ContextWindow, PROMPT_TEMPLATE};
pub use pipeline::{IndexLoader, PipelineError, RetrievalPipeline, Stage};
