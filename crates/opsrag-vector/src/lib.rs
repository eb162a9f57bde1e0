//! Embedding providers, the persisted vector index store and the retriever.

pub mod embed_provider;
pub mod index;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;
pub mod writer;

pub use embed_provider::EmbeddingProvider;
pub use index::{IndexManifest, VectorIndex};
pub use search::Retriever;
pub use store::IndexStore;
