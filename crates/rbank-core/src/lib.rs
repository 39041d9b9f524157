pub mod embedder;
pub mod error;
pub mod extraction;
#[cfg(feature = "embeddings")]
pub mod fastembed_embedder;
pub mod judge;
pub mod memory;
pub mod problem;
pub mod retrieval;
pub mod stats;
pub mod store;

pub use embedder::Embedder;
pub use error::{RbankError, RbankResult};
#[cfg(feature = "embeddings")]
pub use fastembed_embedder::{EmbeddingChoice, FastEmbedder};
pub use judge::{Evaluation, Number};
pub use memory::{BankStats, MemoryItem, MemoryKind};
pub use problem::{load_problems, Problem};
pub use retrieval::{LeakMode, RetrievalConfig, Retrieved, Retriever};
pub use stats::Summary;
pub use store::StrategyStore;
