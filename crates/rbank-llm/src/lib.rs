pub mod client;
pub mod extractor;
pub mod solver;

pub use client::{CompletionClient, CompletionRequest, LlamaServerClient, LlmSettings};
pub use extractor::Extractor;
pub use solver::{parse_solution, MathSolver, Solution};
