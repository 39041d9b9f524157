use crate::error::RbankResult;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> RbankResult<Vec<f32>>;
    fn embed_batch(&self, texts: &[&str]) -> RbankResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
}
