use crate::embedder::Embedder;
use crate::error::RbankResult;
use crate::memory::{BankStats, MemoryItem};

pub trait StrategyStore {
    // Append
    fn add(&mut self, item: MemoryItem) -> RbankResult<()>;
    fn add_many(&mut self, items: Vec<MemoryItem>) -> RbankResult<usize>;

    // Read
    fn all(&self) -> &[MemoryItem];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn contains_source(&self, problem_id: &str) -> bool;

    // Maintenance
    fn clear(&mut self) -> RbankResult<()>;
    fn embed_missing(
        &mut self,
        embedder: &dyn Embedder,
        batch_size: usize,
        force: bool,
    ) -> RbankResult<usize>;

    // Stats
    fn stats(&self) -> BankStats;
}
