use tracing::debug;

use rbank_core::extraction::{failure_prompt, parse_memory_items, success_prompt};
use rbank_core::{MemoryItem, RbankResult};

use crate::client::{CompletionClient, CompletionRequest};
use crate::solver::Solution;

/// Distils memory items from a solved or failed trajectory via the LLM.
pub struct Extractor<'a> {
    client: &'a dyn CompletionClient,
    max_tokens: u32,
    temperature: f32,
    max_items: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(client: &'a dyn CompletionClient) -> Self {
        Self {
            client,
            max_tokens: 2048,
            temperature: 0.1,
            max_items: 3,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn extract(
        &self,
        problem_id: &str,
        question: &str,
        solution: &Solution,
        expected: &str,
        success: bool,
    ) -> RbankResult<Vec<MemoryItem>> {
        let prompt = if success {
            success_prompt(question, &solution.reasoning)
        } else {
            failure_prompt(question, &solution.reasoning, expected)
        };
        let request = CompletionRequest::new(prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        let response = self.client.generate(&request)?;
        let items = parse_memory_items(&response, problem_id, success, self.max_items);
        debug!(problem_id, success, items = items.len(), "extracted memories");
        Ok(items)
    }
}
