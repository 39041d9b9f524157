//! Math solving prompt and `REASONING:` / `ANSWER:` response parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use rbank_core::RbankResult;

use crate::client::{CompletionClient, CompletionRequest};

const SYSTEM_PROMPT: &str = "You are a math problem solver. Solve problems step-by-step using clear reasoning.

Format your response as:
REASONING: <show your step-by-step calculations>
ANSWER: <final numeric answer only>";

const HINT_REMINDER: &str = "\n**Remember**: The hints above provide STRATEGIES ONLY. You must calculate the answer yourself using your own arithmetic.";

/// A parsed model trajectory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub reasoning: String,
    pub answer: String,
    pub full_response: String,
}

pub struct MathSolver<'a> {
    client: &'a dyn CompletionClient,
    max_tokens: u32,
    temperature: f32,
    seed: Option<u64>,
}

impl<'a> MathSolver<'a> {
    pub fn new(client: &'a dyn CompletionClient) -> Self {
        Self {
            client,
            max_tokens: 16384,
            temperature: 0.1,
            seed: None,
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

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Solve `question`, optionally with a rendered hint block from retrieval.
    pub fn solve(&self, question: &str, hints: &str) -> RbankResult<Solution> {
        let request = CompletionRequest::new(user_prompt(question))
            .with_system(system_prompt(hints))
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_seed(self.seed);
        let response = self.client.generate(&request)?;
        Ok(parse_solution(&response))
    }
}

pub fn system_prompt(hints: &str) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT);
    if !hints.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(hints);
        prompt.push_str(HINT_REMINDER);
    }
    prompt
}

pub fn user_prompt(question: &str) -> String {
    format!("## Problem:\n{question}\n\n## Your Solution:")
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+\.?\d*").expect("valid regex"))
}

/// Split a response into reasoning and final answer.
///
/// Falls back to the last number in the text when the markers are missing.
pub fn parse_solution(response: &str) -> Solution {
    // Reasoning models emit a <think> block before the formatted answer. A
    // reply truncated inside that block has no answer of its own.
    let body = match response.rfind("</think>") {
        Some(idx) => &response[idx + "</think>".len()..],
        None => match response.find("<think>") {
            Some(idx) => &response[..idx],
            None => response,
        },
    };

    let (reasoning, answer) = match body.split_once("ANSWER:") {
        Some((before, after)) if body.contains("REASONING:") => {
            let answer = after.split("ANSWER:").next().unwrap_or_default();
            (before.replace("REASONING:", "").trim().to_string(), answer.trim().to_string())
        }
        _ => {
            let answer = number_re()
                .find_iter(body)
                .last()
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (body.trim().to_string(), answer)
        }
    };

    Solution {
        reasoning,
        answer,
        full_response: response.to_string(),
    }
}
