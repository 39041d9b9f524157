//! Prompts and response parsing for distilling memory items from trajectories.
//!
//! The model is asked for 1-3 blocks of the form
//!
//! ```text
//! MEMORY 1:
//! TITLE: ...
//! DESCRIPTION: ...
//! CONTENT: ...
//! ```

use crate::memory::MemoryItem;

const FIELD_MARKERS: &[&str] = &["TITLE:", "DESCRIPTION:", "CONTENT:", "MEMORY "];

pub fn success_prompt(question: &str, reasoning: &str) -> String {
    format!(
        "You successfully solved this math problem. Extract 1-3 generalizable strategies that led to success.

PROBLEM: {question}

YOUR SOLUTION: {reasoning}

Extract strategies in this format:

MEMORY 1:
TITLE: <concise strategy name>
DESCRIPTION: <one sentence summary>
CONTENT: <detailed transferable strategy>

MEMORY 2:
...

Focus on WHY the approach worked and how it could apply to similar problems."
    )
}

pub fn failure_prompt(question: &str, reasoning: &str, expected: &str) -> String {
    format!(
        "You attempted this math problem but got it wrong. Extract 1-3 lessons about what went wrong.

PROBLEM: {question}

YOUR ATTEMPT: {reasoning}

EXPECTED: {expected}

Extract lessons in this format:

MEMORY 1:
TITLE: <what to avoid or check>
DESCRIPTION: <one sentence summary>
CONTENT: <detailed lesson or preventive strategy>

MEMORY 2:
...

Focus on the mistake and how to prevent it in future similar problems."
    )
}

/// Parse `MEMORY n:` blocks. Blocks missing any field are dropped; at most
/// `max_items` are returned.
pub fn parse_memory_items(
    response: &str,
    problem_id: &str,
    success: bool,
    max_items: usize,
) -> Vec<MemoryItem> {
    response
        .split("MEMORY ")
        .skip(1)
        .filter_map(|block| {
            let title = extract_field(block, "TITLE:")?;
            let description = extract_field(block, "DESCRIPTION:")?;
            let content = extract_field(block, "CONTENT:")?;
            Some(MemoryItem::new(
                title,
                description,
                content,
                problem_id.to_string(),
                success,
            ))
        })
        .take(max_items)
        .collect()
}

/// Value of `field` up to the next marker, trimmed. `None` when absent or empty.
fn extract_field(block: &str, field: &str) -> Option<String> {
    let start = block.find(field)? + field.len();
    let rest = &block[start..];
    let end = FIELD_MARKERS
        .iter()
        .filter_map(|m| rest.find(m))
        .min()
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "Sure! Here are the strategies.

MEMORY 1:
TITLE: Work backwards from the total
DESCRIPTION: Start from the final quantity and undo each step.
CONTENT: When a problem gives an end state, reverse each operation in order.

MEMORY 2:
TITLE: Track units
DESCRIPTION: Keep units attached to every number.
CONTENT: Write the unit next to each intermediate value
so that mismatches are obvious.

MEMORY 3:
TITLE: Incomplete
DESCRIPTION: This one has no content.
";

    #[test]
    fn test_parse_memory_items() {
        let items = parse_memory_items(RESPONSE, "gsm8k_5", true, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Work backwards from the total");
        assert_eq!(
            items[0].description,
            "Start from the final quantity and undo each step."
        );
        assert!(items[1].content.contains("mismatches are obvious."));
        assert!(items.iter().all(|m| m.source_problem_id == "gsm8k_5" && m.success));
        assert!(items.iter().all(|m| m.embedding.is_none()));
    }

    #[test]
    fn test_parse_caps_items() {
        let items = parse_memory_items(RESPONSE, "p", false, 1);
        assert_eq!(items.len(), 1);
        assert!(!items[0].success);
    }

    #[test]
    fn test_parse_ignores_preamble_and_garbage() {
        assert!(parse_memory_items("TITLE: stray\nDESCRIPTION: d\nCONTENT: c", "p", true, 3).is_empty());
        assert!(parse_memory_items("", "p", true, 3).is_empty());
    }

    #[test]
    fn test_empty_field_drops_block() {
        let resp = "MEMORY 1:\nTITLE:   \nDESCRIPTION: d\nCONTENT: c\n";
        assert!(parse_memory_items(resp, "p", true, 3).is_empty());
    }

    #[test]
    fn test_fields_in_any_order() {
        let resp = "MEMORY 1:\nCONTENT: do the thing\nTITLE: Thing\nDESCRIPTION: short\n";
        let items = parse_memory_items(resp, "p", true, 3);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "do the thing");
        assert_eq!(items[0].title, "Thing");
    }

    #[test]
    fn test_prompts_carry_inputs() {
        let s = success_prompt("What is 2+2?", "2+2=4");
        assert!(s.contains("PROBLEM: What is 2+2?"));
        assert!(s.contains("YOUR SOLUTION: 2+2=4"));
        let f = failure_prompt("What is 2+2?", "5", "4");
        assert!(f.contains("YOUR ATTEMPT: 5"));
        assert!(f.contains("EXPECTED: 4"));
        assert!(f.contains("MEMORY 1:"));
    }
}
