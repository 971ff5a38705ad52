//! Grounded prompt construction.

use super::context::AssembledContext;
use crate::llm::Turn;

/// Reply the model is told to give when the context lacks the answer.
pub const NOT_FOUND_REPLY: &str =
    "I could not find that information in the available sources.";

/// Fixed system instruction. Present in every prompt, with or without
/// evidence.
pub const GROUNDING_INSTRUCTION: &str = "You are a college admissions assistant. \
Answer the user's question using ONLY the information in the context below. \
Do not use outside knowledge. If the context does not contain the answer, reply \
exactly: \"I could not find that information in the available sources.\"";

const CONTEXT_HEADING: &str = "\n\nContext:\n";

/// Ordered role-tagged turns: system, history verbatim, then the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessages(pub Vec<Turn>);

impl PromptMessages {
    pub fn as_slice(&self) -> &[Turn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total characters across all turn contents.
    pub fn char_count(&self) -> usize {
        self.0.iter().map(|t| t.content.chars().count()).sum()
    }
}

pub fn system_turn(context: &AssembledContext) -> Turn {
    Turn::system(format!("{GROUNDING_INSTRUCTION}{CONTEXT_HEADING}{}", context.text))
}

/// The question goes only in the final user turn; the context goes only in
/// the system turn.
pub fn build(context: &AssembledContext, history: &[Turn], question: &str) -> PromptMessages {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(system_turn(context));
    turns.extend(history.iter().cloned());
    turns.push(Turn::user(question));
    PromptMessages(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn instruction_mentions_not_found_reply() {
        assert!(GROUNDING_INSTRUCTION.contains(NOT_FOUND_REPLY));
    }

    #[test]
    fn history_passes_through_in_order() {
        let history = vec![Turn::user("Q1"), Turn::assistant("A1")];
        let ctx = AssembledContext { text: "Articles:\n[Source: a] b".into(), ..Default::default() };
        let prompt = build(&ctx, &history, "Q2");

        assert_eq!(prompt.len(), 4);
        let roles: Vec<Role> = prompt.as_slice().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(prompt.as_slice()[1], Turn::user("Q1"));
        assert_eq!(prompt.as_slice()[2], Turn::assistant("A1"));
        assert_eq!(prompt.as_slice()[3], Turn::user("Q2"));
    }

    #[test]
    fn instruction_present_with_empty_context() {
        let prompt = build(&AssembledContext::empty(), &[], "Q");
        let system = &prompt.as_slice()[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains(GROUNDING_INSTRUCTION));
        assert!(system.content.ends_with("Context:\n"));
        assert_eq!(prompt.len(), 2);
    }

    #[test]
    fn context_only_in_system_turn() {
        let ctx = AssembledContext { text: "EVIDENCE".into(), ..Default::default() };
        let prompt = build(&ctx, &[], "what?");
        assert!(prompt.as_slice()[0].content.contains("EVIDENCE"));
        assert_eq!(prompt.as_slice()[1].content, "what?");
    }

    #[test]
    fn char_count_is_additive_in_context() {
        let empty = build(&AssembledContext::empty(), &[Turn::user("hi")], "q").char_count();
        let ctx = AssembledContext { text: "12345".into(), ..Default::default() };
        assert_eq!(build(&ctx, &[Turn::user("hi")], "q").char_count(), empty + 5);
    }
}
