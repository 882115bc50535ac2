//! Prompt templates per handler

use super::{HandlerKind, ModeProfile};
use serde_json::Value;

const CITATION_RULE: &str = "Cite excerpts inline by their bracketed label, e.g. [1] or [2][4]. \
Never invent labels that are not in the excerpts.";

/// Previous record and reviewer feedback for a revision
#[derive(Debug, Clone, Copy)]
pub struct RevisionInput<'a> {
    pub previous: &'a Value,
    pub feedback: &'a str,
}

/// System prompt for a mode
pub fn system_prompt(profile: &ModeProfile) -> String {
    let role = match profile.handler {
        HandlerKind::QuestionAnswering => "You are a materials chemistry research assistant.",
        HandlerKind::Proposal => "You are a materials chemistry researcher drafting a research proposal.",
        HandlerKind::ExperimentalDetail => {
            "You are a materials chemistry researcher planning laboratory experiments."
        }
        HandlerKind::Revision(_) => {
            "You are a materials chemistry researcher revising your own work after review."
        }
    };

    let grounding = if profile.allows_inference {
        "Ground every factual claim in the excerpts. You may reason beyond them, \
         but state explicitly when a statement is your own inference."
    } else {
        "Use ONLY the information in the excerpts. If they do not answer the question, \
         say that the sources are insufficient. Do not add outside knowledge."
    };

    let output = if profile.structured_output {
        "Respond with a single JSON object that matches the provided schema."
    } else {
        "Respond in concise prose."
    };

    format!("{}\n{}\n{}\n{}", role, grounding, CITATION_RULE, output)
}

/// User prompt embedding the question, labelled excerpts and, for revisions,
/// the previous record and feedback.
pub fn user_prompt(
    profile: &ModeProfile,
    question: &str,
    context_text: &str,
    revision: Option<RevisionInput<'_>>,
) -> String {
    let task = match profile.handler {
        HandlerKind::QuestionAnswering if profile.requires_secondary_index => {
            "Summarize what the excerpts report on the following topic, noting agreements and disagreements between sources."
        }
        HandlerKind::QuestionAnswering => "Answer the following question.",
        HandlerKind::Proposal => "Write a research proposal addressing the following topic.",
        HandlerKind::ExperimentalDetail => "Write a detailed experimental plan for the following objective.",
        HandlerKind::Revision(_) => {
            "Revise the previous version to address the reviewer feedback. \
             Explain what changed in revision_explanation."
        }
    };

    let mut prompt = format!("{}\n\nTopic: {}\n", task, question);

    if let Some(revision) = revision {
        let previous = serde_json::to_string_pretty(revision.previous)
            .unwrap_or_else(|_| revision.previous.to_string());
        prompt.push_str(&format!(
            "\nPrevious version:\n{}\n\nReviewer feedback:\n{}\n",
            previous, revision.feedback
        ));
    }

    prompt.push_str("\nExcerpts:\n\n");
    prompt.push_str(context_text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::super::ModeRegistry;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_mode_forbids_outside_knowledge() {
        let registry = ModeRegistry::new();
        let strict = system_prompt(registry.profile("strict_sourcing").unwrap());
        let reasoning = system_prompt(registry.profile("sourced_reasoning").unwrap());

        assert!(strict.contains("ONLY"));
        assert!(reasoning.contains("your own inference"));
    }

    #[test]
    fn test_revision_prompt_carries_previous_and_feedback() {
        let registry = ModeRegistry::new();
        let previous = json!({"title": "Old title"});
        let prompt = user_prompt(
            registry.profile("revise_proposal").unwrap(),
            "CO2 capture sorbents",
            "[1] Paper | 2\ntext\n\n",
            Some(RevisionInput {
                previous: &previous,
                feedback: "Narrow the scope",
            }),
        );

        assert!(prompt.contains("Old title"));
        assert!(prompt.contains("Reviewer feedback:\nNarrow the scope"));
        assert!(prompt.ends_with("[1] Paper | 2\ntext\n\n"));
    }
}
