//! Prompt builders for each pipeline call.
//!
//! Every builder returns the full message list for one chat completion.
//! Retrieved knowledge, when there is any, goes into its own system
//! message so the model can tell reference material from the input.

use casegen_core::points::TestPoint;

use crate::llm::ChatMessage;

const ANALYST: &str = "You are a senior software test analyst. You read requirement documents \
and produce structured analyses that testers can design tests from. Answer in the language \
of the document.";

const ANALYSIS_FORMAT: &str = "Organise the analysis under these Markdown headings:
# Document overview
Document type, structure and scope.
## Functional points
Every feature and sub-feature with its priority (high/medium/low), the user roles involved, \
business rules (if ... then ...), inputs, outputs and boundary conditions (minimum, maximum, \
empty values).
## Issues
Ambiguities, missing information and contradictions in the requirements.
## Test focus
Test types and strategy per functional point, including non-functional requirements \
(performance, security, compatibility).
## Self check
Anything the sections above missed, added as a supplement.
## Summary
The key issues and conclusions in a few bullet points.";

const DESIGNER: &str = "You are a test architect. You turn a requirements analysis into test \
points using equivalence class partitioning, boundary value analysis, decision tables and \
error guessing.";

const POINTS_FORMAT: &str = "List the test points as a Markdown table with the columns
| ID | Test point | Functional point | Technique | Priority |
IDs are TP-001, TP-002, ... in order. Each test point names one condition to verify, the \
technique used (equivalence class, boundary value, decision table, error guessing, scenario) \
and a priority P0/P1/P2. Cover valid and invalid partitions and every boundary named in the \
analysis.";

const ENGINEER: &str = "You are a senior test engineer. You write executable, verifiable test \
cases.";

const CASES_FORMAT: &str = "Write the test cases as one Markdown table with exactly these columns:
| Case ID | Title | Preconditions | Steps | Test Data | Expected Result | Priority |
Rules: one row per test case; numbered steps separated by <br>; concrete test data including \
boundary values; an expected result that can be checked; priority P0/P1/P2. Include positive \
and negative cases. Output only the table.";

const REVIEWER: &str = "You are a test quality reviewer. You compare a generated artifact with \
its input and report gaps. You never rewrite the artifact.";

fn with_knowledge(mut messages: Vec<ChatMessage>, knowledge: Option<&str>) -> Vec<ChatMessage> {
    if let Some(context) = knowledge.filter(|c| !c.trim().is_empty()) {
        messages.push(ChatMessage::system(format!(
            "Reference material from the knowledge base. Use it where it applies and cite the \
             reference number:\n\n{}",
            context
        )));
    }
    messages
}

fn extra_requirements(extra: Option<&str>) -> String {
    match extra.map(str::trim).filter(|e| !e.is_empty()) {
        Some(e) => format!("\n\nAdditional requirements from the user:\n{}", e),
        None => String::new(),
    }
}

/// Knowledge-base queries used to ground a stage.
pub fn grounding_queries(stage_input: &str, topic: &str) -> Vec<String> {
    let head: String = stage_input.chars().take(300).collect();
    vec![topic.to_string(), head]
}

pub fn analysis(document: &str, knowledge: Option<&str>, extra: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(ANALYST),
        ChatMessage::system(ANALYSIS_FORMAT),
    ];
    messages = with_knowledge(messages, knowledge);
    messages.push(ChatMessage::user(format!(
        "Requirements document:\n\n{}{}",
        document,
        extra_requirements(extra)
    )));
    messages
}

pub fn analysis_review(document: &str, analysis: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEWER),
        ChatMessage::user(format!(
            "Requirements document:\n\n{}\n\nAnalysis:\n\n{}\n\nList every requirement, rule or \
             boundary in the document that the analysis misses or misstates, then give a \
             one-line verdict.",
            document, analysis
        )),
    ]
}

pub fn test_points(analysis: &str, knowledge: Option<&str>, extra: Option<&str>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(DESIGNER), ChatMessage::system(POINTS_FORMAT)];
    messages = with_knowledge(messages, knowledge);
    messages.push(ChatMessage::user(format!(
        "Requirements analysis:\n\n{}{}",
        analysis,
        extra_requirements(extra)
    )));
    messages
}

pub fn test_points_review(analysis: &str, points: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEWER),
        ChatMessage::user(format!(
            "Requirements analysis:\n\n{}\n\nTest points:\n\n{}\n\nList functional points, \
             boundaries and error conditions from the analysis that no test point covers, and \
             duplicated test points.",
            analysis, points
        )),
    ]
}

pub fn test_cases_for_point(
    point: &TestPoint,
    analysis: &str,
    knowledge: Option<&str>,
    extra: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(ENGINEER), ChatMessage::system(CASES_FORMAT)];
    messages = with_knowledge(messages, knowledge);
    let background = if analysis.trim().is_empty() {
        String::new()
    } else {
        format!("Background analysis:\n\n{}\n\n", analysis)
    };
    messages.push(ChatMessage::user(format!(
        "{}Write test cases for this test point only.\n\n{}: {}\n{}{}",
        background,
        point.id,
        point.title,
        point.body,
        extra_requirements(extra)
    )));
    messages
}

pub fn test_cases_review(points: &str, cases: &str, coverage: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEWER),
        ChatMessage::user(format!(
            "Test points:\n\n{}\n\nTest cases:\n\n{}\n\n{}\n\nCheck that every test point has \
             at least one test case, that expected results are verifiable and that boundary \
             values appear in the test data. Report gaps as a list.",
            points, cases, coverage
        )),
    ]
}

pub fn knowledge_answer(question: &str, references: &[String]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(
        "You are a testing knowledge assistant. Answer from the references when they are \
         relevant and say so when they do not contain the answer.",
    )];
    if !references.is_empty() {
        let block = references
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] {}", i + 1, r))
            .collect::<Vec<_>>()
            .join("\n\n");
        messages.push(ChatMessage::system(format!("References:\n\n{}", block)));
    }
    messages.push(ChatMessage::user(question.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn test_knowledge_is_separate_system_message() {
        let with = analysis("doc", Some("[1] rule"), None);
        let without = analysis("doc", None, None);
        assert_eq!(with.len(), without.len() + 1);
        assert!(with[2].content.contains("[1] rule"));
        assert_eq!(with.last().map(|m| m.role), Some(Role::User));
    }

    #[test]
    fn test_extra_requirements_appended() {
        let messages = test_points("analysis", None, Some("focus on security"));
        let user = &messages.last().unwrap().content;
        assert!(user.contains("focus on security"));
        let blank = test_points("analysis", None, Some("  "));
        assert!(!blank.last().unwrap().content.contains("Additional requirements"));
    }

    #[test]
    fn test_point_prompt_names_the_point() {
        let point = TestPoint {
            id: "TP-003".to_string(),
            title: "Password length boundary".to_string(),
            body: "7, 8 and 9 characters".to_string(),
        };
        let messages = test_cases_for_point(&point, "", None, None);
        let user = &messages.last().unwrap().content;
        assert!(user.contains("TP-003: Password length boundary"));
        assert!(!user.contains("Background analysis"));
    }

    #[test]
    fn test_grounding_queries_truncate_input() {
        let long = "x".repeat(1000);
        let queries = grounding_queries(&long, "test design");
        assert_eq!(queries[0], "test design");
        assert_eq!(queries[1].chars().count(), 300);
    }
}
