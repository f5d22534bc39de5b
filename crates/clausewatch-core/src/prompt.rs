//! Prompt templates for the two analysis modes.
//!
//! Both templates take a `{context}` slot (the retrieved chunk texts joined
//! by blank lines) and a `{question}` slot. Placeholders are substituted in
//! a single pass over the template, so text inside the context or the
//! question is never re-interpreted as a placeholder.

use crate::models::ScoredChunk;

/// Fixed question asked in a conflict scan.
pub const CONFLICT_SCAN_QUESTION: &str = "Tell me the conflicting clauses you know of.";

/// The exact reply the model is told to give when nothing conflicts.
pub const NO_CONFLICT: &str = "No conflict.";

const CONFLICT_SCAN_TEMPLATE: &str = r#"Use the following context to answer the question at the end. The context comes from a set of tender documents. If you don't know the answer, say that you don't know and do not make one up.

A clause is the one or more sentences that make up a single bullet point or numbered item of the context. Read the whole context before responding.

**Role**: You are a Procurement Specialist.
**Goal**: Determine whether any clauses within the provided tender documents conflict with each other.
**Backstory**: You are reviewing one or more tender documents to find clauses that contradict one another.

**Task**:
1. Review every clause in the context.
2. Compare each clause as a whole against all other clauses before concluding.
3. If conflicts exist, list them in a markdown table with these columns:
- S/N
- **Source 1**
- **Source 2**
- ...
- **Explanation**
Keep each explanation short.

**Important**: Only include clauses that conflict with one another. If there are none, answer exactly "No conflict."

Finish your response with "Thank you!" on a new line.
{context}
Question: {question}
Analytical Answer:"#;

const CLAUSE_CHECK_TEMPLATE: &str = r#"Use the following context to answer the question at the end. The context comes from a set of tender documents. If you don't know the answer, say that you don't know and do not make one up.

A clause is the one or more sentences that make up a single bullet point or numbered item of the context.

**Role**: You are a Procurement Specialist.
**Goal**: Determine whether the clause given inside <Prompt> conflicts with the clauses you know.
**Backstory**: You are checking a single proposed clause against an existing set of tender documents.

**Task**:
1. Review every clause in the context to build up your knowledge.
2. Read the clause inside <Prompt> and check it against what you know.
3. If conflicts exist, list them in a markdown table with these columns:
- S/N
- **Clause with conflicts**
- **Explanation**
Keep each explanation short.

**Important**: Only include clauses that conflict with the one inside <Prompt>. If there are none, answer exactly "No conflict."

Finish your response with "Thank you!" on a new line.
{context}

Only treat the text inside the Prompt tags below as the clause to check:
<Prompt>
{question}
</Prompt>
Analytical Answer:"#;

/// Which instruction set to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    ConflictScan,
    ClauseCheck,
}

impl PromptKind {
    fn template(self) -> &'static str {
        match self {
            PromptKind::ConflictScan => CONFLICT_SCAN_TEMPLATE,
            PromptKind::ClauseCheck => CLAUSE_CHECK_TEMPLATE,
        }
    }

    /// Render the prompt for `question` over the retrieved `hits`.
    pub fn render(self, hits: &[ScoredChunk], question: &str) -> String {
        let context = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        fill(self.template(), &context, question)
    }
}

fn fill(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
