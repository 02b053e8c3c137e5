//! Coding-task probe.
//!
//! Poses a language-tagged coding problem with declared constraints and
//! grades the answer with a deterministic rubric: required syntactic
//! elements, forbidden patterns, and a surface parse check. The rubric
//! weights are exposed as constants and versioned with the suite version
//! embedded in every run.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::adapter::{ChatOptions, ChatTurn, DeclaredCaps};
use crate::error::AdapterResult;

use super::core::{report_for_error, retryable};
use super::types::ProbeReport;
use super::{Probe, ProbeTarget};

// Rubric weights, summing to 100.
pub const RUBRIC_FENCE_WEIGHT: f64 = 10.0;
pub const RUBRIC_NAME_WEIGHT: f64 = 20.0;
pub const RUBRIC_TYPE_HINTS_WEIGHT: f64 = 15.0;
pub const RUBRIC_DOCSTRING_WEIGHT: f64 = 15.0;
pub const RUBRIC_ERROR_HANDLING_WEIGHT: f64 = 15.0;
pub const RUBRIC_FORBIDDEN_WEIGHT: f64 = 10.0;
pub const RUBRIC_PARSE_WEIGHT: f64 = 15.0;

const FUNCTION_NAME: &str = "parse_duration";

const TASK_PROMPT: &str = "Write a Python function `parse_duration(text: str) -> int` that \
parses durations like \"2h\", \"30m\" or \"45s\" into a number of seconds.\n\
Constraints:\n\
- full type hints on the signature\n\
- a docstring describing behaviour\n\
- raise ValueError for malformed input\n\
- do not use eval or exec\n\
Return only a single fenced python code block.";

/// Deterministic grade of a coding answer against the rubric.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RubricGrade {
    pub fenced: bool,
    pub named_function: bool,
    pub type_hints: bool,
    pub docstring: bool,
    pub error_handling: bool,
    pub no_forbidden: bool,
    pub parses: bool,
}

impl RubricGrade {
    pub fn score(&self) -> f64 {
        let mut score = 0.0;
        if self.fenced {
            score += RUBRIC_FENCE_WEIGHT;
        }
        if self.named_function {
            score += RUBRIC_NAME_WEIGHT;
        }
        if self.type_hints {
            score += RUBRIC_TYPE_HINTS_WEIGHT;
        }
        if self.docstring {
            score += RUBRIC_DOCSTRING_WEIGHT;
        }
        if self.error_handling {
            score += RUBRIC_ERROR_HANDLING_WEIGHT;
        }
        if self.no_forbidden {
            score += RUBRIC_FORBIDDEN_WEIGHT;
        }
        if self.parses {
            score += RUBRIC_PARSE_WEIGHT;
        }
        score
    }

    pub fn summary(&self) -> String {
        let mark = |b: bool| if b { "+" } else { "-" };
        format!(
            "fence{} name{} hints{} doc{} errors{} clean{} parse{}",
            mark(self.fenced),
            mark(self.named_function),
            mark(self.type_hints),
            mark(self.docstring),
            mark(self.error_handling),
            mark(self.no_forbidden),
            mark(self.parses),
        )
    }
}

/// Pull the first fenced code block out of a markdown answer. Falls back
/// to the whole answer when there is no fence.
pub(crate) fn extract_code(answer: &str) -> (bool, String) {
    let Some(open) = answer.find("```") else {
        return (false, answer.to_string());
    };
    let after_open = &answer[open + 3..];
    // Skip the info string ("python") up to the end of line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => (true, body[..close].to_string()),
        None => (false, body.to_string()),
    }
}

/// Surface parse check for Python: balanced delimiters outside strings,
/// a colon-terminated `def` header, and an indented body after it.
pub(crate) fn python_parses(source: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    for c in source.chars() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    if depth != 0 || in_string.is_some() {
        return false;
    }

    let lines: Vec<&str> = source.lines().collect();
    let mut saw_def = false;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("def ") {
            if !line.trim_end().ends_with(':') {
                return false;
            }
            saw_def = true;
            // The next non-blank line must be indented deeper.
            let header_indent = line.len() - trimmed.len();
            let body = lines[i + 1..]
                .iter()
                .find(|l| !l.trim().is_empty());
            match body {
                Some(body_line) => {
                    let body_indent = body_line.len() - body_line.trim_start().len();
                    if body_indent <= header_indent {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }
    saw_def
}

/// Compiled rubric patterns.
struct RubricPatterns {
    signature: Regex,
    arg_hint: Regex,
    return_hint: Regex,
    error_handling: Regex,
    forbidden: Regex,
}

impl RubricPatterns {
    fn get() -> &'static Self {
        static PATTERNS: OnceLock<RubricPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| RubricPatterns {
            signature: Regex::new(&format!(r"def\s+{}\s*\(", FUNCTION_NAME)).unwrap(),
            arg_hint: Regex::new(r"text\s*:\s*str").unwrap(),
            return_hint: Regex::new(r"\)\s*->\s*int\s*:").unwrap(),
            error_handling: Regex::new(r"raise\s+ValueError").unwrap(),
            forbidden: Regex::new(r"\b(eval|exec)\s*\(").unwrap(),
        })
    }
}

/// Grade an answer. Pure and deterministic over the canonicalised text.
pub(crate) fn grade_answer(answer: &str) -> RubricGrade {
    let (fenced, code) = extract_code(answer);
    let patterns = RubricPatterns::get();
    RubricGrade {
        fenced,
        named_function: patterns.signature.is_match(&code),
        type_hints: patterns.arg_hint.is_match(&code) && patterns.return_hint.is_match(&code),
        docstring: code.contains("\"\"\"") || code.contains("'''"),
        error_handling: patterns.error_handling.is_match(&code),
        no_forbidden: !patterns.forbidden.is_match(&code),
        parses: python_parses(&code),
    }
}

pub(crate) fn evaluate_coding(name: &'static str, answer: &str) -> ProbeReport {
    let grade = grade_answer(answer);
    let score = grade.score();
    let report = if score >= 50.0 {
        ProbeReport::pass(name, score)
    } else {
        ProbeReport::fail(name, score)
    };
    report.with_detail(grade.summary()).with_evidence(answer)
}

/// The coding-task probe. Applies to every model.
pub struct CodingProbe;

#[async_trait]
impl Probe for CodingProbe {
    fn name(&self) -> &'static str {
        "coding-task"
    }

    fn applicability(&self, _caps: &DeclaredCaps) -> bool {
        true
    }

    async fn run(&self, target: &ProbeTarget) -> AdapterResult<ProbeReport> {
        let options = ChatOptions {
            max_tokens: Some(768),
            ..Default::default()
        };
        match target.chat(&[ChatTurn::user(TASK_PROMPT)], &options).await {
            Ok(outcome) => Ok(evaluate_coding(self.name(), &outcome.content)),
            Err(e) if retryable(&e) => Err(e),
            Err(e) => Ok(report_for_error(self.name(), &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::types::ProbeOutcome;

    const GOOD_ANSWER: &str = r#"Here is the function:

```python
def parse_duration(text: str) -> int:
    """Parse a duration like '2h', '30m' or '45s' into seconds."""
    units = {"h": 3600, "m": 60, "s": 1}
    if not text or text[-1] not in units:
        raise ValueError(f"malformed duration: {text!r}")
    try:
        value = int(text[:-1])
    except ValueError:
        raise ValueError(f"malformed duration: {text!r}")
    return value * units[text[-1]]
```
"#;

    #[test]
    fn test_weights_sum_to_hundred() {
        let total = RUBRIC_FENCE_WEIGHT
            + RUBRIC_NAME_WEIGHT
            + RUBRIC_TYPE_HINTS_WEIGHT
            + RUBRIC_DOCSTRING_WEIGHT
            + RUBRIC_ERROR_HANDLING_WEIGHT
            + RUBRIC_FORBIDDEN_WEIGHT
            + RUBRIC_PARSE_WEIGHT;
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_good_answer_scores_full() {
        let grade = grade_answer(GOOD_ANSWER);
        assert!(grade.fenced);
        assert!(grade.named_function);
        assert!(grade.type_hints);
        assert!(grade.docstring);
        assert!(grade.error_handling);
        assert!(grade.no_forbidden);
        assert!(grade.parses, "surface parse should accept: {}", grade.summary());
        assert_eq!(grade.score(), 100.0);
    }

    #[test]
    fn test_forbidden_pattern_costs_points() {
        let answer = GOOD_ANSWER.replace("int(text[:-1])", "eval(text[:-1])");
        let grade = grade_answer(&answer);
        assert!(!grade.no_forbidden);
        assert_eq!(grade.score(), 100.0 - RUBRIC_FORBIDDEN_WEIGHT);
    }

    #[test]
    fn test_prose_answer_fails() {
        let report = evaluate_coding(
            "coding-task",
            "You could loop over the characters and multiply by the unit.",
        );
        assert_eq!(report.outcome, ProbeOutcome::Fail);
        assert!(report.score.unwrap() < 50.0);
    }

    #[test]
    fn test_evaluator_is_deterministic() {
        let a = evaluate_coding("coding-task", GOOD_ANSWER);
        let b = evaluate_coding("coding-task", GOOD_ANSWER);
        assert_eq!(a.score, b.score);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.evidence, b.evidence);
    }

    #[test]
    fn test_extract_code() {
        let (fenced, code) = extract_code("```python\nx = 1\n```");
        assert!(fenced);
        assert_eq!(code.trim(), "x = 1");

        let (fenced, code) = extract_code("no fence here");
        assert!(!fenced);
        assert_eq!(code, "no fence here");
    }

    #[test]
    fn test_python_parse_check() {
        assert!(python_parses("def f(x):\n    return x\n"));
        // Missing colon.
        assert!(!python_parses("def f(x)\n    return x\n"));
        // Unbalanced parens.
        assert!(!python_parses("def f(x):\n    return (x\n"));
        // No indented body.
        assert!(!python_parses("def f(x):\nreturn x\n"));
        // No function at all.
        assert!(!python_parses("x = 1\n"));
    }
}
