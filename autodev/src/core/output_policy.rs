//! Success policy for coding-assistant output.
//!
//! Rule precedence, highest first:
//! 1. critical error patterns (both modes) fail
//! 2. mode-specific heuristics (strict failure patterns, success words, file activity)
//! 3. output length fallback
//!
//! Lines that look like documentation or quoted examples are dropped before
//! the error patterns run, so an assistant explaining an error message does
//! not fail its own task.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How aggressively output text is treated as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    #[default]
    Lenient,
}

impl std::str::FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ValidationMode::Strict),
            "lenient" => Ok(ValidationMode::Lenient),
            other => Err(format!("unknown validation mode '{other}'")),
        }
    }
}

/// Result of judging one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    pub reason: String,
}

impl Verdict {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }
}

/// Output length above which an otherwise silent run counts as done.
pub const SUBSTANTIAL_OUTPUT_CHARS: usize = 100;
const DOC_CONTEXT_LINES: usize = 2;

static DOC_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"example:|sample:|for (example|instance):|such as:|output:|expected:|demonstrat|illustrat|like:|e\.g\.",
    )
    .unwrap()
});

static QUOTED_EXAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["'][\w\s:,]*(error:|failed to)[\w\s:,]*["']"#).unwrap()
});

static CRITICAL_RE: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        "no such file or directory",
        "file not found",
        "permission denied",
        "command not found",
        "module not found",
        r"import error.*no module",
        r"syntax error.*line \d+",
    ]
    .into_iter()
    .map(|pattern| (pattern, Regex::new(pattern).unwrap()))
    .collect()
});

static STRICT_FAILURE_RE: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        r"^error:",
        r"^failed to",
        r"^cannot ",
        r"^unable to",
        r"^traceback",
        r"\[error\]",
        r"\[failed\]",
    ]
    .into_iter()
    .map(|pattern| (pattern, Regex::new(&format!("(?m){pattern}")).unwrap()))
    .collect()
});

static STRICT_SUCCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(completed|successfully|implemented|all tests pass)\b").unwrap()
});

static LENIENT_SUCCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(completed|implemented|created|written|successfully|all tests pass|ready for use)\b",
    )
    .unwrap()
});

static FILE_ACTIVITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"created files?|written (to )?[\w/\\.]+|modified files?").unwrap()
});

const EXIT_ONE_OVERRIDES: &[&str] = &["completed successfully", "all tests pass", "ready for use"];

/// Judge assistant output under the given mode.
pub fn judge_output(output: &str, mode: ValidationMode) -> Verdict {
    let lower = output.to_lowercase();
    let filtered = strip_documentation(&lower);

    for (pattern, re) in CRITICAL_RE.iter() {
        if re.is_match(&filtered) {
            return Verdict::fail(format!("critical error detected: '{pattern}'"));
        }
    }

    let substantial = output.chars().count() > SUBSTANTIAL_OUTPUT_CHARS;
    let file_activity = FILE_ACTIVITY_RE.is_match(&lower);

    match mode {
        ValidationMode::Strict => {
            for (pattern, re) in STRICT_FAILURE_RE.iter() {
                if re.is_match(&filtered) {
                    return Verdict::fail(format!("failure pattern detected: '{pattern}'"));
                }
            }
            if lower.contains("exit code 1")
                && !EXIT_ONE_OVERRIDES.iter().any(|phrase| lower.contains(phrase))
            {
                return Verdict::fail("process reported exit code 1 (strict mode)");
            }
            let success = STRICT_SUCCESS_RE.is_match(&lower);
            if success && file_activity {
                Verdict::pass("task completed successfully (strict mode)")
            } else if file_activity {
                Verdict::pass("file activity detected")
            } else if success {
                Verdict::pass("success indicator detected")
            } else if substantial {
                Verdict::pass("substantial output")
            } else {
                Verdict::fail("insufficient output for strict validation")
            }
        }
        ValidationMode::Lenient => {
            if LENIENT_SUCCESS_RE.is_match(&lower) {
                Verdict::pass("task completed successfully (lenient mode)")
            } else if file_activity {
                Verdict::pass("file activity detected")
            } else if substantial {
                Verdict::pass("output present with no critical errors")
            } else {
                Verdict::fail("insufficient output to determine success")
            }
        }
    }
}

/// Drop lines near documentation markers and lines quoting error examples.
fn strip_documentation(lower: &str) -> String {
    let lines: Vec<&str> = lower.split('\n').collect();
    let doc_lines: Vec<bool> = lines
        .iter()
        .map(|line| DOC_LINE_RE.is_match(line.trim()))
        .collect();

    lines
        .iter()
        .enumerate()
        .filter(|(i, line)| {
            let start = i.saturating_sub(DOC_CONTEXT_LINES);
            let end = (i + DOC_CONTEXT_LINES + 1).min(lines.len());
            !doc_lines[start..end].iter().any(|is_doc| *is_doc)
                && !QUOTED_EXAMPLE_RE.is_match(line)
        })
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n")
}
