//! Heuristic quality scoring for converted Markdown.
//!
//! The score is a sum of independent signals, each computed by its own pure
//! function in [`signals`]. Boilerplate lines never contribute to content
//! length, heading, or paragraph signals, so appending boilerplate can only
//! lower the score and appending a substantive paragraph can only raise it.

use std::fmt::Write as _;

use crate::models::QualityReport;

/// Starting point before bonuses and penalties.
const BASE_SCORE: i32 = 40;
/// Non-boilerplate characters below which a document is too short.
pub const MIN_CONTENT_CHARS: usize = 200;
/// Non-boilerplate characters above which a length bonus applies.
const LONG_CONTENT_CHARS: usize = 1000;
const MAX_LENGTH_PENALTY: i32 = 40;
const LONG_CONTENT_BONUS: i32 = 10;
const MAX_BOILERPLATE_PENALTY: f64 = 50.0;
const PARAGRAPH_BONUS_EACH: i32 = 10;
const MAX_PARAGRAPH_BONUS: i32 = 35;
const BLANK_RUN_PENALTY_EACH: i32 = 2;
const MAX_BLANK_RUNS_PENALIZED: usize = 3;

/// Scores Markdown against a configured validity floor.
#[derive(Debug, Clone, Copy)]
pub struct QualityValidator {
    min_score: u8,
}

impl QualityValidator {
    pub fn new(min_score: u8) -> Self {
        Self {
            min_score: min_score.min(100),
        }
    }

    pub fn min_score(&self) -> u8 {
        self.min_score
    }

    pub fn validate(&self, markdown: &str) -> QualityReport {
        validate(markdown, self.min_score)
    }
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(60)
    }
}

/// Score `markdown`; `is_valid` is `score >= min_score`.
///
/// Empty or whitespace-only input scores 0 and is never valid.
pub fn validate(markdown: &str, min_score: u8) -> QualityReport {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if markdown.trim().is_empty() {
        issues.push("Document is empty".to_string());
        return QualityReport {
            score: 0,
            is_valid: false,
            issues,
            warnings,
        };
    }

    let lines = signals::classify_lines(markdown);
    let content_chars = signals::content_length(&lines);
    let ratio = signals::boilerplate_ratio(&lines);
    let headings = signals::heading_count(&lines);
    let paragraphs = signals::substantive_paragraphs(&lines);
    let blank_runs = signals::excessive_blank_runs(markdown);

    let mut score = BASE_SCORE;

    let boilerplate_penalty = signals::boilerplate_penalty(ratio);
    score -= boilerplate_penalty;
    if ratio > 0.5 {
        issues.push(format!(
            "Mostly boilerplate: {:.0}% of lines look like navigation, login or cookie prompts",
            ratio * 100.0
        ));
    } else if ratio > 0.2 {
        warnings.push(format!(
            "{:.0}% of lines look like navigation, login or cookie prompts",
            ratio * 100.0
        ));
    }

    let length_penalty = signals::length_penalty(content_chars);
    score -= length_penalty;
    if content_chars < MIN_CONTENT_CHARS {
        issues.push(format!(
            "Content too short: {content_chars} characters (minimum {MIN_CONTENT_CHARS})"
        ));
    }
    score += signals::length_bonus(content_chars);

    score += signals::heading_bonus(headings);
    if headings == 0 {
        warnings.push("No headings found".to_string());
    }

    score += signals::paragraph_bonus(paragraphs);
    if paragraphs == 0 {
        warnings.push("No substantive paragraphs found".to_string());
    }

    let blank_penalty = signals::blank_run_penalty(blank_runs);
    score -= blank_penalty;
    if blank_runs > 0 {
        warnings.push(format!("{blank_runs} run(s) of excessive blank lines"));
    }

    let score = score.clamp(0, 100) as u8;

    tracing::debug!(
        score,
        content_chars,
        boilerplate_ratio = ratio,
        headings,
        paragraphs,
        blank_runs,
        "Quality scored"
    );

    QualityReport {
        score,
        is_valid: score >= min_score,
        issues,
        warnings,
    }
}

/// Render a report for humans.
pub fn format_report(report: &QualityReport) -> String {
    let mut out = String::new();
    let status = if report.is_valid { "valid" } else { "invalid" };
    let _ = writeln!(out, "Quality score: {}/100 ({status})", report.score);

    if !report.issues.is_empty() {
        let _ = writeln!(out, "\nIssues:");
        for issue in &report.issues {
            let _ = writeln!(out, "  - {issue}");
        }
    }
    if !report.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in &report.warnings {
            let _ = writeln!(out, "  - {warning}");
        }
    }
    out
}

/// Individual scoring signals.
pub mod signals {
    use std::sync::LazyLock;

    use regex::Regex;

    use super::*;

    /// A non-blank, non-structural Markdown line.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Line<'a> {
        pub text: &'a str,
        pub heading: bool,
        pub boilerplate: bool,
    }

    /// Split Markdown into meaningful lines, skipping blanks, rules and
    /// code fences.
    pub fn classify_lines(markdown: &str) -> Vec<Line<'_>> {
        static RULE_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(?:[-*_]\s*){3,}$").expect("valid regex"));

        markdown
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("```") && !RULE_RE.is_match(l))
            .map(|text| Line {
                text,
                heading: text.starts_with('#'),
                boilerplate: is_boilerplate(text),
            })
            .collect()
    }

    /// Login prompts, cookie banners, link-only nav fragments and the like.
    pub fn is_boilerplate(line: &str) -> bool {
        static PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"(?i)\b(?:log ?in|log ?out|sign ?in|sign ?up|sign ?out|register|create (?:an |your )?account|forgot (?:your )?password|cookies?|accept all|reject all|consent|subscribe|newsletter|privacy policy|terms of (?:service|use)|all rights reserved|skip to (?:main )?content|share (?:on|this)|follow us|back to top|open in app|get the app)\b",
            )
            .expect("valid regex")
        });
        static LINK_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^(?:[-*+]\s+|\d+\.\s+)?(?:!?\[[^\]]*\]\([^)]*\)\s*[|·•/]?\s*)+$")
                .expect("valid regex")
        });
        static MARKUP_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"[#*_>`\[\]]|\([^)]*\)").expect("valid regex"));

        let line = line.trim();
        if line.starts_with('©') || line.to_lowercase().starts_with("copyright") {
            return true;
        }
        if LINK_ONLY_RE.is_match(line) {
            return true;
        }

        let text = MARKUP_RE.replace_all(line, " ");
        let words = text.split_whitespace().count();
        // Long prose that merely mentions cookies or signing up is content.
        words <= 25 && PROMPT_RE.is_match(&text)
    }

    /// Characters of non-boilerplate text, whitespace excluded.
    pub fn content_length(lines: &[Line<'_>]) -> usize {
        lines
            .iter()
            .filter(|l| !l.boilerplate)
            .map(|l| l.text.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    /// Share of lines that are boilerplate, in `[0, 1]`.
    pub fn boilerplate_ratio(lines: &[Line<'_>]) -> f64 {
        if lines.is_empty() {
            return 0.0;
        }
        let boilerplate = lines.iter().filter(|l| l.boilerplate).count();
        boilerplate as f64 / lines.len() as f64
    }

    pub fn heading_count(lines: &[Line<'_>]) -> usize {
        lines.iter().filter(|l| l.heading && !l.boilerplate).count()
    }

    /// Lines that read like real prose: long, wordy and not a heading.
    pub fn substantive_paragraphs(lines: &[Line<'_>]) -> usize {
        lines
            .iter()
            .filter(|l| !l.heading && !l.boilerplate)
            .filter(|l| l.text.chars().count() >= 80 && l.text.split_whitespace().count() >= 12)
            .count()
    }

    /// Runs of two or more consecutive blank lines. A trailing run counts
    /// too, so text appended after it leaves the count unchanged.
    pub fn excessive_blank_runs(markdown: &str) -> usize {
        let mut runs = 0;
        let mut blank = 0;
        for line in markdown.trim_start().lines() {
            if line.trim().is_empty() {
                blank += 1;
                if blank == 2 {
                    runs += 1;
                }
            } else {
                blank = 0;
            }
        }
        runs
    }

    pub fn boilerplate_penalty(ratio: f64) -> i32 {
        (ratio.clamp(0.0, 1.0) * MAX_BOILERPLATE_PENALTY).round() as i32
    }

    pub fn length_penalty(content_chars: usize) -> i32 {
        if content_chars >= MIN_CONTENT_CHARS {
            return 0;
        }
        let missing = (MIN_CONTENT_CHARS - content_chars) as i32;
        missing * MAX_LENGTH_PENALTY / MIN_CONTENT_CHARS as i32
    }

    pub fn length_bonus(content_chars: usize) -> i32 {
        if content_chars >= LONG_CONTENT_CHARS {
            LONG_CONTENT_BONUS
        } else {
            0
        }
    }

    pub fn heading_bonus(headings: usize) -> i32 {
        match headings {
            0 => 0,
            1 | 2 => 10,
            _ => 15,
        }
    }

    pub fn paragraph_bonus(paragraphs: usize) -> i32 {
        (paragraphs as i32 * PARAGRAPH_BONUS_EACH).min(MAX_PARAGRAPH_BONUS)
    }

    pub fn blank_run_penalty(runs: usize) -> i32 {
        runs.min(MAX_BLANK_RUNS_PENALIZED) as i32 * BLANK_RUN_PENALTY_EACH
    }
}
