//! Post-conversion Markdown cleanup.
//!
//! Each pass is a `&str -> String` function applied in sequence. The whole
//! pipeline is idempotent: `cleanup(&cleanup(m)) == cleanup(m)`.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub fn cleanup(md: &str) -> String {
    let mut result = strip_residue(md);
    result = trim_trailing_whitespace(&result);
    result = normalize_rules(&result);
    result = collapse_blank_lines(&result);
    result.trim_matches('\n').to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: HTML comment and script/style residue
// ---------------------------------------------------------------------------

/// Remove comments, `<script>`/`<style>` blocks and stray markers.
///
/// Repeated until nothing changes, since removing one fragment can join
/// two halves of another.
fn strip_residue(md: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
            .expect("valid regex")
    });
    static STRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<!--|-->|</?script\b[^>]*>|</?style\b[^>]*>").expect("valid regex")
    });

    let mut current = md.to_string();
    loop {
        let next = COMMENT_RE.replace_all(&current, "");
        let next = BLOCK_RE.replace_all(&next, "");
        let next = STRAY_RE.replace_all(&next, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

// ---------------------------------------------------------------------------
// Pass 2: trailing whitespace
// ---------------------------------------------------------------------------

fn trim_trailing_whitespace(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: horizontal rules
// ---------------------------------------------------------------------------

/// Rewrite `* * *`, `- - -`, `___` and friends to `---`, outside code fences.
fn normalize_rules(md: &str) -> String {
    static RULE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^ {0,3}(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$").expect("valid regex"));

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line;
            }
            if !in_code_block && RULE_RE.is_match(line) {
                "---"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: blank-line runs
// ---------------------------------------------------------------------------

/// Collapse runs of more than two blank lines to exactly one blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_long_blank_runs() {
        let md = "# Title\n\n\n\n\nBody";
        assert_eq!(cleanup(md), "# Title\n\nBody");
    }

    #[test]
    fn keeps_double_blank_lines() {
        let md = "a\n\n\nb";
        assert_eq!(cleanup(md), "a\n\n\nb");
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        let md = "a\n  \n\t\n   \nb";
        assert_eq!(cleanup(md), "a\n\nb");
    }

    #[test]
    fn strips_comments_and_scripts() {
        let md = "Intro <!-- tracking -->text\n<script type=\"x\">var a = 1;</script>\n<style>p{}</style>after";
        let cleaned = cleanup(md);
        assert_eq!(cleaned, "Intro text\n\nafter");
        assert!(!cleaned.contains("<!--"));
        assert!(!cleaned.contains("<script"));
    }

    #[test]
    fn strips_dangling_markers() {
        assert_eq!(cleanup("left --> right <!-- open"), "left  right  open");
        assert_eq!(cleanup("</script>done"), "done");
    }

    #[test]
    fn strips_nested_residue() {
        let md = "x<scr<!-- -->ipt>alert(1)</script>y";
        let cleaned = cleanup(md);
        assert!(!cleaned.to_lowercase().contains("<script"));
        assert_eq!(cleanup(&cleaned), cleaned);
    }

    #[test]
    fn trims_trailing_whitespace() {
        assert_eq!(cleanup("one   \ntwo\t\n"), "one\ntwo");
    }

    #[test]
    fn normalizes_rules_outside_code() {
        let md = "above\n\n* * *\n\nbelow\n\n```\n- - -\n```";
        assert_eq!(cleanup(md), "above\n\n---\n\nbelow\n\n```\n- - -\n```");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(cleanup(""), "");
        assert_eq!(cleanup("\n\n  \n"), "");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let samples = [
            "",
            "plain",
            "# H\n\n\n\n\npara   \n\n<!-- c -->\n\n\n\nend\n\n\n",
            "a\n\n\nb\n\n\n\n\nc",
            "<style>x</style><script>y</script>\n\n___\n\n- item\n- item",
            "```\ncode   \n\n\n\n\nmore\n```",
            "x<scr<!-- -->ipt>z</script>",
            "  \n\t\nleading blanks",
        ];
        for md in samples {
            let once = cleanup(md);
            assert_eq!(cleanup(&once), once, "not idempotent for {md:?}");
        }
    }
}
