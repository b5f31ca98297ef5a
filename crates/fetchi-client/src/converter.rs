use std::sync::{Arc, LazyLock};

use fetchi_core::markdown::cleanup;
use fetchi_core::models::{ExtractedDocument, RawPage};
use fetchi_core::traits::Converter;
use htmd::HtmlToMarkdown;
use htmd::options::{BulletListMarker, CodeBlockStyle, HeadingStyle, LinkStyle, Options};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Minimum visible text, in characters, for a region to count as the article.
const CHAR_THRESHOLD: usize = 500;

/// Known content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article .markdown",
    ".vp-doc",
    ".markdown-section",
    "[role=\"main\"]",
    "article",
    "main",
    "#content",
    ".post-content",
    ".entry-content",
    ".content",
];

/// HTML-to-Markdown converter using scraper for extraction and htmd for
/// transcoding.
///
/// Picks the readable region of the page, converts it to ATX/fenced
/// Markdown and runs [`cleanup`] over the result. Never fails: when no
/// article region is found the whole body is used and the document is
/// flagged as degraded.
pub struct HtmdConverter {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdConverter {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdConverter {
    pub fn new() -> Self {
        let options = Options {
            heading_style: HeadingStyle::Atx,
            code_block_style: CodeBlockStyle::Fenced,
            bullet_list_marker: BulletListMarker::Dash,
            link_style: LinkStyle::Inlined,
            ..Default::default()
        };
        let converter = HtmlToMarkdown::builder()
            .options(options)
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form", "button",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    fn to_markdown(&self, html: &str) -> String {
        let html = preprocess(html);
        match self.converter.convert(&html) {
            Ok(md) => md,
            Err(e) => {
                tracing::warn!(error = %e, "htmd conversion failed, using plain text");
                let doc = Html::parse_fragment(&html);
                normalize_text(doc.root_element().text())
            }
        }
    }
}

impl Default for HtmdConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for HtmdConverter {
    fn convert(&self, page: &RawPage, request_url: &str) -> ExtractedDocument {
        let doc = Html::parse_document(&page.html);
        let title = resolve_title(&doc, request_url);
        let (content_html, degraded) = extract_content_html(&doc, &page.html);

        if degraded {
            tracing::warn!(
                url = %page.final_url,
                mode = %page.source_mode,
                "Readable-content extraction fell back to raw body"
            );
        }

        let markdown_raw = self.to_markdown(&content_html);
        let markdown_clean = cleanup(&markdown_raw);
        tracing::debug!(
            html_len = page.html.len(),
            raw_len = markdown_raw.len(),
            clean_len = markdown_clean.len(),
            "Converted HTML to Markdown"
        );

        ExtractedDocument {
            title,
            markdown_raw,
            markdown_clean,
            extraction_degraded: degraded,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Returns the inner HTML of the readable region and whether extraction
/// had to fall back to the raw body.
fn extract_content_html(doc: &Html, html: &str) -> (String, bool) {
    let mut first_semantic: Option<ElementRef> = None;

    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        for el in doc.select(&selector) {
            let len = text_len(el);
            if len >= CHAR_THRESHOLD {
                return (el.inner_html(), false);
            }
            if len > 0 && first_semantic.is_none() {
                first_semantic = Some(el);
            }
        }
    }

    if let Some(el) = densest_block(doc) {
        return (el.inner_html(), false);
    }

    if let Some(el) = first_semantic {
        return (el.inner_html(), false);
    }

    if let Ok(body_sel) = Selector::parse("body")
        && let Some(body) = doc.select(&body_sel).next()
    {
        return (body.inner_html(), true);
    }

    (html.to_string(), true)
}

/// The `div`/`section` whose direct `<p>` children carry the most text,
/// if that text reaches [`CHAR_THRESHOLD`].
fn densest_block(doc: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("div, section").ok()?;
    doc.select(&selector)
        .map(|el| {
            let score: usize = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "p")
                .map(text_len)
                .sum();
            (el, score)
        })
        .filter(|(_, score)| *score >= CHAR_THRESHOLD)
        .max_by_key(|(_, score)| *score)
        .map(|(el, _)| el)
}

fn text_len(el: ElementRef) -> usize {
    normalize_text(el.text()).chars().count()
}

fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<title>`, else the first `<h1>`, else the URL's host, else the URL.
fn resolve_title(doc: &Html, request_url: &str) -> String {
    ["title", "h1"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            doc.select(&selector)
                .map(|el| normalize_text(el.text()))
                .find(|t| !t.is_empty())
        })
        .or_else(|| {
            Url::parse(request_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| request_url.to_string())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Drop comments and turn strikethrough tags into `~~` markers.
fn preprocess(html: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static STRIKE_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<(?:del|s|strike)(?:\s[^>]*)?>").expect("valid regex")
    });
    static STRIKE_CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</(?:del|s|strike)\s*>").expect("valid regex"));

    let html = COMMENT_RE.replace_all(html, "");
    let html = STRIKE_OPEN_RE.replace_all(&html, "~~");
    STRIKE_CLOSE_RE.replace_all(&html, "~~").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchi_core::models::SourceMode;

    const PARA: &str = "Borrowing lets a function use a value without taking ownership of it, and the borrow checker makes sure every reference stays valid for as long as it is used.";

    fn page(html: &str) -> RawPage {
        RawPage {
            html: html.to_string(),
            final_url: "https://docs.example.com/guide".to_string(),
            source_mode: SourceMode::Static,
        }
    }

    fn convert(html: &str) -> ExtractedDocument {
        HtmdConverter::new().convert(&page(html), "https://docs.example.com/guide")
    }

    fn paragraphs(n: usize) -> String {
        (0..n).map(|_| format!("<p>{PARA}</p>")).collect()
    }

    #[test]
    fn test_basic_html_to_markdown() {
        let doc = convert("<h1>Hello</h1><p>World</p>");
        assert!(doc.markdown_clean.contains("# Hello"));
        assert!(doc.markdown_clean.contains("World"));
    }

    #[test]
    fn test_strips_script_tags() {
        let doc = convert("<p>Content</p><script>alert('xss')</script>");
        assert!(doc.markdown_clean.contains("Content"));
        assert!(!doc.markdown_clean.contains("alert"));
    }

    #[test]
    fn extracts_article_and_drops_chrome() {
        let html = format!(
            "<html><head><title>Guide</title></head><body>\
             <nav><a href=\"/\">Home</a><a href=\"/blog\">Blog</a></nav>\
             <article><h2>Borrowing</h2>{}</article>\
             <footer>Copyright 2024 Example Corp</footer></body></html>",
            paragraphs(4)
        );
        let doc = convert(&html);
        assert!(!doc.extraction_degraded);
        assert!(doc.markdown_clean.contains("## Borrowing"));
        assert!(doc.markdown_clean.contains("borrow checker"));
        assert!(!doc.markdown_clean.contains("Home"));
        assert!(!doc.markdown_clean.contains("Copyright"));
    }

    #[test]
    fn finds_dense_block_without_semantic_markup() {
        let html = format!(
            "<html><body><div class=\"sidebar\"><p>Related posts</p></div>\
             <div class=\"post-body\">{}</div></body></html>",
            paragraphs(4)
        );
        let doc = convert(&html);
        assert!(!doc.extraction_degraded);
        assert!(doc.markdown_clean.contains("borrow checker"));
        assert!(!doc.markdown_clean.contains("Related posts"));
    }

    #[test]
    fn falls_back_to_body_when_no_article() {
        let doc = convert("<html><body><span>Loading...</span></body></html>");
        assert!(doc.extraction_degraded);
        assert!(doc.markdown_clean.contains("Loading..."));
    }

    #[test]
    fn short_semantic_region_is_used_when_nothing_better() {
        let doc = convert("<html><body><div>menu</div><main><p>Short note.</p></main></body></html>");
        assert!(!doc.extraction_degraded);
        assert_eq!(doc.markdown_clean, "Short note.");
    }

    #[test]
    fn malformed_html_does_not_fail() {
        let doc = convert("<div><p>unclosed <b>bold <i>text</div></p>>>");
        assert!(doc.markdown_clean.contains("unclosed"));
        let empty = convert("");
        assert!(empty.markdown_clean.is_empty());
    }

    #[test]
    fn title_prefers_title_tag() {
        let doc = convert("<html><head><title> Rust  Guide </title></head><body><h1>Heading</h1></body></html>");
        assert_eq!(doc.title, "Rust Guide");
    }

    #[test]
    fn title_falls_back_to_h1_then_host() {
        let doc = convert("<html><head><title>  </title></head><body><h1>First <em>heading</em></h1><h1>Second</h1></body></html>");
        assert_eq!(doc.title, "First heading");

        let doc = convert("<html><body><p>no headings</p></body></html>");
        assert_eq!(doc.title, "docs.example.com");
    }

    #[test]
    fn converts_strikethrough_and_code_blocks() {
        let doc = convert("<main><p>Use <del>old</del> new.</p><pre><code>let x = 1;</code></pre></main>");
        assert!(doc.markdown_clean.contains("~~old~~"), "{}", doc.markdown_clean);
        assert!(doc.markdown_clean.contains("```"));
        assert!(doc.markdown_clean.contains("let x = 1;"));
    }

    #[test]
    fn emphasis_uses_asterisks() {
        let doc = convert("<article><p>An <em>emph</em> and <strong>strong</strong> and <s>gone</s>.</p></article>");
        assert!(
            doc.markdown_clean.contains("An *emph* and **strong** and ~~gone~~."),
            "{}",
            doc.markdown_clean
        );
    }

    #[test]
    fn tables_become_pipe_tables() {
        let doc = convert(
            "<main><table><thead><tr><th>A</th><th>B</th></tr></thead>\
             <tbody><tr><td>1</td><td>2</td></tr></tbody></table></main>",
        );
        let lines: Vec<&str> = doc.markdown_clean.lines().map(str::trim).collect();
        let header = lines
            .iter()
            .position(|l| l.starts_with('|') && l.contains('A') && l.contains('B'))
            .unwrap_or_else(|| panic!("no header row in {lines:?}"));
        let separator = lines[header + 1];
        assert!(separator.starts_with('|') && separator.contains('-'), "{lines:?}");
        assert!(separator.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ')));
        assert!(lines[header + 2].contains('1') && lines[header + 2].contains('2'));
    }

    #[test]
    fn comments_never_reach_markdown() {
        let doc = convert("<main><!-- tracking --><p>Visible</p><!--\nmulti\nline\n--></main>");
        assert!(!doc.markdown_raw.contains("<!--"));
        assert!(!doc.markdown_clean.contains("tracking"));
        assert!(doc.markdown_clean.contains("Visible"));
    }

    #[test]
    fn preprocess_leaves_similar_tags_alone() {
        let out = preprocess("<section><s>gone</s><span>kept</span><script></script></section>");
        assert_eq!(out, "<section>~~gone~~<span>kept</span><script></script></section>");
    }

    #[test]
    fn lists_use_dash_markers() {
        let doc = convert("<main><ul><li>one</li><li>two</li></ul></main>");
        let items: Vec<&str> = doc.markdown_clean.lines().collect();
        assert!(items.iter().any(|l| l.starts_with('-') && l.contains("one")), "{items:?}");
        assert!(items.iter().any(|l| l.starts_with('-') && l.contains("two")));
    }
}
