//! Readable-content extraction from rendered HTML.
//!
//! Pulls the title and main article text out of a page, preferring
//! semantic containers (`article`, `main`, `[role=main]`) and falling
//! back to the body with chrome elements stripped.

pub mod media;

use scraper::{Html, Selector};

/// Extracted page content.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: String,
    /// Whitespace-collapsed text for prompts and word counts.
    pub text: String,
    /// Text with block boundaries preserved as newlines. Publisher
    /// transcripts need the line structure (speaker labels sit on their
    /// own lines).
    pub structured_text: String,
    pub word_count: i64,
}

/// Extracts title and readable text from rendered HTML.
#[must_use]
pub fn extract_content(html: &str, url: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let title = extract_title(&document).unwrap_or_else(|| url.to_string());
    let structured_text = extract_structured_text(&document);
    let text = collapse_whitespace(&structured_text);
    let word_count = text.split_whitespace().count() as i64;

    ExtractedContent {
        title,
        text,
        structured_text,
        word_count,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    // og:title is the most reliably clean variant.
    let og = Selector::parse(r#"meta[property="og:title"]"#).expect("valid selector");
    if let Some(meta) = document.select(&og).next() {
        if let Some(content) = meta.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }

    let title = Selector::parse("title").expect("valid selector");
    if let Some(el) = document.select(&title).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    let h1 = Selector::parse("h1").expect("valid selector");
    document.select(&h1).next().and_then(|el| {
        let text = el.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

fn extract_structured_text(document: &Html) -> String {
    for selector in ["article", "main", "[role=main]"] {
        let sel = Selector::parse(selector).expect("valid selector");
        if let Some(container) = document.select(&sel).next() {
            let text = text_with_breaks(container);
            if text.split_whitespace().count() > 30 {
                return text;
            }
        }
    }

    // Fall back to the whole body. scraper's text() already skips
    // script/style contents.
    let body = Selector::parse("body").expect("valid selector");
    document
        .select(&body)
        .next()
        .map(text_with_breaks)
        .unwrap_or_default()
}

/// Block elements whose start breaks a line.
const BLOCK_ELEMENTS: [&str; 13] = [
    "p", "div", "br", "li", "tr", "section", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Collects text with newlines at block boundaries, then drops empty
/// lines.
fn text_with_breaks(container: scraper::ElementRef) -> String {
    let mut out = String::new();
    for node in container.descendants() {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        } else if let Some(element) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&element.name()) {
                out.push('\n');
            }
        }
    }

    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_og_title() {
        let html = r#"<html><head>
            <meta property="og:title" content="The Real Title"/>
            <title>Site | The Real Title</title>
        </head><body><h1>H1 Title</h1></body></html>"#;
        let content = extract_content(html, "https://example.com");
        assert_eq!(content.title, "The Real Title");
    }

    #[test]
    fn falls_back_to_title_tag_then_url() {
        let html = "<html><head><title>Tag Title</title></head><body></body></html>";
        assert_eq!(extract_content(html, "u").title, "Tag Title");

        let bare = "<html><body></body></html>";
        assert_eq!(extract_content(bare, "https://x.com/p").title, "https://x.com/p");
    }

    #[test]
    fn article_container_preferred_over_body() {
        let filler = "word ".repeat(50);
        let html = format!(
            "<html><body><nav>menu menu menu</nav><article>{}</article></body></html>",
            filler
        );
        let content = extract_content(&html, "u");
        assert!(!content.text.contains("menu"));
        assert_eq!(content.word_count, 50);
    }

    #[test]
    fn short_article_falls_back_to_body() {
        let html = "<html><body><article>tiny</article><p>more body text here</p></body></html>";
        let content = extract_content(html, "u");
        assert!(content.text.contains("more body text"));
    }

    #[test]
    fn structured_text_keeps_block_boundaries() {
        let filler = "word ".repeat(40);
        let html = format!(
            "<html><body><article><p>Operator:</p><p>Good morning and welcome.</p><p>{}</p></article></body></html>",
            filler
        );
        let content = extract_content(&html, "u");
        let lines: Vec<&str> = content.structured_text.lines().collect();
        assert_eq!(lines[0], "Operator:");
        assert_eq!(lines[1], "Good morning and welcome.");
        // Collapsed text joins the same content with spaces.
        assert!(content.text.starts_with("Operator: Good morning"));
    }

    #[test]
    fn whitespace_collapsed() {
        let html = "<html><body><article>one\n\n   two\tthree four five six seven eight nine ten \
                    eleven twelve thirteen fourteen fifteen sixteen seventeen eighteen nineteen \
                    twenty a b c d e f g h i j k l</article></body></html>";
        let content = extract_content(html, "u");
        assert!(content.text.starts_with("one two three"));
    }
}
