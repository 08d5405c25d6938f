//! Small HTML helpers shared by the extractors and the entry model.

use std::sync::OnceLock;

use regex::Regex;

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Text content of an HTML fragment with whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    let text = match regex(&TAGS, r"(?s)<[^>]*>") {
        Some(re) => re.replace_all(html, " ").into_owned(),
        None => html.to_string(),
    };
    unescape(&text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// The first `<h1>` element, tags included.
pub fn first_h1(html: &str) -> Option<&str> {
    static H1: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&H1, r"(?is)<h1[^>]*>.*?</h1>")?
        .find(html)
        .map(|m| m.as_str())
}

/// The first `<p>` element, tags included.
pub fn first_paragraph(html: &str) -> Option<&str> {
    static P: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&P, r"(?is)<p[^>]*>.*?</p>")?
        .find(html)
        .map(|m| m.as_str())
}

/// Every local `src`/`href` target in the fragment: no scheme, no fragment-only
/// or mailto links.
pub fn local_references(html: &str) -> Vec<String> {
    static REFS: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = regex(&REFS, r#"(?i)\b(?:src|href)\s*=\s*["']([^"']+)["']"#) else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|target| {
            !target.contains("://")
                && !target.starts_with("//")
                && !target.starts_with('#')
                && !target.starts_with("mailto:")
                && !target.starts_with("data:")
        })
        .map(|target| target.split(['?', '#']).next().unwrap_or(target).to_string())
        .filter(|target| !target.is_empty())
        .collect()
}

/// Lower-case, dash-separated form of `text` suitable for a URL segment.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Cuts `text` to at most `max` characters on a word boundary.
pub fn truncate_words(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}…", &cut[..idx]),
        _ => format!("{cut}…"),
    }
}
