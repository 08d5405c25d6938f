//! The closed set of file formats that can become entries.
//!
//! A format is resolved once per file from its path, and every variant turns
//! bytes into an [`Extracted`] fragment the same way.

use std::collections::BTreeMap;

use pulldown_cmark::{html::push_html, Event, Options, Parser};

use super::html;
use super::metadata::split_metadata;
use super::ConvertError;

const BUNDLE_SUFFIX: &str = ".textbundle";
const BUNDLE_DOCUMENTS: &[&str] = &["text.md", "text.markdown", "text.txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `.txt`: Markdown where every line break is kept.
    Text,
    /// `.md`, `.markdown`, `.mdown`
    Markdown,
    /// `.html`, `.htm`
    Html,
    /// `.jpg`, `.jpeg`, `.png`, `.gif`, `.webp`
    Image,
    /// The primary document of a `*.textbundle` directory.
    TextBundle,
}

/// Output of the extraction stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub html: String,
    /// The source text after the metadata block.
    pub body: String,
    /// Asset paths the document references, absolute within the blog folder.
    pub assets: Vec<String>,
    /// Metadata with lower-cased keys.
    pub metadata: BTreeMap<String, String>,
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let idx = name.rfind('.')?;
    (idx > 0).then(|| name[idx + 1..].to_lowercase())
}

/// The `*.textbundle` directory containing `path`, if any.
pub fn bundle_root(path: &str) -> Option<&str> {
    let mut offset = 0;
    for segment in path.split('/') {
        let end = offset + segment.len();
        if segment.to_ascii_lowercase().ends_with(BUNDLE_SUFFIX) && end < path.len() {
            return Some(&path[..end]);
        }
        offset = end + 1;
    }
    None
}

/// Whether `path` is the document that represents its bundle.
pub fn is_bundle_document(path: &str) -> bool {
    match bundle_root(path) {
        Some(root) => {
            let rest = path[root.len()..].trim_start_matches('/').to_lowercase();
            BUNDLE_DOCUMENTS.contains(&rest.as_str())
        }
        None => false,
    }
}

impl Format {
    /// Picks the format for `path`. `None` means the file never yields an
    /// entry (unsupported type, or a sidecar asset inside a text bundle).
    pub fn resolve(path: &str) -> Option<Format> {
        if bundle_root(path).is_some() {
            return is_bundle_document(path).then_some(Format::TextBundle);
        }
        match extension(path)?.as_str() {
            "txt" | "text" => Some(Format::Text),
            "md" | "markdown" | "mdown" | "mkd" => Some(Format::Markdown),
            "html" | "htm" => Some(Format::Html),
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Some(Format::Image),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Markdown => "markdown",
            Format::Html => "html",
            Format::Image => "image",
            Format::TextBundle => "textbundle",
        }
    }

    pub fn extract(&self, path: &str, bytes: &[u8]) -> Result<Extracted, ConvertError> {
        match self {
            Format::Image => Ok(extract_image(path)),
            Format::Text => extract_markdown(path, decode(path, bytes)?, true),
            Format::Markdown => extract_markdown(path, decode(path, bytes)?, false),
            Format::Html => Ok(extract_html(decode(path, bytes)?)),
            Format::TextBundle => {
                let mut extracted = extract_markdown(path, decode(path, bytes)?, false)?;
                let root = bundle_root(path).unwrap_or("");
                extracted.html = rebase_bundle_assets(&extracted.html, root);
                extracted.assets = html::local_references(&extracted.html)
                    .into_iter()
                    .filter(|asset| asset.starts_with(root))
                    .collect();
                Ok(extracted)
            }
        }
    }
}

fn decode<'a>(path: &str, bytes: &'a [u8]) -> Result<&'a str, ConvertError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ConvertError::Encoding {
        path: path.to_string(),
    })?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn render_markdown(text: &str, hard_breaks: bool) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::SoftBreak if hard_breaks => Event::HardBreak,
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    push_html(&mut out, parser);
    out
}

fn extract_markdown(
    path: &str,
    text: &str,
    hard_breaks: bool,
) -> Result<Extracted, ConvertError> {
    let (metadata, body) = split_metadata(text);
    let html = render_markdown(body, hard_breaks);
    let assets = local_assets(path, &html);
    Ok(Extracted {
        html,
        body: body.to_string(),
        assets,
        metadata,
    })
}

fn extract_html(text: &str) -> Extracted {
    let lower = text.to_ascii_lowercase();
    let mut metadata = BTreeMap::new();
    if let (Some(start), Some(end)) = (lower.find("<title>"), lower.find("</title>")) {
        if start + 7 <= end {
            let title = html::strip_tags(&text[start + 7..end]);
            if !title.is_empty() {
                metadata.insert("title".to_string(), title);
            }
        }
    }
    let body = match (lower.find("<body"), lower.rfind("</body>")) {
        (Some(open), Some(close)) => match lower[open..].find('>') {
            Some(gt) if open + gt + 1 <= close => text[open + gt + 1..close].trim(),
            _ => text,
        },
        _ => text,
    };
    Extracted {
        html: body.to_string(),
        body: body.to_string(),
        assets: Vec::new(),
        metadata,
    }
}

fn extract_image(path: &str) -> Extracted {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let mut metadata = BTreeMap::new();
    metadata.insert("title".to_string(), stem.to_string());
    Extracted {
        html: format!(
            "<p><img src=\"{}\" alt=\"{}\"></p>",
            html::escape(path),
            html::escape(stem)
        ),
        body: String::new(),
        assets: Vec::new(),
        metadata,
    }
}

/// Referenced files (not pages) resolved against the document's directory.
fn local_assets(path: &str, html_fragment: &str) -> Vec<String> {
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    html::local_references(html_fragment)
        .into_iter()
        .filter(|target| {
            extension(target).is_some_and(|ext| {
                !matches!(ext.as_str(), "html" | "htm" | "md" | "markdown" | "txt")
            })
        })
        .map(|target| resolve_relative(dir, &target))
        .collect()
}

pub(crate) fn resolve_relative(dir: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

fn rebase_bundle_assets(html_fragment: &str, root: &str) -> String {
    html_fragment
        .replace("src=\"assets/", &format!("src=\"{root}/assets/"))
        .replace("href=\"assets/", &format!("href=\"{root}/assets/"))
}
