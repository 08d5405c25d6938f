//! Plugins: per-blog HTML transforms that run after extraction.
//!
//! Every plugin goes through the same [`Plugin::apply`] contract and declares
//! what it is allowed to change through [`Capabilities`]. [`run_chain`] is the
//! one place plugins are invoked; a plugin that fails, panics or returns
//! nothing leaves the HTML and dependencies exactly as they were.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};
use tracing::{debug, warn};

use super::format::resolve_relative;
use super::html;
use crate::blog::Blog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub rewrites_html: bool,
    pub appends_dependencies: bool,
}

pub struct PluginContext<'a> {
    pub blog: &'a Blog,
    /// Path of the file being built.
    pub path: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOutput {
    pub html: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("plugin {plugin} failed: {reason}")]
pub struct PluginError {
    pub plugin: &'static str,
    pub reason: String,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// `Ok(None)` means "no change".
    fn apply(&self, html: &str, ctx: &PluginContext<'_>) -> Result<Option<PluginOutput>, PluginError>;
}

/// Supplies the enabled plugins for a blog, in the order they run.
pub trait PluginRegistry: Send + Sync {
    fn enabled(&self, blog: &Blog) -> Vec<Arc<dyn Plugin>>;
}

/// The plugins shipped with the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinPlugin {
    /// `[[Target]]` and `[[Target|label]]` become links to sibling documents.
    WikiLinks,
    /// Bare image URLs become `<img>` tags.
    ImageLinks,
    /// Off-site links open in a new tab.
    ExternalLinks,
}

impl BuiltinPlugin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "wikilinks" | "wiki_links" => Some(BuiltinPlugin::WikiLinks),
            "image_links" | "imagelinks" | "autoimage" | "auto_image" => {
                Some(BuiltinPlugin::ImageLinks)
            }
            "external_links" | "externallinks" => Some(BuiltinPlugin::ExternalLinks),
            _ => None,
        }
    }
}

impl Plugin for BuiltinPlugin {
    fn name(&self) -> &'static str {
        match self {
            BuiltinPlugin::WikiLinks => "wikilinks",
            BuiltinPlugin::ImageLinks => "image_links",
            BuiltinPlugin::ExternalLinks => "external_links",
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self {
            BuiltinPlugin::WikiLinks => Capabilities {
                rewrites_html: true,
                appends_dependencies: true,
            },
            BuiltinPlugin::ImageLinks | BuiltinPlugin::ExternalLinks => Capabilities {
                rewrites_html: true,
                appends_dependencies: false,
            },
        }
    }

    fn apply(&self, html: &str, ctx: &PluginContext<'_>) -> Result<Option<PluginOutput>, PluginError> {
        let output = match self {
            BuiltinPlugin::WikiLinks => wikilinks(html, ctx.path),
            BuiltinPlugin::ImageLinks => PluginOutput {
                html: image_links(html),
                dependencies: Vec::new(),
            },
            BuiltinPlugin::ExternalLinks => PluginOutput {
                html: external_links(html),
                dependencies: Vec::new(),
            },
        };
        if output.html == html && output.dependencies.is_empty() {
            return Ok(None);
        }
        Ok(Some(output))
    }
}

/// Maps a blog's plugin names onto [`BuiltinPlugin`]s. Unknown names are
/// skipped with a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRegistry;

impl PluginRegistry for BuiltinRegistry {
    fn enabled(&self, blog: &Blog) -> Vec<Arc<dyn Plugin>> {
        blog.plugins
            .iter()
            .filter_map(|name| match BuiltinPlugin::from_name(name) {
                Some(plugin) => Some(Arc::new(plugin) as Arc<dyn Plugin>),
                None => {
                    warn!(blog_id = %blog.id, plugin = %name, "[BUILD] Unknown plugin, skipping");
                    None
                }
            })
            .collect()
    }
}

/// Runs `plugins` in order over `html`, collecting dependencies.
pub fn run_chain(
    plugins: &[Arc<dyn Plugin>],
    mut html: String,
    ctx: &PluginContext<'_>,
) -> (String, BTreeSet<String>) {
    let mut dependencies = BTreeSet::new();
    for plugin in plugins {
        let result = catch_unwind(AssertUnwindSafe(|| plugin.apply(&html, ctx)));
        let output = match result {
            Ok(Ok(Some(output))) => output,
            Ok(Ok(None)) => {
                debug!(plugin = plugin.name(), path = ctx.path, "[BUILD] Plugin made no change");
                continue;
            }
            Ok(Err(e)) => {
                warn!(plugin = plugin.name(), path = ctx.path, error = %e, "[BUILD] Plugin failed, output unchanged");
                continue;
            }
            Err(_) => {
                warn!(plugin = plugin.name(), path = ctx.path, "[BUILD] Plugin panicked, output unchanged");
                continue;
            }
        };
        let capabilities = plugin.capabilities();
        if capabilities.rewrites_html {
            html = output.html;
        }
        if capabilities.appends_dependencies {
            dependencies.extend(output.dependencies);
        }
    }
    (html, dependencies)
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn wikilinks(html_fragment: &str, path: &str) -> PluginOutput {
    static WIKI: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(&WIKI, r"\[\[([^\]|]+)(?:\|([^\]]+))?\]\]") else {
        return PluginOutput {
            html: html_fragment.to_string(),
            dependencies: Vec::new(),
        };
    };
    let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let mut dependencies = Vec::new();
    let rewritten = re.replace_all(html_fragment, |caps: &Captures<'_>| {
        let target = caps[1].trim();
        let label = caps.get(2).map(|m| m.as_str().trim()).unwrap_or(target);
        let file = if target.rsplit('/').next().is_some_and(|name| name.contains('.')) {
            target.to_string()
        } else {
            format!("{target}.md")
        };
        dependencies.push(resolve_relative(dir, &file));
        let stem = target.rsplit('/').next().unwrap_or(target);
        let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
        format!(
            "<a href=\"/{}\" class=\"wikilink\">{}</a>",
            html::slugify(stem),
            label
        )
    });
    PluginOutput {
        html: rewritten.into_owned(),
        dependencies,
    }
}

fn image_links(html_fragment: &str) -> String {
    static IMAGE_URL: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(
        &IMAGE_URL,
        r#"(?i)https?://[^\s<>"']+\.(?:png|jpe?g|gif|webp|svg)\b"#,
    ) else {
        return html_fragment.to_string();
    };
    let mut out = String::with_capacity(html_fragment.len());
    let mut last = 0;
    for m in re.find_iter(html_fragment) {
        let before = html_fragment[..m.start()].chars().next_back();
        let after = html_fragment[m.end()..].chars().next();
        let in_attribute = matches!(before, Some('"' | '\'' | '='));
        let continues = matches!(after, Some(c) if !c.is_whitespace() && c != '<');
        if in_attribute || continues {
            continue;
        }
        out.push_str(&html_fragment[last..m.start()]);
        out.push_str(&format!("<img src=\"{}\">", m.as_str()));
        last = m.end();
    }
    out.push_str(&html_fragment[last..]);
    out
}

fn external_links(html_fragment: &str) -> String {
    static ANCHOR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached(&ANCHOR, r#"<a\s([^>]*href\s*=\s*["']https?://[^>]*)>"#) else {
        return html_fragment.to_string();
    };
    re.replace_all(html_fragment, |caps: &Captures<'_>| {
        let attributes = &caps[1];
        if attributes.contains("target=") {
            caps[0].to_string()
        } else {
            format!("<a {attributes} target=\"_blank\" rel=\"noopener\">")
        }
    })
    .into_owned()
}
