//! Build/convert pipeline: raw file bytes in, entry fields out.
//!
//! Stages, strictly in this order:
//! 1. Extraction by [`Format`], resolved once from the path.
//! 2. The blog's plugin chain ([`plugins::run_chain`]), fail-open per plugin.
//! 3. Output: final HTML and a deduplicated dependency set.
//!
//! The pipeline is deterministic: the same bytes and plugin configuration give
//! byte-identical HTML and the same dependency set.

pub mod format;
pub mod html;
pub mod metadata;
pub mod plugins;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::blog::Blog;
use crate::contract::RemoteFile;
use crate::entry::EntryFields;
pub use format::{Extracted, Format};
use metadata::{date_from_path, parse_bool, parse_date, parse_tags, path_conventions};
pub use plugins::{BuiltinPlugin, BuiltinRegistry, Plugin, PluginContext, PluginRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{path} is not a publishable format")]
    Unsupported { path: String },
    #[error("{path} is not valid UTF-8")]
    Encoding { path: String },
}

/// HTML and dependencies produced for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Converted {
    pub html: String,
    pub dependencies: BTreeSet<String>,
}

/// Converts files for every blog, looking up each blog's plugins through a
/// [`PluginRegistry`].
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<dyn PluginRegistry>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinRegistry))
    }
}

impl Pipeline {
    pub fn new(registry: Arc<dyn PluginRegistry>) -> Self {
        Self { registry }
    }

    fn run(
        &self,
        blog: &Blog,
        path: &str,
        raw: &[u8],
    ) -> Result<(Extracted, Converted), ConvertError> {
        let format = Format::resolve(path).ok_or_else(|| ConvertError::Unsupported {
            path: path.to_string(),
        })?;
        debug!(blog_id = %blog.id, path, format = format.name(), "[BUILD] Extracting");
        let extracted = format.extract(path, raw)?;

        let plugins = self.registry.enabled(blog);
        let ctx = PluginContext { blog, path };
        let (html, mut dependencies) =
            plugins::run_chain(&plugins, extracted.html.clone(), &ctx);
        dependencies.extend(extracted.assets.iter().cloned());
        dependencies.remove(path);

        Ok((extracted, Converted { html, dependencies }))
    }

    /// Stages 1-3: the HTML and dependencies for `path`.
    pub fn convert(&self, blog: &Blog, path: &str, raw: &[u8]) -> Result<Converted, ConvertError> {
        self.run(blog, path, raw).map(|(_, converted)| converted)
    }

    /// Converts a remote file and maps the result, its metadata, and the path
    /// conventions onto entry fields.
    pub fn build(
        &self,
        blog: &Blog,
        file: &RemoteFile,
        raw: &[u8],
    ) -> Result<EntryFields, ConvertError> {
        let (extracted, converted) = self.run(blog, &file.path, raw)?;
        let mut meta = extracted.metadata;
        let tz = blog.timezone();
        let conventions = path_conventions(&file.path);

        let mut tags = conventions.tags;
        if let Some(value) = meta.remove("tags") {
            tags.extend(parse_tags(&value));
        }

        let date_stamp = meta
            .remove("date")
            .and_then(|value| parse_date(&value, tz))
            .or_else(|| date_from_path(&file.path, tz))
            .unwrap_or(file.modified);

        let page = meta
            .remove("page")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(conventions.page);
        let menu = meta.remove("menu").and_then(|v| parse_bool(&v)).unwrap_or(page);
        let draft = meta
            .remove("draft")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(conventions.draft);

        let permalink = meta
            .remove("permalink")
            .or_else(|| meta.remove("link"))
            .map(|link| format!("/{}", link.trim().trim_matches('/')));

        let internal_links: BTreeSet<String> = html::local_references(&converted.html)
            .into_iter()
            .filter(|target| *target != file.path && !converted.dependencies.contains(target))
            .collect();

        info!(
            blog_id = %blog.id,
            path = %file.path,
            dependencies = converted.dependencies.len(),
            "[BUILD] Built entry fields"
        );

        Ok(EntryFields {
            path: Some(file.path.clone()),
            title: Some(meta.remove("title").unwrap_or_default()),
            slug: Some(String::new()),
            url: Some(permalink.clone().unwrap_or_default()),
            permalink: Some(permalink.unwrap_or_default()),
            summary: Some(meta.remove("summary").unwrap_or_default()),
            teaser: Some(String::new()),
            body: Some(extracted.body),
            html: Some(converted.html),
            tags: Some(tags),
            dependencies: Some(converted.dependencies),
            internal_links: Some(internal_links),
            menu: Some(menu),
            page: Some(page),
            draft: Some(draft),
            size: Some(file.size),
            hash: Some(file.hash.clone()),
            modified: Some(file.modified),
            date_stamp: Some(date_stamp),
            metadata: Some(meta),
            ..EntryFields::default()
        })
    }
}
