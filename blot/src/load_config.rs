//! `load_config`: reads the runner's YAML file into typed settings.
//!
//! This is the only place user-supplied YAML is parsed. Folder paths written
//! relative to the config file are resolved against its directory, so a config
//! can be moved together with the folders it points at.
//!
//! ```yaml
//! state_file: ./state.json
//! sync:
//!   contention: queue
//!   operation_timeout_secs: 30
//! blogs:
//!   - id: blog_1
//!     folder: ./blog_1
//!     plugins: [wikilinks]
//!     timezone_offset_minutes: 60
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use blot_sync::blog::Blog;
use blot_sync::config::SyncConfig;
use serde::Deserialize;
use tracing::{error, info};

#[derive(Debug, Clone, Deserialize)]
pub struct BlogSection {
    pub id: String,
    /// Local directory holding the blog's files.
    pub folder: PathBuf,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub timezone_offset_minutes: i32,
}

impl BlogSection {
    pub fn blog(&self) -> Blog {
        Blog {
            id: self.id.clone(),
            plugins: self.plugins.clone(),
            timezone_offset_minutes: self.timezone_offset_minutes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// JSON file the entry store is kept in.
    pub state_file: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    pub blogs: Vec<BlogSection>,
}

impl CliConfig {
    pub fn blog(&self, id: &str) -> Option<&BlogSection> {
        self.blogs.iter().find(|b| b.id == id)
    }

    pub fn trace_loaded(&self) {
        info!(
            state_file = %self.state_file.display(),
            blogs = self.blogs.len(),
            "Loaded CliConfig"
        );
        self.sync.trace_loaded();
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let mut seen = BTreeSet::new();
    for blog in &config.blogs {
        if blog.id.trim().is_empty() {
            bail!("Blog entries in {:?} need a non-empty id", path_ref);
        }
        if !seen.insert(blog.id.as_str()) {
            bail!("Blog id {} appears more than once in {:?}", blog.id, path_ref);
        }
    }

    let base = path_ref.parent().unwrap_or_else(|| Path::new("."));
    config.state_file = resolve(base, &config.state_file);
    for blog in &mut config.blogs {
        blog.folder = resolve(base, &blog.folder);
    }

    config.trace_loaded();
    Ok(config)
}
