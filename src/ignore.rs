//! Decides whether a path in a blog folder can ever become an entry.
//!
//! Hidden files, `_`-prefixed files and the debris that operating systems,
//! sync clients and editors leave behind are never published.

use std::sync::OnceLock;

use regex::RegexSet;

const IGNORED_NAMES: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "icon\r",
    "__macosx",
    "$recycle.bin",
    "system volume information",
];

fn artifact_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"^~\$",                  // office lock files
            r"~$",                    // editor backups
            r"^#.*#$",                // emacs autosave
            r"\.sw[a-px]$",           // vim swap files
            r"\.(tmp|temp|part|crdownload|download)$",
            r"\.icloud$",             // iCloud placeholders
            r"^dropbox\.cache$",      // dropbox cache folder
            r"\.(lock|lck)$",
            r"\(conflicted copy",
        ])
        .unwrap_or_else(|_| RegexSet::empty())
    })
}

fn is_ignored_component(name: &str) -> bool {
    if name.starts_with('.') || name.starts_with('_') {
        return true;
    }
    let lower = name.to_lowercase();
    IGNORED_NAMES.contains(&lower.as_str()) || artifact_patterns().is_match(&lower)
}

/// Returns `true` when `path` must not be treated as publishable content.
/// Pure, no I/O.
pub fn should_ignore(path: &str) -> bool {
    let mut components = path.split(['/', '\\']).filter(|c| !c.is_empty()).peekable();
    if components.peek().is_none() {
        // The folder root itself, or a directory marker.
        return true;
    }
    if path.ends_with('/') {
        return true;
    }
    components.any(is_ignored_component)
}

#[cfg(test)]
mod tests {
    use super::should_ignore;

    #[test]
    fn publishable_paths_pass() {
        for path in [
            "/hello.txt",
            "/Posts/2024/first post.md",
            "/[Travel]/lisbon.md",
            "/bundle.textbundle/assets/photo.jpg",
            "/notes-on-tmp.md",
        ] {
            assert!(!should_ignore(path), "{path} should be publishable");
        }
    }

    #[test]
    fn os_and_editor_artifacts_are_ignored() {
        for path in [
            "/.DS_Store",
            "/posts/.hidden.md",
            "/.git/config",
            "/_drafts-private/a.md",
            "/Thumbs.db",
            "/sub/desktop.ini",
            "/Icon\r",
            "/~$report.docx",
            "/post.md~",
            "/.post.md.swp",
            "/post.md.swp",
            "/post.md.swx",
            "/#post.md#",
            "/download.crdownload",
            "/post.md.icloud",
            "/__MACOSX/post.md",
            "/dropbox.cache/x",
            "/post (conflicted copy 2024-01-01).md",
            "/folder/",
            "/",
            "",
        ] {
            assert!(should_ignore(path), "{path:?} should be ignored");
        }
    }
}
