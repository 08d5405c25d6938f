//! Metadata blocks, dates, and the conventions encoded in folder paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

const MAX_KEY_LENGTH: usize = 32;

fn parse_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty()
        || key.len() > MAX_KEY_LENGTH
        || !key.starts_with(|c: char| c.is_ascii_alphabetic())
        || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    // `http://...` on its own line is prose, not metadata.
    if value.starts_with("//") {
        return None;
    }
    Some((key.to_lowercase(), value.trim().to_string()))
}

/// Splits a leading metadata block off `text`.
///
/// Two forms are accepted: YAML-style front matter between `---` lines, and
/// bare `Key: value` lines ended by a blank line. If any line of a bare block
/// does not parse, the text has no metadata.
pub fn split_metadata(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut metadata = BTreeMap::new();

    if let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            offset += line.len();
            let trimmed = line.trim_end();
            if trimmed == "---" {
                return (metadata, &rest[offset..]);
            }
            if let Some((key, value)) = parse_line(trimmed) {
                metadata.insert(key, value);
            }
        }
        return (BTreeMap::new(), text);
    }

    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if metadata.is_empty() {
                return (metadata, text);
            }
            return (metadata, &text[offset + line.len()..]);
        }
        match parse_line(trimmed) {
            Some((key, value)) => metadata.insert(key, value),
            None => return (BTreeMap::new(), text),
        };
        offset += line.len();
    }
    // A file made only of `Key: value` lines is content, not metadata.
    (BTreeMap::new(), text)
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_tags(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a metadata date. Dates without an offset are read in `tz`.
pub fn parse_date(value: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_to_utc(naive, tz);
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d %B %Y", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return local_to_utc(date.and_hms_opt(0, 0, 0)?, tz);
        }
    }
    None
}

fn local_to_utc(naive: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// A date spelled out in the path: `/2024/05/01/post.md` or `/2024-05-01-post.md`.
pub fn date_from_path(path: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    static DATE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = DATE
        .get_or_init(|| Regex::new(r"(?:^|/)(\d{4})[/-](\d{1,2})[/-](\d{1,2})(?:\D|$)").ok())
        .as_ref()?;
    let caps = re.captures(path)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    local_to_utc(NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?, tz)
}

/// Flags and tags implied by the folders a file sits in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathConventions {
    pub draft: bool,
    pub page: bool,
    pub tags: BTreeSet<String>,
}

pub fn path_conventions(path: &str) -> PathConventions {
    let mut conventions = PathConventions::default();
    let mut folders: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    folders.pop();
    for folder in folders {
        if folder.eq_ignore_ascii_case("drafts") {
            conventions.draft = true;
        } else if folder.eq_ignore_ascii_case("pages") {
            conventions.page = true;
        } else if let Some(tag) = folder
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            if !tag.trim().is_empty() {
                conventions.tags.insert(tag.trim().to_string());
            }
        }
    }
    conventions
}
