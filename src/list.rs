//! Decorates ordered lists for presentation: first/last/penultimate markers
//! and 1-based positions, plus paging over decorated lists.

use serde::Serialize;
use serde_json::Value;

/// Annotates a JSON array without reordering it.
///
/// Object elements get `position` (1-based, from the original index) and
/// `first`, `last` and `penultimate` (the latter only when there are more than
/// two elements). Non-object elements are passed through untouched but still
/// count towards positions. Anything other than an array yields an empty list.
pub fn decorate(list: &Value) -> Vec<Value> {
    let Value::Array(items) = list else {
        return Vec::new();
    };
    let len = items.len();
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut item = item.clone();
            if let Value::Object(map) = &mut item {
                map.insert("position".into(), Value::from(index + 1));
                if index == 0 {
                    map.insert("first".into(), Value::Bool(true));
                }
                if index + 1 == len {
                    map.insert("last".into(), Value::Bool(true));
                }
                if len > 2 && index + 2 == len {
                    map.insert("penultimate".into(), Value::Bool(true));
                }
            }
            item
        })
        .collect()
}

/// One page of a decorated list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Value>,
    /// 1-based.
    pub current: usize,
    pub total: usize,
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

/// Cuts page `page` (1-based, clamped to at least 1) of `per_page` items out
/// of `items` and decorates it.
pub fn paginate<T: Serialize>(items: &[T], page: usize, per_page: usize) -> Page {
    let per_page = per_page.max(1);
    let total = items.len().div_ceil(per_page).max(1);
    let current = page.max(1);
    let slice: Vec<Value> = items
        .iter()
        .skip((current - 1).saturating_mul(per_page))
        .take(per_page)
        .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
        .collect();
    Page {
        items: decorate(&Value::Array(slice)),
        current,
        total,
        previous: (current > 1).then(|| current - 1),
        next: (current < total).then(|| current + 1),
    }
}
