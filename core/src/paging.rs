//! The two pagination idioms used by the remote APIs: a `next` link (absolute or
//! relative to the API base) and a `pagination.next_cursor` token.

use serde_json::Value;
use url::Url;

/// `next` link of a page, resolved against `base`. `None` ends the listing.
pub fn next_link(page: &Value, base: &str) -> Option<String> {
    let next = match page.get("next")? {
        Value::String(s) if !s.trim().is_empty() => s.trim(),
        _ => return None,
    };
    if next.starts_with("http://") || next.starts_with("https://") {
        return Some(next.to_string());
    }
    let base = Url::parse(&format!("{}/", base.trim_end_matches('/'))).ok()?;
    base.join(next.trim_start_matches('/')).ok().map(|u| u.to_string())
}

/// `pagination.next_cursor` of a page. Missing, null or empty ends the listing.
pub fn next_cursor(page: &Value) -> Option<String> {
    match page.get("pagination")?.get("next_cursor")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Items of a page held under `key`; anything that is not an array counts as empty.
pub fn page_items<'a>(page: &'a Value, key: &str) -> &'a [Value] {
    page.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absolute_next_link_is_kept() {
        let page = json!({"next": "https://dojo.local/api/v2/products/?offset=200"});
        assert_eq!(next_link(&page, "http://ignored").as_deref(), Some("https://dojo.local/api/v2/products/?offset=200"));
    }

    #[test]
    fn relative_next_link_joins_base() {
        let page = json!({"next": "/products/?limit=200&offset=200"});
        assert_eq!(
            next_link(&page, "http://dojo.local:8080/api/v2/").as_deref(),
            Some("http://dojo.local:8080/api/v2/products/?limit=200&offset=200")
        );
    }

    #[test]
    fn missing_next_ends_listing() {
        assert!(next_link(&json!({"next": null}), "http://x").is_none());
        assert!(next_link(&json!({"results": []}), "http://x").is_none());
        assert!(next_link(&json!({"next": ""}), "http://x").is_none());
    }

    #[test]
    fn cursor_forms() {
        assert_eq!(next_cursor(&json!({"pagination": {"next_cursor": "abc"}})).as_deref(), Some("abc"));
        assert_eq!(next_cursor(&json!({"pagination": {"next_cursor": 100}})).as_deref(), Some("100"));
        assert!(next_cursor(&json!({"pagination": {"next_cursor": null}})).is_none());
        assert!(next_cursor(&json!({"groups": []})).is_none());
    }

    #[test]
    fn page_items_tolerates_shape() {
        assert_eq!(page_items(&json!({"targets": [1, 2]}), "targets").len(), 2);
        assert!(page_items(&json!({"targets": {}}), "targets").is_empty());
    }
}
