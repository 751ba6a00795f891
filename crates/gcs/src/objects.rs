use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Object resource of the JSON API, trimmed to the fields the gallery uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    pub name: String,
    #[serde(default, deserialize_with = "u64_from_string")]
    pub size: u64,
    pub updated: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    #[serde(default)]
    pub items: Vec<ObjectResource>,
    pub next_page_token: Option<String>,
}

/// Query parameters of `objects.list`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub page_token: Option<String>,
    /// Inclusive lower bound on object names.
    pub start_offset: Option<String>,
    pub max_results: usize,
}

// int64 fields travel as JSON strings.
fn u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Size::deserialize(deserializer)? {
        Size::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Size::Number(n) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_response() {
        let body = r#"{
            "kind": "storage#objects",
            "nextPageToken": "CgVjLnBuZw==",
            "items": [
                {
                    "kind": "storage#object",
                    "name": "cat.png",
                    "bucket": "photos",
                    "size": "1024",
                    "contentType": "image/png",
                    "updated": "2024-03-01T10:15:30.123Z"
                },
                { "name": "dog.png", "size": 7 }
            ]
        }"#;
        let list: ObjectList = serde_json::from_str(body).unwrap();
        assert_eq!(list.next_page_token.as_deref(), Some("CgVjLnBuZw=="));
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].name, "cat.png");
        assert_eq!(list.items[0].size, 1024);
        assert_eq!(list.items[0].content_type.as_deref(), Some("image/png"));
        assert!(list.items[0].updated.is_some());
        assert_eq!(list.items[1].size, 7);
        assert!(list.items[1].updated.is_none());
    }

    #[test]
    fn empty_bucket_has_no_items_field() {
        let list: ObjectList = serde_json::from_str(r#"{"kind":"storage#objects"}"#).unwrap();
        assert!(list.items.is_empty());
        assert!(list.next_page_token.is_none());
    }
}
