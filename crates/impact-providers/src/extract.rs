//! Payload extraction helpers shared by providers.
//!
//! JSON goes through `serde_json`; the XML the eutils services return is
//! flat enough that tag-level regex extraction covers what we read.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};

/// Parse a JSON body, classifying failures as malformed content.
pub fn parse_json(provider: &str, body: &str) -> ProviderResult<Value> {
    serde_json::from_str(body).map_err(|e| ProviderError::malformed(provider, e.to_string()))
}

/// Follow `keys` through nested objects.
pub fn json_path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |v, key| v.get(*key))
}

/// Pull named fields out of a JSON document. Missing and null fields are omitted.
pub fn extract_from_json(value: &Value, fields: &[(&str, &[&str])]) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter_map(|(name, keys)| {
            json_path(value, keys)
                .filter(|v| !v.is_null())
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect()
}

/// Text content of every `<tag>` element, entity-decoded.
pub fn xml_elements(body: &str, tag: &str) -> Vec<String> {
    let pattern = format!(r"(?s)<{t}(?:\s[^>]*)?>(.*?)</{t}>", t = regex::escape(tag));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(body)
        .map(|c| decode_entities(c[1].trim()))
        .collect()
}

/// Text content of the first `<tag>` element.
pub fn xml_first(body: &str, tag: &str) -> Option<String> {
    xml_elements(body, tag).into_iter().next()
}

/// Text content of `<tag>` elements carrying `attr="value"`.
pub fn xml_elements_with_attr(body: &str, tag: &str, attr: &str, value: &str) -> Vec<String> {
    let pattern = format!(
        r#"(?s)<{t}\s[^>]*{a}="{v}"[^>]*>(.*?)</{t}>"#,
        t = regex::escape(tag),
        a = regex::escape(attr),
        v = regex::escape(value),
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(body)
        .map(|c| decode_entities(c[1].trim()))
        .collect()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_fields_and_skips_missing() {
        let doc = json!({"name": "cdk", "owner": {"login": "egonw"}, "description": null});
        let out = extract_from_json(
            &doc,
            &[
                ("title", &["name"]),
                ("owner", &["owner", "login"]),
                ("description", &["description"]),
                ("url", &["svn_url"]),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out["owner"], json!("egonw"));
    }

    #[test]
    fn malformed_json_is_classified() {
        let err = parse_json("github", "<html>").unwrap_err();
        assert!(matches!(err, ProviderError::ContentMalformed { .. }));
    }

    #[test]
    fn xml_tags_with_and_without_attributes() {
        let body = r#"<IdList><Id>1</Id><Id>2</Id></IdList>
<ArticleIdList><ArticleId IdType="pubmed">99</ArticleId><ArticleId IdType="doi">10.1/a&amp;b</ArticleId></ArticleIdList>"#;
        assert_eq!(xml_elements(body, "Id"), vec!["1", "2"]);
        assert_eq!(
            xml_elements_with_attr(body, "ArticleId", "IdType", "doi"),
            vec!["10.1/a&b"]
        );
        assert_eq!(xml_first(body, "Missing"), None);
    }
}
