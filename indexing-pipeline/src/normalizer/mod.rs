pub mod classify;
pub mod markup;

use std::collections::{BTreeMap, HashSet};

use common::cms::CmsEntry;
use serde_json::Value;

use self::classify::{classify_field, is_non_content_value, is_system_field, FieldCategory};
use self::markup::{contains_markup, strip_markup};

/// Upper bound on embeddable text per document, in characters.
const MAX_TEXT_LEN: usize = 8_000;
/// Scalars longer than this stay out of metadata; they are content, not
/// filterable attributes.
const MAX_METADATA_VALUE_LEN: usize = 256;

/// The canonical indexable unit derived from one CMS entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDocument {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

/// Convert a schema-less CMS entry into `(text, metadata)`.
///
/// Returns `None` when no embeddable text survives extraction; that is a
/// skip signal, not an error, and callers report it distinctly from
/// failures.
pub fn normalize_entry(entry: &CmsEntry) -> Option<NormalizedDocument> {
    let mut collector = TextCollector::default();
    collect_text(&entry.content_type, None, &entry.fields, &mut collector);

    let text = collector.concatenate();
    if text.is_empty() {
        return None;
    }

    Some(NormalizedDocument {
        id: entry.id.clone(),
        text,
        metadata: build_metadata(entry),
    })
}

#[derive(Default)]
struct TextCollector {
    titles: Vec<String>,
    descriptions: Vec<String>,
    bodies: Vec<String>,
    seen: HashSet<String>,
}

impl TextCollector {
    fn push(&mut self, category: FieldCategory, text: String) {
        if !self.seen.insert(text.clone()) {
            return;
        }
        match category {
            FieldCategory::Title => self.titles.push(text),
            FieldCategory::Description => self.descriptions.push(text),
            FieldCategory::Body => self.bodies.push(text),
            FieldCategory::Excluded => {}
        }
    }

    /// Title-like first, descriptions second, remaining body text last,
    /// bounded in length.
    fn concatenate(self) -> String {
        let mut out = String::new();
        for part in self
            .titles
            .into_iter()
            .chain(self.descriptions)
            .chain(self.bodies)
        {
            if out.len() >= MAX_TEXT_LEN {
                break;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let remaining = MAX_TEXT_LEN - out.len();
            if part.len() > remaining {
                // Cut on a char boundary.
                let mut cut = remaining;
                while !part.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.push_str(&part[..cut]);
                break;
            }
            out.push_str(&part);
        }
        out.trim().to_owned()
    }
}

/// Recursive walk. Nested values inherit the name of the nearest named
/// field, so the items of `faq.questions[]` classify like `questions`.
fn collect_text(
    content_type: &str,
    field_name: Option<&str>,
    value: &Value,
    collector: &mut TextCollector,
) {
    match value {
        Value::String(s) => {
            let Some(name) = field_name else { return };
            let category = classify_field(content_type, name);
            if category == FieldCategory::Excluded {
                return;
            }
            let text = if contains_markup(s) {
                strip_markup(s)
            } else {
                s.trim().to_owned()
            };
            if text.is_empty() || is_non_content_value(&text) {
                return;
            }
            collector.push(category, text);
        }
        Value::Array(items) => {
            for item in items {
                collect_text(content_type, field_name, item, collector);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                if is_system_field(key) {
                    continue;
                }
                collect_text(content_type, Some(key), nested, collector);
            }
        }
        // Numbers, booleans, and nulls are metadata material, never text.
        _ => {}
    }
}

/// Scalar top-level fields that are not excluded, merged with the system
/// envelope. Nested structures do not become metadata.
fn build_metadata(entry: &CmsEntry) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();

    if let Value::Object(map) = &entry.fields {
        for (key, value) in map {
            if is_system_field(key) {
                continue;
            }
            if classify_field(&entry.content_type, key) == FieldCategory::Excluded {
                continue;
            }
            match value {
                Value::Number(_) | Value::Bool(_) => {
                    metadata.insert(key.clone(), value.clone());
                }
                Value::String(s) if s.len() <= MAX_METADATA_VALUE_LEN && !contains_markup(s) => {
                    metadata.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
    }

    metadata.insert("content_type".into(), Value::String(entry.content_type.clone()));
    metadata.insert("entry_id".into(), Value::String(entry.id.clone()));
    if let Some(locale) = &entry.locale {
        metadata.insert("locale".into(), Value::String(locale.clone()));
    }
    if let Some(version) = entry.version {
        metadata.insert("version".into(), Value::from(version));
    }
    if let Some(updated_at) = entry.updated_at {
        metadata.insert("updated_at".into(), Value::String(updated_at.to_rfc3339()));
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(content_type: &str, fields: Value) -> CmsEntry {
        CmsEntry {
            id: "entry-1".into(),
            content_type: content_type.into(),
            locale: Some("en-us".into()),
            version: Some(4),
            updated_at: None,
            fields,
        }
    }

    #[test]
    fn test_priority_order_title_description_body() {
        let doc = normalize_entry(&entry(
            "article",
            json!({
                "content": "The full body of the article goes here.",
                "title": "Alpine Hiking",
                "summary": "A primer on high-altitude trails.",
            }),
        ))
        .expect("document");

        assert_eq!(
            doc.text,
            "Alpine Hiking\nA primer on high-altitude trails.\nThe full body of the article goes here."
        );
    }

    #[test]
    fn test_markup_is_stripped() {
        let doc = normalize_entry(&entry(
            "article",
            json!({ "content": "<p>Hello <em>there</em></p>" }),
        ))
        .expect("document");
        assert_eq!(doc.text, "Hello there");
    }

    #[test]
    fn test_duplicate_text_collected_once() {
        let doc = normalize_entry(&entry(
            "article",
            json!({
                "title": "Alpine Hiking",
                "seo": { "title": "Alpine Hiking" },
                "content": "Trails and routes.",
            }),
        ))
        .expect("document");
        assert_eq!(doc.text.matches("Alpine Hiking").count(), 1);
    }

    #[test]
    fn test_non_content_values_and_system_fields_dropped() {
        let doc = normalize_entry(&entry(
            "article",
            json!({
                "title": "Alpine Hiking",
                "hero_image": "https://cdn.example.com/hero.png",
                "author_email": "alice@example.com",
                "reference": "blt0f9a44c1d2e3b4a5f6",
                "publish_details": { "environment": "some meaningful words here" },
            }),
        ))
        .expect("document");
        assert_eq!(doc.text, "Alpine Hiking");
    }

    #[test]
    fn test_empty_extraction_is_skip_not_error() {
        let result = normalize_entry(&entry(
            "article",
            json!({
                "hero_image": "https://cdn.example.com/hero.png",
                "count": 12,
            }),
        ));
        assert!(result.is_none());
    }

    #[test]
    fn test_nested_arrays_inherit_field_name() {
        let doc = normalize_entry(&entry(
            "faq",
            json!({
                "questions": [
                    { "question_text": "How high is base camp?" },
                    { "question_text": "Do I need a permit?" },
                ],
            }),
        ))
        .expect("document");
        assert!(doc.text.contains("How high is base camp?"));
        assert!(doc.text.contains("Do I need a permit?"));
    }

    #[test]
    fn test_metadata_scalars_and_system_envelope() {
        let doc = normalize_entry(&entry(
            "article",
            json!({
                "title": "Alpine Hiking",
                "reading_minutes": 7,
                "featured": true,
                "content": "<p>Long body</p>",
            }),
        ))
        .expect("document");

        assert_eq!(doc.metadata["reading_minutes"], json!(7));
        assert_eq!(doc.metadata["featured"], json!(true));
        assert_eq!(doc.metadata["content_type"], json!("article"));
        assert_eq!(doc.metadata["locale"], json!("en-us"));
        assert_eq!(doc.metadata["version"], json!(4));
        // Markup-bearing fields are text, not metadata.
        assert!(!doc.metadata.contains_key("content"));
    }

    #[test]
    fn test_text_length_is_bounded() {
        let doc = normalize_entry(&entry(
            "article",
            json!({ "content": "word ".repeat(5000) }),
        ))
        .expect("document");
        assert!(doc.text.len() <= MAX_TEXT_LEN);
    }
}
