use base64::Engine;
use url::Url;

/// Where a field's text lands in the concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Title,
    Description,
    Body,
    Excluded,
}

/// CMS envelope and administrative fields that never carry content.
const SYSTEM_FIELDS: &[&str] = &[
    "uid",
    "_version",
    "_in_progress",
    "_metadata",
    "acl",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
    "publish_details",
    "locale",
];

const TITLE_FIELDS: &[&str] = &["title", "name", "heading", "headline", "display_name"];

const DESCRIPTION_FIELDS: &[&str] = &[
    "description",
    "summary",
    "subtitle",
    "excerpt",
    "abstract",
    "intro",
    "teaser",
];

/// Minimum length for a string to count as content at all.
const MIN_CONTENT_LEN: usize = 3;
/// A single token at least this long with no whitespace reads as an
/// identifier rather than prose.
const IDENTIFIER_MIN_LEN: usize = 16;
/// Base64 payloads below this length are indistinguishable from words.
const BASE64_MIN_LEN: usize = 64;

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name.to_ascii_lowercase().as_str())
}

/// Generic category for a field name. Content-type-specific overrides take
/// precedence via [`override_for`].
pub fn classify_field(content_type: &str, name: &str) -> FieldCategory {
    if let Some(category) = override_for(content_type, name) {
        return category;
    }

    let lowered = name.to_ascii_lowercase();
    if is_system_field(&lowered) {
        return FieldCategory::Excluded;
    }
    if TITLE_FIELDS.contains(&lowered.as_str()) {
        return FieldCategory::Title;
    }
    if DESCRIPTION_FIELDS.contains(&lowered.as_str()) {
        return FieldCategory::Description;
    }
    FieldCategory::Body
}

/// Per-content-type field classifications. A pure lookup; absent entries
/// fall through to the generic heuristic.
fn override_for(content_type: &str, field: &str) -> Option<FieldCategory> {
    match (content_type, field) {
        // Articles keep a "url" slug field that is routing data, not prose.
        ("article", "url") => Some(FieldCategory::Excluded),
        ("article", "rich_text_body") => Some(FieldCategory::Body),
        // Product SKUs read like titles but identify, not describe.
        ("product", "sku") => Some(FieldCategory::Excluded),
        ("product", "product_name") => Some(FieldCategory::Title),
        _ => None,
    }
}

/// Value-level filter: strings that are structurally data rather than
/// prose are dropped regardless of their field name.
pub fn is_non_content_value(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.len() < MIN_CONTENT_LEN {
        return true;
    }

    // Everything below only applies to single tokens; text with spaces is
    // prose even when it embeds a URL or a number.
    if trimmed.contains(char::is_whitespace) {
        return false;
    }

    if looks_like_url(trimmed) || looks_like_email(trimmed) || looks_like_timestamp(trimmed) {
        return true;
    }

    looks_like_internal_id(trimmed) || looks_like_base64_blob(trimmed)
}

fn looks_like_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https" | "ftp" | "file" | "data"),
        Err(_) => false,
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
}

fn looks_like_timestamp(value: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
}

/// Opaque machine identifiers: one long token of id-safe characters with at
/// least one digit ("blt0f9a44c1d2...", UUIDs, hashes).
fn looks_like_internal_id(value: &str) -> bool {
    value.len() >= IDENTIFIER_MIN_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && value.chars().any(|c| c.is_ascii_digit())
}

fn looks_like_base64_blob(value: &str) -> bool {
    if value.len() < BASE64_MIN_LEN {
        return false;
    }
    base64::engine::general_purpose::STANDARD
        .decode(value.trim_end_matches('='))
        .is_ok()
        || base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(value.trim_end_matches('='))
            .is_ok()
}
