//! Citation normalization.
//!
//! Upstream reports grounding sources in several shapes. Each shape is a
//! [`CitationEncoding`]; [`extract`] tries them in priority order and the first
//! one that yields a non-empty list wins. Shapes are never merged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label used for knowledge-base references without a URL.
pub const KNOWLEDGE_BASE_LABEL: &str = "Knowledge Base";
/// Label used for vector chunks found in the response content.
pub const VECTOR_DB_LABEL: &str = "Vector Database";

const MAX_EXCERPT_CHARS: usize = 300;
const MAX_SCAN_DEPTH: usize = 6;

/// Objects with at most one level of nesting, e.g. a chunk with `meta_data`.
static EMBEDDED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid embedded object pattern")
});

/// A normalized grounding source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Raw material citations can be derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationInput<'a> {
    /// The event's `citations` field.
    pub citations: Option<&'a Value>,
    /// `extra_data.references`.
    pub references: Option<&'a [Value]>,
    /// Response content, scanned as a last resort.
    pub content: Option<&'a Value>,
}

/// Result of normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedCitations {
    pub citations: Vec<Citation>,
    /// Number of citations; may exceed `citations.len()` for count-only input.
    pub count: usize,
}

/// The upstream citation shapes, in priority order.
#[derive(Debug, Clone, Copy)]
pub enum CitationEncoding<'a> {
    /// `citations: [...]`
    List(&'a [Value]),
    /// `citations: { sources: [...] }`
    Sources(&'a [Value]),
    /// `citations: { count: n }`
    CountOnly(usize),
    /// `extra_data.references`
    References(&'a [Value]),
    /// Vector-chunk-shaped data inside the content.
    EmbeddedChunks(&'a Value),
}

impl<'a> CitationEncoding<'a> {
    /// Every encoding present in `input`, highest priority first.
    #[must_use]
    pub fn detect(input: &CitationInput<'a>) -> Vec<Self> {
        let mut found = Vec::new();
        match input.citations {
            Some(Value::Array(items)) => found.push(Self::List(items)),
            Some(Value::Object(obj)) => {
                if let Some(Value::Array(sources)) = obj.get("sources") {
                    found.push(Self::Sources(sources));
                } else if let Some(count) = obj.get("count").and_then(Value::as_u64) {
                    found.push(Self::CountOnly(usize::try_from(count).unwrap_or(usize::MAX)));
                }
            }
            _ => {}
        }
        if let Some(refs) = input.references {
            found.push(Self::References(refs));
        }
        if let Some(content) = input.content {
            found.push(Self::EmbeddedChunks(content));
        }
        found
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Sources(_) => "sources",
            Self::CountOnly(_) => "count_only",
            Self::References(_) => "references",
            Self::EmbeddedChunks(_) => "embedded_chunks",
        }
    }

    /// Normalize this encoding. `None` when it produces no citations.
    #[must_use]
    pub fn normalize(&self) -> Option<Vec<Citation>> {
        let list = match self {
            Self::List(items) | Self::Sources(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, v)| to_citation(i, v, KNOWLEDGE_BASE_LABEL))
                .collect(),
            Self::CountOnly(_) => Vec::new(),
            Self::References(refs) => flatten_references(refs)
                .into_iter()
                .enumerate()
                .filter_map(|(i, v)| to_citation(i, v, KNOWLEDGE_BASE_LABEL))
                .collect(),
            Self::EmbeddedChunks(content) => scan_chunks(content)
                .iter()
                .enumerate()
                .filter_map(|(i, v)| to_citation(i, v, VECTOR_DB_LABEL))
                .collect(),
        };
        (!list.is_empty()).then_some(list)
    }
}

/// Derive citations from `input`. Pure; the same input always gives the same list.
#[must_use]
pub fn extract(input: &CitationInput<'_>) -> NormalizedCitations {
    let mut count_hint = None;
    for encoding in CitationEncoding::detect(input) {
        if let CitationEncoding::CountOnly(n) = encoding {
            count_hint.get_or_insert(n);
            continue;
        }
        if let Some(citations) = encoding.normalize() {
            tracing::debug!(
                encoding = encoding.kind(),
                count = citations.len(),
                "Citations normalized"
            );
            return NormalizedCitations {
                count: citations.len(),
                citations,
            };
        }
    }
    NormalizedCitations {
        citations: Vec::new(),
        count: count_hint.unwrap_or(0),
    }
}

/// Hostname of `url` without a leading `www.`.
#[must_use]
pub fn hostname(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}

/// agno groups documents per query: `[{query, references: [doc, ...]}]`.
/// Plain document lists are accepted as well.
fn flatten_references(refs: &[Value]) -> Vec<&Value> {
    refs.iter()
        .flat_map(|entry| match entry.get("references") {
            Some(Value::Array(docs)) => docs.iter().collect::<Vec<_>>(),
            _ => vec![entry],
        })
        .collect()
}

fn looks_like_chunk(obj: &serde_json::Map<String, Value>) -> bool {
    let has_text = ["content", "text", "chunk"]
        .iter()
        .any(|k| obj.get(*k).is_some_and(Value::is_string));
    let has_vector_meta = obj.get("meta_data").is_some_and(Value::is_object)
        || obj.get("metadata").is_some_and(Value::is_object)
        || ["score", "distance", "reranking_score", "similarity"]
            .iter()
            .any(|k| obj.get(*k).is_some_and(Value::is_number));
    has_text && has_vector_meta
}

fn scan_chunks(content: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    match content {
        Value::String(text) => {
            // Content may be a JSON document itself, or prose with objects inside.
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                if parsed.is_object() || parsed.is_array() {
                    collect_chunks(&parsed, 0, &mut out);
                    return out;
                }
            }
            for m in EMBEDDED_OBJECT.find_iter(text) {
                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(m.as_str()) {
                    if looks_like_chunk(&obj) {
                        out.push(Value::Object(obj));
                    }
                }
            }
        }
        other => collect_chunks(other, 0, &mut out),
    }
    out
}

fn collect_chunks(value: &Value, depth: usize, out: &mut Vec<Value>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    match value {
        Value::Object(obj) if looks_like_chunk(obj) => out.push(value.clone()),
        Value::Object(obj) => {
            for v in obj.values() {
                collect_chunks(v, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_chunks(v, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn str_field<'v>(obj: &'v serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'v str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn truncate_excerpt(text: &str) -> String {
    if text.chars().count() <= MAX_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

fn to_citation(index: usize, value: &Value, default_source: &str) -> Option<Citation> {
    let fallback_id = format!("citation-{}", index + 1);
    let fallback_title = format!("Sumber {}", index + 1);

    let obj = match value {
        Value::Object(obj) => obj,
        Value::String(s) if !s.trim().is_empty() => {
            let s = s.trim();
            let is_url = s.starts_with("http://") || s.starts_with("https://");
            return Some(Citation {
                id: fallback_id,
                title: if is_url { hostname(s).unwrap_or_else(|| s.to_string()) } else { s.to_string() },
                url: is_url.then(|| s.to_string()),
                source: Some(
                    is_url
                        .then(|| hostname(s))
                        .flatten()
                        .unwrap_or_else(|| default_source.to_string()),
                ),
                excerpt: None,
                metadata: None,
            });
        }
        _ => return None,
    };

    let meta = obj
        .get("meta_data")
        .or_else(|| obj.get("metadata"))
        .filter(|m| m.is_object());
    let meta_obj = meta.and_then(Value::as_object);

    let url = str_field(obj, &["url", "uri", "link", "href"])
        .or_else(|| meta_obj.and_then(|m| str_field(m, &["url", "uri", "link"])))
        .map(ToString::to_string);

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => fallback_id,
    };

    let title = str_field(obj, &["title", "name", "document_name"])
        .or_else(|| meta_obj.and_then(|m| str_field(m, &["title", "name", "file_name", "source"])))
        .map_or(fallback_title, ToString::to_string);

    let excerpt = str_field(obj, &["excerpt", "snippet", "content", "text", "chunk"])
        .map(truncate_excerpt);

    let source = url
        .as_deref()
        .and_then(hostname)
        .or_else(|| {
            str_field(obj, &["source"])
                .filter(|s| !s.starts_with("http"))
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| default_source.to_string());

    Some(Citation {
        id,
        title,
        url,
        source: Some(source),
        excerpt,
        metadata: meta.cloned(),
    })
}
