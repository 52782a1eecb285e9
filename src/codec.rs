// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Resource codec - splits multi-document YAML and maps documents to resources
//!
//! Documents are located by scanning for `---` start markers and `...` end
//! markers at the beginning of a line. Each document keeps the byte range it
//! occupies in its file so that edits can be spliced back in place.

use crate::error::{EngineError, Result};
use crate::types::{PathSegment, Resource, TextRange, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::ops::Range;

/// A document located in a file, before parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument<'a> {
    /// Position among the non-empty documents of the file
    pub index: usize,
    /// Document text
    pub text: &'a str,
    /// Byte range in the file
    pub range: TextRange,
}

/// A document that parsed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Position among the non-empty documents of the file
    pub index: usize,
    /// Document text
    pub text: String,
    /// Parsed content
    pub content: Value,
    /// Byte range in the file
    pub range: TextRange,
}

/// A document that was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    /// Position among the non-empty documents of the file
    pub index: usize,
    /// Byte range in the file
    pub range: TextRange,
    /// Why it was skipped
    pub message: String,
}

/// Result of parsing one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    /// Documents that parsed
    pub documents: Vec<ParsedDocument>,
    /// Documents that did not
    pub failures: Vec<ParseFailure>,
}

fn line_body(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn is_document_start(line: &str) -> bool {
    let body = line_body(line);
    body == "---" || body.starts_with("--- ") || body.starts_with("---\t")
}

fn is_document_end(line: &str) -> bool {
    line_body(line).trim_end() == "..."
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with('#')
    })
}

fn push_document<'a>(text: &'a str, start: usize, end: usize, docs: &mut Vec<RawDocument<'a>>) {
    let slice = &text[start..end];
    if !is_blank(slice) {
        docs.push(RawDocument {
            index: docs.len(),
            text: slice,
            range: TextRange {
                start,
                length: end - start,
            },
        });
    }
}

/// Split a file into its non-empty documents
#[must_use]
pub fn split_documents(text: &str) -> Vec<RawDocument<'_>> {
    let mut docs = Vec::new();
    let mut doc_start = Some(0);
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if is_document_start(line) {
            if let Some(start) = doc_start {
                push_document(text, start, line_start, &mut docs);
            }
            doc_start = Some(offset);
        } else if is_document_end(line) {
            if let Some(start) = doc_start.take() {
                push_document(text, start, line_start, &mut docs);
            }
        }
    }
    if let Some(start) = doc_start {
        push_document(text, start, text.len(), &mut docs);
    }
    docs
}

/// Parse every document of a file
///
/// A malformed document is reported in `failures` and does not stop its
/// siblings from parsing.
#[must_use]
pub fn parse(text: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    for raw in split_documents(text) {
        match serde_yaml::from_str::<Value>(raw.text) {
            Ok(Value::Null) => {}
            Ok(content) => parsed.documents.push(ParsedDocument {
                index: raw.index,
                text: raw.text.to_string(),
                content,
                range: raw.range,
            }),
            Err(err) => parsed.failures.push(ParseFailure {
                index: raw.index,
                range: raw.range,
                message: err.to_string(),
            }),
        }
    }
    parsed
}

/// Serialize a single document
pub fn serialize(content: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(content)?)
}

/// Identity key correlating resources across overlays
///
/// A missing namespace is normalized to `default`. Callers pass `Some("")`
/// for cluster-scoped kinds so that any stray namespace is ignored.
#[must_use]
pub fn identifier_for(kind: &str, name: &str, namespace: Option<&str>) -> String {
    format!("{name}#{kind}#{}", namespace.unwrap_or(DEFAULT_NAMESPACE))
}

/// Build a resource from parsed content
pub fn resource_from_content(
    content: Value,
    text: String,
    file_path: &str,
    index: usize,
    range: Option<TextRange>,
) -> Result<Resource> {
    let kind = content
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| EngineError::Parse {
            context: format!("document {index} of {file_path}"),
            message: "not a Kubernetes object (missing kind)".into(),
        })?
        .to_string();
    let api_version = content
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = content.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(scalar_to_string)
        .unwrap_or_else(|| file_name(file_path).to_string());
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Resource {
        id: Resource::generate_id(file_path, index, &kind, &name, namespace.as_deref()),
        kind,
        api_version,
        name,
        namespace,
        file_path: file_path.to_string(),
        text,
        content,
        range,
        refs: Vec::new(),
    })
}

/// Extract every resource from a file's text
#[must_use]
pub fn extract_resources(text: &str, file_path: &str) -> (Vec<Resource>, Vec<ParseFailure>) {
    let parsed = parse(text);
    let mut failures = parsed.failures;
    let mut resources = Vec::with_capacity(parsed.documents.len());
    for doc in parsed.documents {
        let (index, range) = (doc.index, doc.range);
        match resource_from_content(doc.content, doc.text, file_path, index, Some(range)) {
            Ok(resource) => resources.push(resource),
            Err(err) => failures.push(ParseFailure {
                index,
                range,
                message: err.to_string(),
            }),
        }
    }
    (resources, failures)
}

/// Parse text that must hold exactly one document
pub fn parse_single(text: &str, context: &str) -> Result<Value> {
    let mut parsed = parse(text);
    if let Some(failure) = parsed.failures.pop() {
        return Err(EngineError::Parse {
            context: context.to_string(),
            message: failure.message,
        });
    }
    match parsed.documents.len() {
        1 => Ok(parsed.documents.remove(0).content),
        0 => Err(EngineError::InvalidEdit(format!("{context}: no document"))),
        n => Err(EngineError::InvalidEdit(format!(
            "{context}: expected one document, found {n}"
        ))),
    }
}

fn file_name(file_path: &str) -> &str {
    file_path.rsplit('/').next().unwrap_or(file_path)
}

// =============================================================================
// Value helpers
// =============================================================================

/// Render a scalar as a string
#[must_use]
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a mapping of scalars as strings
#[must_use]
pub fn string_map(value: &Value) -> Option<BTreeMap<String, String>> {
    let mapping = value.as_mapping()?;
    let mut out = BTreeMap::new();
    for (k, v) in mapping {
        out.insert(scalar_to_string(k)?, scalar_to_string(v)?);
    }
    Some(out)
}

/// Follow a concrete path through content
#[must_use]
pub fn value_at_path<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, segment| match segment {
        PathSegment::Key(key) => node.get(key.as_str()),
        PathSegment::Index(i) => node.get(*i),
    })
}

/// Replace the value at a concrete path; returns false when the path is absent
pub fn set_at_path(value: &mut Value, path: &[PathSegment], new: Value) -> bool {
    let mut node = value;
    for segment in path {
        let next = match segment {
            PathSegment::Key(key) => node.get_mut(key.as_str()),
            PathSegment::Index(i) => node.get_mut(*i),
        };
        match next {
            Some(n) => node = n,
            None => return false,
        }
    }
    *node = new;
    true
}

// =============================================================================
// Byte layout edits
// =============================================================================

/// Make edited document text end with a newline
#[must_use]
pub fn normalize_document_text(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

/// Replace the bytes covered by `range`
#[must_use]
pub fn replace_range(file_text: &str, range: TextRange, new_text: &str) -> String {
    let mut out = String::with_capacity(file_text.len() + new_text.len());
    out.push_str(&file_text[..range.start]);
    out.push_str(new_text);
    out.push_str(&file_text[range.end()..]);
    out
}

/// Bytes to delete when a document is removed from its file
///
/// Takes the separator line before the document with it, or the one after it
/// when the document comes first.
#[must_use]
pub fn removal_span(file_text: &str, range: TextRange) -> Range<usize> {
    if let Some(before) = file_text[..range.start].strip_suffix('\n') {
        let sep_start = before.rfind('\n').map_or(0, |i| i + 1);
        if is_document_start(&file_text[sep_start..range.start]) {
            return sep_start..range.end();
        }
    }
    let rest = &file_text[range.end()..];
    if let Some(line) = rest.split_inclusive('\n').next() {
        if is_document_start(line) {
            return range.start..range.end() + line.len();
        }
    }
    range.start..range.end()
}

/// Append a document to a file, returning the new text and the document's range
#[must_use]
pub fn append_document(file_text: &str, doc_text: &str) -> (String, TextRange) {
    let doc_text = normalize_document_text(doc_text);
    if is_blank(file_text) {
        let range = TextRange {
            start: 0,
            length: doc_text.len(),
        };
        return (doc_text, range);
    }
    let mut out = file_text.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    let range = TextRange {
        start: out.len(),
        length: doc_text.len(),
    };
    out.push_str(&doc_text);
    (out, range)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";

    #[test]
    fn test_split_records_ranges() {
        let docs = split_documents(MULTI);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].range.start, 0);
        assert_eq!(&MULTI[docs[1].range.start..docs[1].range.end()], docs[1].text);
        assert!(docs[1].text.starts_with("apiVersion"));
    }

    #[test]
    fn test_split_skips_empty_documents() {
        let text = "---\n# only a comment\n---\nkind: Secret\nmetadata:\n  name: s\n...\n";
        let docs = split_documents(text);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].index, 0);
        assert!(docs[0].text.contains("Secret"));
    }

    #[test]
    fn test_malformed_document_does_not_block_siblings() {
        let text = "kind: ConfigMap\nmetadata:\n  name: ok\n---\nkind: [unclosed\n---\nkind: Secret\nmetadata:\n  name: s\n";
        let (resources, failures) = extract_resources(text, "mixed.yaml");
        assert_eq!(resources.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
    }

    #[test]
    fn test_missing_kind_is_a_failure() {
        let (resources, failures) = extract_resources("foo: bar\n", "x.yaml");
        assert!(resources.is_empty());
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_name_falls_back_to_file_name() {
        let (resources, _) = extract_resources(
            "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\n",
            "overlays/dev/kustomization.yaml",
        );
        assert_eq!(resources[0].name, "kustomization.yaml");
    }

    #[test]
    fn test_identifier_normalizes_namespace() {
        assert_eq!(identifier_for("Service", "web", None), "web#Service#default");
        assert_eq!(
            identifier_for("Service", "web", None),
            identifier_for("Service", "web", Some("default"))
        );
        assert_eq!(identifier_for("ClusterRole", "admin", Some("")), "admin#ClusterRole#");
    }

    #[test]
    fn test_removal_span_takes_preceding_separator() {
        let docs = split_documents(MULTI);
        let span = removal_span(MULTI, docs[1].range);
        let remaining = format!("{}{}", &MULTI[..span.start], &MULTI[span.end..]);
        assert_eq!(split_documents(&remaining).len(), 1);
        assert!(remaining.contains("name: a"));
        assert!(!remaining.contains("---"));
    }

    #[test]
    fn test_removal_span_first_document_takes_following_separator() {
        let docs = split_documents(MULTI);
        let span = removal_span(MULTI, docs[0].range);
        let remaining = format!("{}{}", &MULTI[..span.start], &MULTI[span.end..]);
        assert!(remaining.starts_with("apiVersion"));
        assert!(remaining.contains("name: b"));
        assert!(!remaining.contains("---"));
    }

    #[test]
    fn test_removal_span_after_multibyte_text() {
        let text = "é\nkind: B\n";
        let range = TextRange { start: 3, length: 8 };
        assert_eq!(removal_span(text, range), 3..11);

        // Not preceded by a newline: only the document itself goes
        let text = "ékind: B\n";
        let range = TextRange { start: 2, length: 8 };
        assert_eq!(removal_span(text, range), 2..10);
    }

    #[test]
    fn test_append_document_to_empty_and_existing() {
        let (text, range) = append_document("", "kind: A");
        assert_eq!(text, "kind: A\n");
        assert_eq!(range.start, 0);

        let (text, range) = append_document("kind: A\n", "kind: B\n");
        assert_eq!(text, "kind: A\n---\nkind: B\n");
        assert_eq!(&text[range.start..range.end()], "kind: B\n");
    }

    #[test]
    fn test_set_at_path() {
        let mut value: Value = serde_yaml::from_str("spec:\n  items:\n    - name: a\n").unwrap();
        let path = vec![
            PathSegment::Key("spec".into()),
            PathSegment::Key("items".into()),
            PathSegment::Index(0),
            PathSegment::Key("name".into()),
        ];
        assert!(set_at_path(&mut value, &path, Value::String("b".into())));
        assert_eq!(value_at_path(&value, &path).and_then(Value::as_str), Some("b"));
        assert!(!set_at_path(&mut value, &[PathSegment::Key("nope".into()), PathSegment::Key("x".into())], Value::Null));
    }

    #[test]
    fn test_parse_single_rejects_multiple_documents() {
        assert!(parse_single("kind: A\n---\nkind: B\n", "edit").is_err());
        assert!(parse_single("kind: A\n", "edit").is_ok());
    }
}
