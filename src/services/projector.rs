//! Response projection: result structures → tagged tree → XML document.
//!
//! A [`Value`] mirrors the nested-tag shape of the S3 XML responses: a tree
//! maps element names to scalars, subtrees or lists (a list repeats its
//! element once per item). Documents must have exactly one root element.

use crate::models::{
    bucket::Bucket,
    listing::{ListEntry, ListResult},
    object::ObjectStat,
};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// XML namespace declared on every document root.
pub const S3_XMLNS: &str = "http://doc.s3.amazonaws.com/2006-03-01";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Int(u64),
    Bool(bool),
    Time(DateTime<Utc>),
    /// Ordered `element name → value` pairs.
    Tree(Vec<(&'static str, Value)>),
    /// Items rendered as repeated sibling elements of the enclosing name.
    List(Vec<Value>),
}

impl Value {
    pub fn tree<const N: usize>(fields: [(&'static str, Value); N]) -> Self {
        Value::Tree(fields.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as u64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Time(value)
    }
}

/// Render a full XML document.
///
/// # Panics
///
/// If `document` is not a single-keyed tree: callers build documents from
/// fixed shapes, so anything else is a bug.
pub fn render_document(document: &Value) -> String {
    let (name, body) = match document {
        Value::Tree(fields) if fields.len() == 1 => (fields[0].0, &fields[0].1),
        other => panic!("XML document must have exactly one root element, got {other:?}"),
    };

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = write!(out, "<{name} xmlns=\"{S3_XMLNS}\">");
    render_parts(body, &mut out);
    let _ = write!(out, "</{name}>");
    out
}

fn render_parts(value: &Value, out: &mut String) {
    match value {
        Value::Text(text) => out.push_str(&xml_escape(text)),
        Value::Int(number) => {
            let _ = write!(out, "{number}");
        }
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Time(time) => {
            let _ = write!(out, "{}", time.format(TIMESTAMP_FORMAT));
        }
        Value::Tree(fields) => {
            for (name, field) in fields {
                match field {
                    Value::List(items) => {
                        for item in items {
                            render_element(name, item, out);
                        }
                    }
                    other => render_element(name, other, out),
                }
            }
        }
        Value::List(_) => panic!("a list must be the value of a named element"),
    }
}

fn render_element(name: &str, value: &Value, out: &mut String) {
    let _ = write!(out, "<{name}>");
    render_parts(value, out);
    let _ = write!(out, "</{name}>");
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn list_buckets_document(buckets: &[Bucket]) -> Value {
    let buckets = buckets
        .iter()
        .map(|bucket| {
            Value::tree([
                ("Name", bucket.name.as_str().into()),
                ("CreationDate", bucket.creation_date.into()),
            ])
        })
        .collect();

    Value::tree([(
        "ListAllMyBucketsResult",
        Value::tree([("Buckets", Value::tree([("Bucket", Value::List(buckets))]))]),
    )])
}

fn list_entry(entry: &ListEntry) -> Value {
    let mut fields = vec![("Key", Value::from(entry.key.as_str()))];
    if let Some(last_modified) = entry.last_modified {
        fields.push(("LastModified", last_modified.into()));
    }
    if let Some(size) = entry.size {
        fields.push(("Size", size.into()));
    }
    Value::Tree(fields)
}

pub fn list_objects_document(result: &ListResult) -> Value {
    Value::tree([(
        "ListBucketResult",
        Value::tree([
            ("Name", result.bucket_name.as_str().into()),
            ("Prefix", result.prefix.as_str().into()),
            ("Marker", result.marker.as_str().into()),
            ("MaxKeys", result.max_keys.into()),
            ("IsTruncated", result.is_truncated.into()),
            (
                "Contents",
                Value::List(result.contents.iter().map(list_entry).collect()),
            ),
        ]),
    )])
}

pub fn error_document(code: &str, message: &str) -> Value {
    Value::tree([(
        "Error",
        Value::tree([("Code", code.into()), ("Message", message.into())]),
    )])
}

/// `Last-Modified` header value (IMF-fixdate) for a stat result.
pub fn last_modified_header(stat: &ObjectStat) -> String {
    stat.last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
