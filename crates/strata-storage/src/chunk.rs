//! Pure chunk generation and aggregation.
//!
//! Content is split into fixed-size named parts before upload and
//! reassembled in manifest order on download. No I/O here.

use bytes::Bytes;
use serde_json::Value;

/// Prefix of engine-generated chunk names. Anything else in a manifest is
/// treated as an end-user file upload.
pub const CHUNK_PREFIX: &str = "chunk_";

/// Name for the `index`-th chunk with the given extension.
pub fn chunk_name(index: usize, ext: &str) -> String {
  format!("{CHUNK_PREFIX}{index:06}.{ext}")
}

/// Whether a manifest entry looks like an engine-generated chunk.
pub fn is_chunk_name(name: &str) -> bool {
  name.starts_with(CHUNK_PREFIX)
}

/// Slice UTF-8 text into fixed-size byte windows named `chunk_NNNNNN.txt`.
///
/// Windows may split a code point; downloads concatenate all bytes before
/// decoding, so the boundary never surfaces.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<(String, Bytes)> {
  windows(text.as_bytes(), chunk_size, "txt")
}

/// Slice raw bytes into fixed-size windows named `chunk_NNNNNN.bin`.
pub fn chunk_binary(data: &[u8], chunk_size: usize) -> Vec<(String, Bytes)> {
  windows(data, chunk_size, "bin")
}

/// Serialize structured content to JSON-Lines parts named
/// `chunk_NNNNNN.jsonl`, windowed on line boundaries.
///
/// List content drops null elements; any other value becomes a single line.
pub fn chunk_structured(content: &Value, chunk_size: usize) -> Vec<(String, Bytes)> {
  let lines: Vec<String> = match content {
    Value::Array(items) => items
      .iter()
      .filter(|item| !item.is_null())
      .map(|item| item.to_string())
      .collect(),
    Value::Null => Vec::new(),
    other => vec![other.to_string()],
  };

  let mut parts = Vec::new();
  let mut current = String::new();
  for line in lines {
    if !current.is_empty() && current.len() + line.len() + 1 > chunk_size {
      parts.push((chunk_name(parts.len(), "jsonl"), Bytes::from(current)));
      current = String::new();
    }
    current.push_str(&line);
    current.push('\n');
  }
  if !current.is_empty() {
    parts.push((chunk_name(parts.len(), "jsonl"), Bytes::from(current)));
  }
  parts
}

/// Parse concatenated JSON-Lines parts back into an ordered list of values.
pub fn aggregate_jsonl<I>(parts: I) -> Result<Vec<Value>, serde_json::Error>
where
  I: IntoIterator<Item = Bytes>,
{
  let mut buffer = Vec::new();
  for part in parts {
    buffer.extend_from_slice(&part);
  }
  String::from_utf8_lossy(&buffer)
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(serde_json::from_str)
    .collect()
}

fn windows(data: &[u8], chunk_size: usize, ext: &str) -> Vec<(String, Bytes)> {
  let chunk_size = chunk_size.max(1);
  data
    .chunks(chunk_size)
    .enumerate()
    .map(|(index, window)| (chunk_name(index, ext), Bytes::copy_from_slice(window)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn chunk_names_are_zero_padded() {
    assert_eq!(chunk_name(0, "txt"), "chunk_000000.txt");
    assert_eq!(chunk_name(12, "bin"), "chunk_000012.bin");
    assert!(is_chunk_name("chunk_000000.jsonl"));
    assert!(!is_chunk_name("report.pdf"));
  }

  #[test]
  fn text_windows_are_fixed_size() {
    let parts = chunk_text("abcdefghij", 4);
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].1.as_ref(), b"abcd");
    assert_eq!(parts[2].1.as_ref(), b"ij");
  }

  #[test]
  fn empty_content_yields_no_chunks() {
    assert!(chunk_text("", 4).is_empty());
    assert!(chunk_binary(&[], 4).is_empty());
    assert!(chunk_structured(&json!([]), 4).is_empty());
  }

  #[test]
  fn structured_filters_nulls_and_round_trips() {
    let content = json!([{"a": 1}, null, {"b": 2}, null, {"c": 3}]);
    let parts = chunk_structured(&content, 16);
    assert!(parts.len() > 1);

    let values = aggregate_jsonl(parts.into_iter().map(|(_, b)| b)).unwrap();
    assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]);
  }

  #[test]
  fn structured_map_becomes_single_line() {
    let parts = chunk_structured(&json!({"k": "v"}), 1024);
    assert_eq!(parts.len(), 1);
    let values = aggregate_jsonl(parts.into_iter().map(|(_, b)| b)).unwrap();
    assert_eq!(values, vec![json!({"k": "v"})]);
  }

  #[test]
  fn oversized_line_still_gets_a_chunk() {
    let content = json!([{"big": "x".repeat(100)}]);
    let parts = chunk_structured(&content, 8);
    assert_eq!(parts.len(), 1);
  }
}
