//! Hashing - SHA-256 for Archive Entries and Build Manifests
//!
//! Provides deterministic, reproducible digests so two builds of the same tree
//! can be compared without unpacking the archives.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Compute the hash of a build manifest
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Pass-through writer that digests and counts everything written to it
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Byte count and hex digest of what went through
    pub fn finish(self) -> (u64, String) {
        (self.written, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}, "m": [{"k": 1, "c": 2}]});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":{"b":3,"y":2},"m":[{"c":2,"k":1}],"z":1}"#);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_manifest_hash_ignores_key_order() {
        let a = json!({"theme_name": "dark", "entries": []});
        let b = json!({"entries": [], "theme_name": "dark"});
        assert_eq!(
            compute_manifest_hash(&a).unwrap(),
            compute_manifest_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_hashing_writer_matches_direct_hash() {
        let mut sink = Vec::new();
        let mut writer = HashingWriter::new(&mut sink);
        writer.write_all(b"set tcp.size [300 100]\n").unwrap();
        writer.write_all(b"; done\n").unwrap();
        let (size, digest) = writer.finish();

        assert_eq!(size, sink.len() as u64);
        assert_eq!(digest, sha256_hex(&sink));
    }
}
