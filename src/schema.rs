use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::block_spec::BlockSpec;
use crate::error::Error;
use crate::loader::{Method, Shuffle};

/// Ordered column name → value mapping; one persisted table row.
pub type Row = Map<String, Value>;

/// Free-form run metadata, merged into every row of a run.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub bench_version: String,
    pub profile: String,
    pub seed: u64,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub unit: String,

    pub iters: u64,
    pub warmup_iters: u64,

    pub total_ns: u128,
    pub ns_per_iter: f64,

    pub bytes_processed: Option<u64>,
    pub throughput_bytes_per_s: Option<f64>,

    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    pub run: RunMeta,
    pub measurements: Vec<Measurement>,
}

/// Where and how a run happened; captured once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub sha: Option<String>,
    pub dirty: Option<bool>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub instance_id: Option<String>,
    pub instance_type: Option<String>,
}

/// Everything attached to the rows of one (method, block spec) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    /// When the epoch started.
    pub start: String,
    /// When the whole invocation started; shared by every row it writes.
    pub run_start: String,
    pub host: HostInfo,
    pub method: Method,
    pub batch_size: u64,
    pub block_spec: BlockSpec,
    pub shuffle: Shuffle,
    pub uri: String,
    pub tags: Vec<(String, String)>,
}

impl RunMetadata {
    /// Flatten into columns: fixed fields first, then tags in the order given.
    /// A tag named like a fixed field overrides it.
    pub fn to_metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("start".into(), Value::from(self.start.clone()));
        m.insert("run_start".into(), Value::from(self.run_start.clone()));
        m.insert("sha".into(), Value::from(self.host.sha.clone()));
        m.insert("dirty".into(), Value::from(self.host.dirty));
        m.insert("user".into(), Value::from(self.host.user.clone()));
        m.insert("hostname".into(), Value::from(self.host.hostname.clone()));
        m.insert("instance_id".into(), Value::from(self.host.instance_id.clone()));
        m.insert("instance_type".into(), Value::from(self.host.instance_type.clone()));
        m.insert("method".into(), Value::from(self.method.as_str()));
        m.insert("batch_size".into(), Value::from(self.batch_size));
        m.insert("chunk_size".into(), Value::from(self.block_spec.chunk_size()));
        m.insert(
            "chunks_per_block".into(),
            Value::from(self.block_spec.chunks_per_block()),
        );
        m.insert("block_size".into(), Value::from(self.block_spec.block_size()));
        m.insert("shuffle".into(), Value::from(self.shuffle.as_str()));
        m.insert("uri".into(), Value::from(self.uri.clone()));
        for (k, v) in &self.tags {
            m.insert(k.clone(), Value::from(v.clone()));
        }
        m
    }
}

/// Parse `<key>=<value>` tags; the value may itself contain `=`.
pub fn parse_tags<S: AsRef<str>>(tags: &[S]) -> Result<Vec<(String, String)>, Error> {
    tags.iter()
        .map(|t| {
            let t = t.as_ref();
            match t.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
                _ => Err(Error::InvalidTag(t.to_string())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RunMetadata {
        RunMetadata {
            start: "2024-01-01T00:00:05Z".to_string(),
            run_start: "2024-01-01T00:00:00Z".to_string(),
            host: HostInfo {
                sha: Some("abc123".to_string()),
                dirty: Some(false),
                ..Default::default()
            },
            method: Method::Csr,
            batch_size: 1024,
            block_spec: BlockSpec::make(Some(1024), Some(16), None).unwrap(),
            shuffle: Shuffle::Chunk,
            uri: "data/census-benchmark_2:7".to_string(),
            tags: vec![("note".to_string(), "a=b".to_string())],
        }
    }

    #[test]
    fn test_metadata_columns_in_order() {
        let m = meta().to_metadata();
        let keys: Vec<&str> = m.keys().map(String::as_str).collect();
        assert_eq!(&keys[..2], &["start", "run_start"]);
        assert_eq!(keys.last(), Some(&"note"));
        assert_eq!(m["block_size"], Value::from(16_384u64));
        assert_eq!(m["method"], Value::from("csr"));
        assert_eq!(m["user"], Value::Null);
        assert_eq!(m["dirty"], Value::from(false));
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags(&["a=1", "b = x=y"]).unwrap();
        assert_eq!(
            tags,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), " x=y".to_string())
            ]
        );
        assert!(matches!(parse_tags(&["novalue"]), Err(Error::InvalidTag(_))));
        assert!(matches!(parse_tags(&["=v"]), Err(Error::InvalidTag(_))));
    }
}
