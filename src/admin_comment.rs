//! Jobstats admin comments
//!
//! Sites running the jobstats plugin store per-node usage in the AdminComment
//! field as `JS1:` followed by base64 encoded, gzip compressed JSON. This
//! module decodes that payload into [`NodeEntry`] values.

use crate::models::{round1, GpuEntry, NodeEntry};
use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use flate2::read::GzDecoder;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;

/// Comments this short are placeholders such as `JS1:Short`.
const MIN_COMMENT_LENGTH: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct JobStats {
    /// Truthy when the job had GPUs; jobstats writes a bool but older
    /// versions wrote a count.
    #[serde(default)]
    pub gpus: serde_json::Value,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub nodes: OrderedMap<NodeStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStats {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub total_memory: f64,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub used_memory: f64,
    #[serde(default)]
    pub gpu_utilization: BTreeMap<String, f64>,
    #[serde(default)]
    pub gpu_used_memory: BTreeMap<String, f64>,
    pub gpu_total_memory: Option<OrderedMap<f64>>,
}

/// A JSON object kept in document order, the order jobstats lists nodes
/// and GPUs in.
#[derive(Debug, Clone)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> OrderedMap<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.0.iter().map(|(key, value)| (key, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    entries.push(entry);
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

impl JobStats {
    pub fn has_gpus(&self) -> bool {
        match &self.gpus {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(flag) => *flag,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
        }
    }

    /// Efficiency per node, in the order jobstats recorded them.
    pub fn node_entries(&self) -> Vec<NodeEntry> {
        self.nodes
            .iter()
            .map(|(name, node)| self.node_entry(name, node))
            .collect()
    }

    fn node_entry(&self, name: &str, node: &NodeStats) -> NodeEntry {
        let mem_eff = ratio(node.used_memory, node.total_memory);
        let cpu_eff = if node.cpus == 0.0 || self.total_time == 0.0 {
            0.0
        } else {
            node.total_time / node.cpus / self.total_time * 100.0
        };

        let gpus: Vec<GpuEntry> = match (&node.gpu_total_memory, self.has_gpus()) {
            (Some(totals), true) => totals
                .iter()
                .map(|(gpu, total)| GpuEntry {
                    name: gpu.clone(),
                    gpu_eff: node.gpu_utilization.get(gpu).copied().unwrap_or(0.0),
                    gpu_mem: round1(ratio(
                        node.gpu_used_memory.get(gpu).copied().unwrap_or(0.0),
                        *total,
                    )),
                })
                .collect(),
            _ => Vec::new(),
        };

        let (gpu_eff, gpu_mem) = if gpus.is_empty() {
            (None, None)
        } else {
            let count = gpus.len() as f64;
            (
                Some(round1(gpus.iter().map(|g| g.gpu_eff).sum::<f64>() / count)),
                Some(round1(gpus.iter().map(|g| g.gpu_mem).sum::<f64>() / count)),
            )
        };

        NodeEntry {
            name: name.to_string(),
            cpu_eff,
            mem_eff,
            gpu_eff,
            gpu_mem,
            gpus,
        }
    }
}

fn ratio(used: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        used / total * 100.0
    }
}

/// Decode an AdminComment.
///
/// Returns `Ok(None)` for comments that are not jobstats payloads (too short,
/// or not starting with `JS`), and an error for jobstats payloads that cannot
/// be decoded.
pub fn decode(comment: &str) -> Result<Option<JobStats>> {
    if comment.len() <= MIN_COMMENT_LENGTH || !comment.starts_with("JS") {
        return Ok(None);
    }

    let kind = comment.get(..3).unwrap_or(comment);
    if kind != "JS1" {
        anyhow::bail!("Unknown comment type {:?}", kind);
    }

    let payload = comment.get(4..).unwrap_or("");
    let compressed = Base64::decode_vec(payload)
        .map_err(|e| anyhow::anyhow!("Cannot decode comment {:?}: {}", comment, e))?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .with_context(|| format!("Cannot decompress comment {:?}", comment))?;

    let stats = serde_json::from_slice(&json)
        .with_context(|| format!("Cannot parse comment {:?}", comment))?;
    Ok(Some(stats))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Build a `JS1:` comment the way the jobstats plugin stores it.
    pub(crate) fn encode(json: &str) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        format!("JS1:{}", Base64::encode_string(&compressed))
    }

    #[test]
    fn test_decode_multi_node() {
        let comment = encode(
            r#"{"gpus": false, "total_time": 146, "nodes": {
                "tiger-h19c1n15": {"cpus": 20, "total_memory": 83886080000, "total_time": 542.0, "used_memory": 3790352384},
                "tiger-h26c2n13": {"cpus": 20, "total_memory": 83886080000, "total_time": 0.0, "used_memory": 0}
            }}"#,
        );
        let stats = decode(&comment).unwrap().unwrap();
        assert!(!stats.has_gpus());

        let nodes = stats.node_entries();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "tiger-h19c1n15");
        assert_eq!(round1(nodes[0].cpu_eff), 18.6);
        assert_eq!(round1(nodes[0].mem_eff), 4.5);
        assert_eq!(nodes[1].cpu_eff, 0.0);
        assert!(nodes[0].gpus.is_empty());
    }

    #[test]
    fn test_decode_gpu_node() {
        let comment = encode(
            r#"{"gpus": true, "total_time": 18203, "nodes": {"tiger-i23g14": {
                "cpus": 1, "gpu_total_memory": {"3": 17071734784},
                "gpu_used_memory": {"3": 17040539648}, "gpu_utilization": {"3": 29.4},
                "total_memory": 34359738368, "total_time": 17368.0, "used_memory": 3250450432}}}"#,
        );
        let nodes = decode(&comment).unwrap().unwrap().node_entries();
        assert_eq!(nodes[0].gpu_eff, Some(29.4));
        assert_eq!(nodes[0].gpu_mem, Some(99.8));
        assert_eq!(nodes[0].gpus[0].name, "3");
    }

    #[test]
    fn test_nodes_and_gpus_keep_payload_order() {
        let comment = encode(
            r#"{"gpus": true, "total_time": 100, "nodes": {
                "della-l08g2": {"cpus": 1, "total_time": 10, "total_memory": 100, "used_memory": 10,
                    "gpu_total_memory": {"2": 100, "0": 100},
                    "gpu_used_memory": {"2": 50, "0": 10}, "gpu_utilization": {"2": 90, "0": 30}},
                "della-i14g1": {"cpus": 1, "total_time": 20, "total_memory": 100, "used_memory": 20}
            }}"#,
        );
        let stats = decode(&comment).unwrap().unwrap();
        assert_eq!(stats.nodes.len(), 2);

        let nodes = stats.node_entries();
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["della-l08g2", "della-i14g1"]);
        let gpus: Vec<&str> = nodes[0].gpus.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(gpus, vec!["2", "0"]);
        assert_eq!(nodes[0].gpus[0].gpu_eff, 90.0);
        assert_eq!(nodes[0].gpus[1].gpu_mem, 10.0);
    }

    #[test]
    fn test_decode_ignores_non_jobstats_comments() {
        assert!(decode("JS1:Short").unwrap().is_none());
        assert!(decode(r#"'{"arrayTaskId":4294967294..."#).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_broken_payloads() {
        assert!(decode("JS1:asd&asdf-not-base64").is_err());
        assert!(decode("JS2:somethinglonger").is_err());
    }
}
