use cli_log::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fs, io};
use thiserror::Error;

/// Name the kubelet CPU manager uses for its state file.
pub const CPU_MANAGER_STATE_FILE: &str = "cpu_manager_state";

// Same limit the kubelet file store puts on checkpoint keys
const MAX_NAME_LEN: usize = 250;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid checkpoint name {0:?}")]
    InvalidName(String),

    #[error("checkpoint {0:?} not found")]
    NotFound(String),

    #[error("failed to read checkpoint {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode checkpoint")]
    Decode(#[from] serde_json::Error),

    #[error("unsupported checkpoint layout: {0}")]
    UnsupportedFormat(String),

    #[error("checkpoint is corrupted: stored checksum {expected}, computed {actual}")]
    Corrupt { expected: u64, actual: u32 },
}

/// Anything that can hand back a point-in-time checkpoint record by name.
pub trait CheckpointSource {
    fn load(&self, name: &str) -> Result<CheckpointRecord, LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointVersion {
    /// kubelet <= 1.17: container id -> cpuset
    V1,
    /// kubelet >= 1.18: pod uid -> container name -> cpuset
    V2,
}

impl CheckpointVersion {
    fn struct_name(self) -> &'static str {
        match self {
            CheckpointVersion::V1 => "CPUManagerCheckpointV1",
            CheckpointVersion::V2 => "CPUManagerCheckpointV2",
        }
    }
}

impl fmt::Display for CheckpointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointVersion::V1 => f.write_str("v1"),
            CheckpointVersion::V2 => f.write_str("v2"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckpointFormat {
    #[default]
    Auto,
    V1,
    V2,
}

impl CheckpointFormat {
    /// A record without entries fits every layout.
    pub fn accepts(self, record: &CheckpointRecord) -> bool {
        match self {
            CheckpointFormat::Auto => true,
            CheckpointFormat::V1 => record.is_empty() || record.version == CheckpointVersion::V1,
            CheckpointFormat::V2 => record.is_empty() || record.version == CheckpointVersion::V2,
        }
    }
}

impl FromStr for CheckpointFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(CheckpointFormat::Auto),
            "v1" => Ok(CheckpointFormat::V1),
            "v2" => Ok(CheckpointFormat::V2),
            other => Err(format!(
                "unknown checkpoint format {:?} (expected auto, v1 or v2)",
                other
            )),
        }
    }
}

/// One container's cpuset assignment. `pod` is empty for v1 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub pod: &'a str,
    pub container: &'a str,
    pub cpuset: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub policy_name: String,
    pub default_cpu_set: String,
    pub version: CheckpointVersion,
    // v1 entries live under the empty pod id
    entries: BTreeMap<String, BTreeMap<String, String>>,
    checksum: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCheckpoint {
    #[serde(default)]
    policy_name: String,
    #[serde(default)]
    default_cpu_set: String,
    #[serde(default)]
    entries: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    checksum: u64,
}

impl CheckpointRecord {
    /// Empty v2 record without a checksum.
    pub fn new(policy_name: impl Into<String>, default_cpu_set: impl Into<String>) -> Self {
        CheckpointRecord {
            policy_name: policy_name.into(),
            default_cpu_set: default_cpu_set.into(),
            version: CheckpointVersion::V2,
            entries: BTreeMap::new(),
            checksum: 0,
        }
    }

    pub fn with_entry(
        mut self,
        pod: impl Into<String>,
        container: impl Into<String>,
        cpuset: impl Into<String>,
    ) -> Self {
        self.entries
            .entry(pod.into())
            .or_default()
            .insert(container.into(), cpuset.into());
        self
    }

    /// Decodes the kubelet JSON document, detecting the entries layout and
    /// verifying the checksum when one is stored.
    pub fn decode(data: &[u8]) -> Result<CheckpointRecord, LoadError> {
        let raw: RawCheckpoint = serde_json::from_slice(data)?;
        let entries = raw.entries.unwrap_or_default();

        let (candidates, entries) = if entries.is_empty() {
            // nothing tells the layouts apart but the checksum
            (
                vec![CheckpointVersion::V2, CheckpointVersion::V1],
                BTreeMap::new(),
            )
        } else if entries.values().all(Value::is_string) {
            let containers: BTreeMap<String, String> =
                serde_json::from_value(Value::Object(entries.into_iter().collect()))?;
            let mut nested = BTreeMap::new();
            nested.insert(String::new(), containers);
            (vec![CheckpointVersion::V1], nested)
        } else if entries.values().all(Value::is_object) {
            let nested: BTreeMap<String, BTreeMap<String, String>> =
                serde_json::from_value(Value::Object(entries.into_iter().collect())).map_err(
                    |e| LoadError::UnsupportedFormat(format!("pod entries must map to strings: {}", e)),
                )?;
            (vec![CheckpointVersion::V2], nested)
        } else {
            return Err(LoadError::UnsupportedFormat(
                "entries mix per-container and per-pod values".to_string(),
            ));
        };

        let mut record = CheckpointRecord {
            policy_name: raw.policy_name,
            default_cpu_set: raw.default_cpu_set,
            version: candidates[0],
            entries,
            checksum: raw.checksum,
        };

        // a zero checksum comes from older file backends and is not verified
        if record.checksum == 0 {
            return Ok(record);
        }

        let actual = record.compute_checksum();
        for version in candidates {
            record.version = version;
            if record.checksum_matches() {
                return Ok(record);
            }
        }

        Err(LoadError::Corrupt {
            expected: record.checksum,
            actual,
        })
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Checksum the kubelet would store for this record.
    pub fn compute_checksum(&self) -> u32 {
        fnv1a_32(self.render("CPUManagerCheckpoint").as_bytes())
    }

    // Older kubelets hashed the versioned struct name.
    fn checksum_matches(&self) -> bool {
        self.checksum == u64::from(self.compute_checksum())
            || self.checksum
                == u64::from(fnv1a_32(self.render(self.version.struct_name()).as_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// All container assignments, pods and containers in key order.
    pub fn assignments(&self) -> impl DoubleEndedIterator<Item = Assignment<'_>> {
        self.entries.iter().flat_map(|(pod, containers)| {
            containers.iter().map(move |(container, cpuset)| Assignment {
                pod,
                container,
                cpuset,
            })
        })
    }

    // The kubelet hashes a go-spew "%#v" dump of its checkpoint struct with
    // the checksum zeroed and map keys sorted.
    fn render(&self, struct_name: &str) -> String {
        let mut out = format!(
            "(*state.{}){{PolicyName:(string){} DefaultCPUSet:(string){} Entries:",
            struct_name, self.policy_name, self.default_cpu_set
        );
        match self.version {
            CheckpointVersion::V1 => {
                out.push_str("(map[string]string)");
                match self.entries.get("") {
                    Some(containers) => render_map(&mut out, containers),
                    None => out.push_str("map[]"),
                }
            }
            CheckpointVersion::V2 => {
                out.push_str("(map[string]map[string]string)map[");
                for (i, (pod, containers)) in self.entries.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    out.push_str(pod);
                    out.push(':');
                    render_map(&mut out, containers);
                }
                out.push(']');
            }
        }
        out.push_str(" Checksum:(checksum.Checksum)0}");
        out
    }
}

fn render_map(out: &mut String, map: &BTreeMap<String, String>) {
    out.push_str("map[");
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(key);
        out.push(':');
        out.push_str(value);
    }
    out.push(']');
}

fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    data.iter().fold(OFFSET_BASIS, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    })
}

fn validate_name(name: &str) -> Result<(), LoadError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(LoadError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Fails when `dir` is missing, is not a directory or cannot be listed.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<FileCheckpointStore> {
        let dir = dir.as_ref();
        if !fs::metadata(dir)?.is_dir() {
            return Err(io::Error::other(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let _ = fs::read_dir(dir)?;
        Ok(FileCheckpointStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CheckpointSource for FileCheckpointStore {
    fn load(&self, name: &str) -> Result<CheckpointRecord, LoadError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        let data = fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(name.to_string()),
            _ => LoadError::Read { path: path.clone(), source },
        })?;
        debug!("read {} bytes from {}", data.len(), path.display());
        CheckpointRecord::decode(&data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    records: HashMap<String, CheckpointRecord>,
}

impl MemoryCheckpointStore {
    pub fn new() -> MemoryCheckpointStore {
        MemoryCheckpointStore::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, record: CheckpointRecord) {
        self.records.insert(name.into(), record);
    }
}

impl CheckpointSource for MemoryCheckpointStore {
    fn load(&self, name: &str) -> Result<CheckpointRecord, LoadError> {
        validate_name(name)?;
        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments(record: &CheckpointRecord) -> Vec<(String, String, String)> {
        record
            .assignments()
            .map(|a| (a.pod.to_string(), a.container.to_string(), a.cpuset.to_string()))
            .collect()
    }

    #[test]
    fn verifies_checksum_of_none_policy_state() {
        let data = br#"{"policyName":"none","defaultCpuSet":"","checksum":1353318690}"#;
        let record = CheckpointRecord::decode(data).unwrap();
        assert_eq!(record.policy_name, "none");
        assert_eq!(record.version, CheckpointVersion::V2);
        assert!(record.is_empty());
        assert_eq!(record.compute_checksum(), 1353318690);
    }

    #[test]
    fn decodes_v2_entries() {
        let data = br#"{
            "policyName": "static",
            "defaultCpuSet": "0,5-7",
            "entries": {
                "pod-a": {"app": "1-2", "sidecar": "3"},
                "pod-b": {"db": "4"}
            },
            "checksum": 4144894047
        }"#;
        let record = CheckpointRecord::decode(data).unwrap();
        assert_eq!(record.version, CheckpointVersion::V2);
        assert_eq!(record.default_cpu_set, "0,5-7");
        assert_eq!(
            assignments(&record),
            vec![
                ("pod-a".into(), "app".into(), "1-2".into()),
                ("pod-a".into(), "sidecar".into(), "3".into()),
                ("pod-b".into(), "db".into(), "4".into()),
            ]
        );
    }

    #[test]
    fn decodes_v1_entries_under_empty_pod() {
        let data = br#"{
            "policyName": "static",
            "defaultCpuSet": "0,3-7",
            "entries": {"ctr-1": "1", "ctr-2": "2"},
            "checksum": 3278455650
        }"#;
        let record = CheckpointRecord::decode(data).unwrap();
        assert_eq!(record.version, CheckpointVersion::V1);
        assert_eq!(
            assignments(&record),
            vec![
                (String::new(), "ctr-1".into(), "1".into()),
                (String::new(), "ctr-2".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn zero_checksum_is_not_verified() {
        let data = br#"{"policyName":"static","defaultCpuSet":"0","entries":{"p":{"c":"1"}}}"#;
        let record = CheckpointRecord::decode(data).unwrap();
        assert_eq!(record.checksum(), 0);
        assert_eq!(assignments(&record).len(), 1);
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        // same document as decodes_v2_entries with one cpuset changed
        let data = br#"{
            "policyName": "static",
            "defaultCpuSet": "0,5-7",
            "entries": {
                "pod-a": {"app": "1-2", "sidecar": "3"},
                "pod-b": {"db": "5"}
            },
            "checksum": 4144894047
        }"#;
        assert!(matches!(
            CheckpointRecord::decode(data),
            Err(LoadError::Corrupt { expected: 4144894047, .. })
        ));
    }

    #[test]
    fn mixed_layouts_are_rejected() {
        let data = br#"{"entries":{"ctr":"1","pod":{"c":"2"}}}"#;
        assert!(matches!(
            CheckpointRecord::decode(data),
            Err(LoadError::UnsupportedFormat(_))
        ));

        let data = br#"{"entries":{"pod":{"c":2}}}"#;
        assert!(matches!(
            CheckpointRecord::decode(data),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            CheckpointRecord::decode(b"not json"),
            Err(LoadError::Decode(_))
        ));
    }

    #[test]
    fn computed_checksum_round_trips_through_decode() {
        let record = CheckpointRecord::new("static", "0")
            .with_entry("pod", "ctr", "1-3")
            .with_entry("pod", "other", "4");
        let data = format!(
            r#"{{"policyName":"static","defaultCpuSet":"0","entries":{{"pod":{{"ctr":"1-3","other":"4"}}}},"checksum":{}}}"#,
            record.compute_checksum()
        );
        let decoded = CheckpointRecord::decode(data.as_bytes()).unwrap();
        assert_eq!(assignments(&decoded), assignments(&record));
    }

    #[test]
    fn format_accepts_matching_versions() {
        let v2 = CheckpointRecord::new("static", "").with_entry("p", "c", "1");
        assert!(CheckpointFormat::Auto.accepts(&v2));
        assert!(CheckpointFormat::V2.accepts(&v2));
        assert!(!CheckpointFormat::V1.accepts(&v2));
        assert!(CheckpointFormat::V1.accepts(&CheckpointRecord::new("none", "")));
        assert_eq!("V1".parse::<CheckpointFormat>(), Ok(CheckpointFormat::V1));
        assert!("v3".parse::<CheckpointFormat>().is_err());
    }

    #[test]
    fn rejects_names_escaping_the_state_dir() {
        let store = MemoryCheckpointStore::new();
        for name in ["", "..", "../etc/passwd", "a/b"] {
            assert!(matches!(store.load(name), Err(LoadError::InvalidName(_))));
        }
        assert!(matches!(store.load("missing"), Err(LoadError::NotFound(_))));
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
    }
}
