use crate::checkpoint::{
    Assignment, CPU_MANAGER_STATE_FILE, CheckpointFormat, CheckpointSource, FileCheckpointStore,
    LoadError,
};
use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use crate::topology::Topology;
use cli_log::*;
use std::collections::BTreeMap;
use std::path::Path;

/// A core that was assigned to a container but has no NUMA node in the
/// topology the allocation was computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedCore {
    pub core: u32,
    pub cpuset: String,
    pub pod: String,
    pub container: String,
}

/// Number of allocated cores per NUMA node. Nodes without allocated cores
/// are absent and read as zero through [`CoresAllocation::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoresAllocation {
    cores: BTreeMap<u32, usize>,
    unmapped: Vec<UnmappedCore>,
}

impl CoresAllocation {
    pub fn get(&self, node: u32) -> usize {
        self.cores.get(&node).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.cores.iter().map(|(&node, &count)| (node, count))
    }

    /// Every node of `topology` with its count (zero when nothing is
    /// allocated there), followed by counted nodes the topology lacks.
    pub fn with_nodes(&self, topology: &Topology) -> impl Iterator<Item = (u32, usize)> {
        let mut all: BTreeMap<u32, usize> =
            topology.nodes().into_iter().map(|n| (n, 0)).collect();
        all.extend(self.iter());
        all.into_iter()
    }

    pub fn total(&self) -> usize {
        self.cores.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn unmapped(&self) -> &[UnmappedCore] {
        &self.unmapped
    }

    fn add(&mut self, node: u32) {
        *self.cores.entry(node).or_insert(0) += 1;
    }
}

impl FromIterator<(u32, usize)> for CoresAllocation {
    fn from_iter<I: IntoIterator<Item = (u32, usize)>>(iter: I) -> Self {
        let mut alloc = CoresAllocation::default();
        for (node, count) in iter {
            if count > 0 {
                *alloc.cores.entry(node).or_insert(0) += count;
            }
        }
        alloc
    }
}

/// Computes per-NUMA-node core allocation from the kubelet CPU manager
/// checkpoint.
pub struct Reader<S = FileCheckpointStore> {
    source: S,
    checkpoint_name: String,
    format: CheckpointFormat,
}

impl Reader<FileCheckpointStore> {
    pub fn new(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        let store = FileCheckpointStore::new(state_dir).map_err(|source| Error::Init {
            dir: state_dir.to_path_buf(),
            source,
        })?;
        Ok(Reader::with_source(store))
    }
}

impl<S: CheckpointSource> Reader<S> {
    pub fn with_source(source: S) -> Self {
        Reader {
            source,
            checkpoint_name: CPU_MANAGER_STATE_FILE.to_string(),
            format: CheckpointFormat::Auto,
        }
    }

    /// Overrides the checkpoint name, for kubelets that store the CPU
    /// manager state under a different file.
    pub fn set_checkpoint_file_name(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = name.into();
        self
    }

    pub fn set_checkpoint_format(mut self, format: CheckpointFormat) -> Self {
        self.format = format;
        self
    }

    pub fn checkpoint_file_name(&self) -> &str {
        &self.checkpoint_name
    }

    pub fn get_cores_allocation(&self, topology: &Topology) -> Result<CoresAllocation> {
        let load_error = |source| Error::Load {
            name: self.checkpoint_name.clone(),
            source,
        };

        let record = self.source.load(&self.checkpoint_name).map_err(load_error)?;
        if !self.format.accepts(&record) {
            return Err(load_error(LoadError::UnsupportedFormat(format!(
                "found a {} checkpoint, reader is pinned to {:?}",
                record.version, self.format
            ))));
        }

        accumulate(record.assignments(), topology)
    }
}

// Folds assignments into per-node counts. The first malformed cpuset aborts
// the fold; cores missing from the topology are warned about and skipped.
fn accumulate<'a, I>(assignments: I, topology: &Topology) -> Result<CoresAllocation>
where
    I: IntoIterator<Item = Assignment<'a>>,
{
    let mut alloc = CoresAllocation::default();
    for entry in assignments {
        let cpus = CpuSet::parse(entry.cpuset).map_err(|source| Error::Parse {
            pod: entry.pod.to_string(),
            container: entry.container.to_string(),
            cpuset: entry.cpuset.to_string(),
            source,
        })?;

        for core in cpus.iter() {
            match topology.resolve(core) {
                Some(node) => alloc.add(node),
                None => {
                    warn!(
                        "unknown NUMA node id for core {} in cpuset {:?} for container {:?} in pod {:?}",
                        core, entry.cpuset, entry.container, entry.pod
                    );
                    alloc.unmapped.push(UnmappedCore {
                        core,
                        cpuset: entry.cpuset.to_string(),
                        pod: entry.pod.to_string(),
                        container: entry.container.to_string(),
                    });
                }
            }
        }
    }

    debug!(
        "{} cores allocated across {} NUMA nodes ({} unmapped)",
        alloc.total(),
        alloc.cores.len(),
        alloc.unmapped.len()
    );
    Ok(alloc)
}
