use crate::cpuset::{CpuSet, CpuSetError};
use crate::topology::Topology;
use cli_log::*;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed cpu list in {}", .path.display())]
    CpuList {
        path: PathBuf,
        #[source]
        source: CpuSetError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TopologyError + '_ {
    move |source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_cpulist(path: &Path) -> Result<CpuSet, TopologyError> {
    let cpulist_str = fs::read_to_string(path).map_err(io_error(path))?;
    CpuSet::parse(&cpulist_str).map_err(|source| TopologyError::CpuList {
        path: path.to_path_buf(),
        source,
    })
}

/// Cpus of every NUMA node under `<sysfs_root>/devices/system/node`, sorted
/// by node id. CPU-less nodes come back with an empty set.
pub fn read_node_cpusets(sysfs_root: &Path) -> Result<Vec<(u32, CpuSet)>, TopologyError> {
    let node_base_path = sysfs_root.join("devices/system/node");
    let mut nodes = Vec::new();

    for entry in fs::read_dir(&node_base_path).map_err(io_error(&node_base_path))? {
        let path = entry.map_err(io_error(&node_base_path))?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("node"))
            .and_then(|id| id.parse::<u32>().ok())
        else {
            continue;
        };

        let cpulist_path = path.join("cpulist");
        let cpus = if cpulist_path.exists() {
            read_cpulist(&cpulist_path)?
        } else {
            CpuSet::new()
        };
        nodes.push((id, cpus));
    }

    nodes.sort_by_key(|(id, _)| *id);
    Ok(nodes)
}

/// Builds the core -> NUMA node table from sysfs. Kernels built without NUMA
/// support have no node directory; all present cpus then belong to node 0.
pub fn read_topology(sysfs_root: &Path) -> Result<Topology, TopologyError> {
    let node_base_path = sysfs_root.join("devices/system/node");
    if !node_base_path.is_dir() {
        info!(
            "{} not found, assuming a single NUMA node",
            node_base_path.display()
        );
        let present = get_all_present_cpus(sysfs_root)?;
        return Ok(Topology::from_node_cpusets([(0, present)]));
    }

    let nodes = read_node_cpusets(sysfs_root)?;
    debug!("discovered {} NUMA nodes", nodes.len());
    Ok(Topology::from_node_cpusets(nodes))
}

pub fn get_all_present_cpus(sysfs_root: &Path) -> Result<CpuSet, TopologyError> {
    read_cpulist(&sysfs_root.join("devices/system/cpu/present"))
}
