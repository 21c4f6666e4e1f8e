use crate::cpuset::CpuSet;
use cli_log::*;
use std::collections::{BTreeSet, HashMap};

/// Read-only core id -> NUMA node id table, built once from an already
/// discovered hardware topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    core_to_node: HashMap<u32, u32>,
}

impl Topology {
    /// A core listed under several nodes belongs to the last one seen.
    pub fn from_node_cpusets<I>(nodes: I) -> Topology
    where
        I: IntoIterator<Item = (u32, CpuSet)>,
    {
        let mut core_to_node = HashMap::new();
        for (node, cpus) in nodes {
            for core in cpus {
                if let Some(previous) = core_to_node.insert(core, node) {
                    if previous != node {
                        warn!(
                            "core {} is listed under NUMA nodes {} and {}, using {}",
                            core, previous, node, node
                        );
                    }
                }
            }
        }
        Topology { core_to_node }
    }

    pub fn resolve(&self, core: u32) -> Option<u32> {
        self.core_to_node.get(&core).copied()
    }

    pub fn nodes(&self) -> BTreeSet<u32> {
        self.core_to_node.values().copied().collect()
    }

    pub fn cores_on(&self, node: u32) -> usize {
        self.core_to_node.values().filter(|&&n| n == node).count()
    }

    pub fn len(&self) -> usize {
        self.core_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core_to_node.is_empty()
    }
}

impl FromIterator<(u32, u32)> for Topology {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Topology {
            core_to_node: iter.into_iter().collect(),
        }
    }
}
