use crate::reader::CoresAllocation;
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAllocation {
    pub id: u32,
    pub total_cores: usize,
    pub allocated_cores: usize,
}

impl NodeAllocation {
    // Fraction of the node's cores pinned to containers, clamped to 1.0 when
    // the checkpoint claims more cores than the topology knows about
    pub fn ratio(&self) -> f64 {
        if self.total_cores == 0 {
            return 0.0;
        }
        (self.allocated_cores as f64 / self.total_cores as f64).min(1.0)
    }
}

/// One entry per topology node, plus any node only the allocation mentions.
pub fn summarize(topology: &Topology, alloc: &CoresAllocation) -> Vec<NodeAllocation> {
    alloc
        .with_nodes(topology)
        .map(|(id, allocated_cores)| NodeAllocation {
            id,
            total_cores: topology.cores_on(id),
            allocated_cores,
        })
        .collect()
}
