use crate::checkpoint::{CheckpointSource, FileCheckpointStore};
use crate::error::report;
use crate::numa_node::{NodeAllocation, summarize};
use crate::reader::Reader;
use crate::topology::Topology;
use cli_log::*;

pub struct App<S = FileCheckpointStore> {
    pub reader: Reader<S>,
    pub topology: Topology,
    pub nodes: Vec<NodeAllocation>,
    pub unmapped_cores: usize,
    pub last_error: Option<String>,
    pub should_quit: bool,
}

impl<S: CheckpointSource> App<S> {
    pub fn new(reader: Reader<S>, topology: Topology) -> App<S> {
        let nodes = topology
            .nodes()
            .into_iter()
            .map(|id| NodeAllocation {
                id,
                total_cores: topology.cores_on(id),
                allocated_cores: 0,
            })
            .collect();
        App {
            reader,
            topology,
            nodes,
            unmapped_cores: 0,
            last_error: None,
            should_quit: false,
        }
    }

    pub fn update(&mut self) {
        match self.reader.get_cores_allocation(&self.topology) {
            Ok(alloc) => {
                self.nodes = summarize(&self.topology, &alloc);
                self.unmapped_cores = alloc.unmapped().len();
                self.last_error = None;
            }
            Err(e) => {
                // keep the previous numbers, this cycle just produced nothing
                let message = report(&e);
                error!("Error reading cpu allocation: {}", message);
                self.last_error = Some(message);
            }
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}
