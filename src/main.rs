use clap::Parser;
use cli_log::*;
use numacores::{
    CPU_MANAGER_STATE_FILE, CheckpointFormat, Reader, Topology, app::App, error::report,
    numa_node::summarize, run_app, sys_numa_info::read_topology,
};

use std::{path::PathBuf, process::ExitCode, time::Duration};

/// Per-NUMA-node view of the cores the kubelet CPU manager pinned to containers.
#[derive(Parser)]
#[command(name = "numacores", version, about)]
struct Cli {
    /// Kubelet state directory holding the CPU manager checkpoint
    #[arg(long, default_value = "/var/lib/kubelet")]
    state_dir: PathBuf,

    /// Checkpoint file name inside the state directory
    #[arg(long, default_value = CPU_MANAGER_STATE_FILE)]
    checkpoint_file: String,

    /// Accepted checkpoint layout: auto, v1 (kubelet <= 1.17) or v2
    #[arg(long, default_value = "auto")]
    checkpoint_format: CheckpointFormat,

    /// Root of the sysfs mount used to discover the NUMA topology
    #[arg(long, default_value = "/sys")]
    sysfs_root: PathBuf,

    /// Dashboard refresh period in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Print one snapshot and exit instead of running the dashboard
    #[arg(long)]
    once: bool,
}

fn print_snapshot(reader: &Reader, topology: &Topology) -> numacores::Result<()> {
    let alloc = reader.get_cores_allocation(topology)?;
    for node in summarize(topology, &alloc) {
        println!(
            "node={} allocated={} total={}",
            node.id, node.allocated_cores, node.total_cores
        );
    }
    for unmapped in alloc.unmapped() {
        println!(
            "unmapped core={} cpuset={:?} pod={:?} container={:?}",
            unmapped.core, unmapped.cpuset, unmapped.pod, unmapped.container
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    init_cli_log!();
    let cli = Cli::parse();

    let topology = match read_topology(&cli.sysfs_root) {
        Ok(topology) => topology,
        Err(e) => {
            eprintln!("Error reading NUMA topology: {}", report(&e));
            return ExitCode::FAILURE;
        }
    };
    info!("topology has {} cores on {} nodes", topology.len(), topology.nodes().len());

    let reader = match Reader::new(&cli.state_dir) {
        Ok(reader) => reader
            .set_checkpoint_file_name(cli.checkpoint_file)
            .set_checkpoint_format(cli.checkpoint_format),
        Err(e) => {
            eprintln!("{}", report(&e));
            return ExitCode::FAILURE;
        }
    };

    if cli.once {
        return match print_snapshot(&reader, &topology) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", report(&e));
                ExitCode::FAILURE
            }
        };
    }

    let mut terminal = ratatui::init();
    let mut app = App::new(reader, topology);
    let res = run_app(
        &mut terminal,
        &mut app,
        Duration::from_millis(cli.interval_ms.max(1)),
    );
    ratatui::restore();
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Terminal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
