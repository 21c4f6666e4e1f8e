use crate::checkpoint::LoadError;
use crate::cpuset::CpuSetError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the allocation reader. Each variant aborts the whole call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to initialize checkpoint store in {}", .dir.display())]
    Init {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load checkpoint {name:?}")]
    Load {
        name: String,
        #[source]
        source: LoadError,
    },

    #[error("could not parse cpuset {cpuset:?} for container {container:?} in pod {pod:?}")]
    Parse {
        pod: String,
        container: String,
        cpuset: String,
        #[source]
        source: CpuSetError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Renders an error and its whole source chain on one line.
pub fn report(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
