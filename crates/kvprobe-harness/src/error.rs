use kvprobe_client::ClientError;
use kvprobe_core::CodesError;
use std::io;
use std::path::PathBuf;

/// Errors that stop a scenario or a suite from running to completion.
///
/// Inside a suite these become a `Failed` verdict for the scenario that hit
/// them; only setup problems (unreadable files, bad config) reach `main`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write report: {0}")]
    Output(#[source] io::Error),

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Codes(#[from] CodesError),

    #[error("could not resolve {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("a cluster needs at least one node")]
    NoNodes,
}
