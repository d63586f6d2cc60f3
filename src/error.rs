//! Error types for the cluster mesh.

use snafu::Snafu;

/// Errors from the cluster ID registry.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterIdError {
    /// Another connected remote cluster already holds this ID.
    #[snafu(display("clusterID {cluster_id} is already used"))]
    AlreadyUsed {
        /// The conflicting cluster ID.
        cluster_id: u32,
    },

    /// The ID is the local cluster's own ID.
    #[snafu(display("clusterID {cluster_id} is the local cluster's ID"))]
    LocalClusterId {
        /// The conflicting cluster ID.
        cluster_id: u32,
    },

    /// The ID is outside the range allowed by the mesh configuration.
    #[snafu(display("clusterID {cluster_id} is out of range (must be between 1 and {max})"))]
    OutOfRange {
        /// The rejected cluster ID.
        cluster_id: u32,
        /// Highest valid cluster ID.
        max: u32,
    },
}

/// Outcome of waiting on a sync barrier that did not end in satisfaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncWaitError {
    /// The remote cluster went away before its initial sync completed.
    #[snafu(display("remote cluster disconnected"))]
    RemoteClusterDisconnected,

    /// The caller cancelled the wait.
    #[snafu(display("wait cancelled"))]
    Cancelled,

    /// The caller's deadline passed before the barrier settled.
    #[snafu(display("deadline exceeded"))]
    DeadlineExceeded,
}

impl SyncWaitError {
    /// Returns true if the wait ended because the remote was disconnected.
    ///
    /// Aggregate waits ignore this condition: a remote that vanished no longer
    /// needs to be waited for.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, SyncWaitError::RemoteClusterDisconnected)
    }
}

/// Errors produced while consuming a remote watch stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WatchError {
    /// The backend could not start or continue the watch.
    #[snafu(display("watch backend error: {reason}"))]
    Backend {
        /// Description of the failure.
        reason: String,
    },

    /// An entry could not be decoded.
    #[snafu(display("unable to decode entry '{key}': {source}"))]
    Decode {
        /// Key of the offending entry.
        key: String,
        /// The underlying error.
        source: serde_json::Error,
    },
}

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[snafu(display("failed to read config file {path}: {source}"))]
    ReadFile {
        /// Path of the file.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML.
    #[snafu(display("failed to parse config file {path}: {source}"))]
    ParseToml {
        /// Path of the file.
        path: String,
        /// The underlying error.
        source: toml::de::Error,
    },
}

/// Errors surfaced by the cluster mesh orchestrator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterMeshError {
    /// Reserving the remote's cluster ID failed.
    #[snafu(display("remote cluster '{remote_cluster}' rejected: {source}"))]
    ClusterId {
        /// Name of the rejected remote.
        remote_cluster: String,
        /// The underlying error.
        source: ClusterIdError,
    },

    /// The mesh already holds the maximum number of remote clusters.
    #[snafu(display("too many remote clusters (max: {max})"))]
    TooManyRemoteClusters {
        /// Configured maximum.
        max: u32,
    },

    /// No remote cluster with this name is registered.
    #[snafu(display("remote cluster '{name}' is not registered"))]
    UnknownRemoteCluster {
        /// The requested name.
        name: String,
    },

    /// The mesh configuration is invalid.
    #[snafu(display("invalid cluster mesh configuration: {source}"))]
    Config {
        /// The underlying error.
        source: ConfigError,
    },
}

impl From<ConfigError> for ClusterMeshError {
    fn from(source: ConfigError) -> Self {
        ClusterMeshError::Config { source }
    }
}
