//! Cluster mesh configuration.
//!
//! Supports TOML files and environment variable overrides on top of
//! defaults. Configuration precedence (highest to lowest):
//!
//! 1. Environment variables (`CLUSTERMESH_*`)
//! 2. TOML file
//! 3. Defaults

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use crate::constants::CLUSTER_ID_MIN;
use crate::constants::CLUSTER_ID_UNSET;
use crate::constants::DEFAULT_MAX_CONNECTED_CLUSTERS;
use crate::constants::EXTENDED_MAX_CONNECTED_CLUSTERS;
use crate::constants::MAX_CLUSTER_NAME_LEN;
use crate::error::ClusterIdError;
use crate::error::ConfigError;
use crate::error::ParseTomlSnafu;
use crate::error::ReadFileSnafu;

/// Configuration of one remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteClusterConfig {
    /// Cluster ID the remote is expected to hold.
    pub cluster_id: u32,
    /// Identities are stored under the cache prefix.
    #[serde(default)]
    pub cached_identities: bool,
}

impl RemoteClusterConfig {
    /// Config for a remote holding `cluster_id`.
    pub fn new(cluster_id: u32) -> Self {
        Self {
            cluster_id,
            cached_identities: false,
        }
    }
}

/// Top-level cluster mesh configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterMeshConfig {
    /// Name of the local cluster, used for logging and metrics.
    pub cluster_name: String,
    /// ID of the local cluster. 0 disables the mesh.
    pub cluster_id: u32,
    /// Name of the local node, used for logging and metrics.
    pub node_name: String,
    /// Highest cluster ID and maximum number of remote clusters.
    pub max_connected_clusters: u32,
    /// Remote clusters, keyed by name.
    pub remotes: BTreeMap<String, RemoteClusterConfig>,
}

impl Default for ClusterMeshConfig {
    fn default() -> Self {
        Self {
            cluster_name: "default".to_string(),
            cluster_id: CLUSTER_ID_UNSET,
            node_name: "localhost".to_string(),
            max_connected_clusters: DEFAULT_MAX_CONNECTED_CLUSTERS,
            remotes: BTreeMap::new(),
        }
    }
}

impl ClusterMeshConfig {
    /// Load defaults overridden by environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load_with_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides or validation.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        toml::from_str(&contents).context(ParseTomlSnafu {
            path: path.display().to_string(),
        })
    }

    /// Parse a TOML document without environment overrides or validation.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).context(ParseTomlSnafu { path: "<inline>" })
    }

    /// Returns false when no cluster ID or no remote is configured.
    pub fn is_enabled(&self) -> bool {
        self.cluster_id != CLUSTER_ID_UNSET && !self.remotes.is_empty()
    }

    /// Check IDs, names, and limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connected_clusters != DEFAULT_MAX_CONNECTED_CLUSTERS
            && self.max_connected_clusters != EXTENDED_MAX_CONNECTED_CLUSTERS
        {
            return Err(ConfigError::InvalidValue {
                key: "max_connected_clusters".to_string(),
                value: self.max_connected_clusters.to_string(),
                reason: format!(
                    "must be {} or {}",
                    DEFAULT_MAX_CONNECTED_CLUSTERS, EXTENDED_MAX_CONNECTED_CLUSTERS
                ),
            });
        }

        if self.cluster_id != CLUSTER_ID_UNSET {
            validate_cluster_id(self.cluster_id, self.max_connected_clusters).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "cluster_id".to_string(),
                    value: self.cluster_id.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        for (name, remote) in &self.remotes {
            validate_cluster_name(name)?;
            validate_cluster_id(remote.cluster_id, self.max_connected_clusters).map_err(|e| {
                ConfigError::InvalidValue {
                    key: format!("remotes.{}.cluster_id", name),
                    value: remote.cluster_id.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if name == &self.cluster_name || remote.cluster_id == self.cluster_id {
                return Err(ConfigError::InvalidValue {
                    key: format!("remotes.{}", name),
                    value: remote.cluster_id.to_string(),
                    reason: "remote cluster collides with the local cluster".to_string(),
                });
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(name) = env_var("CLUSTERMESH_CLUSTER_NAME") {
            self.cluster_name = name;
        }
        if let Some(id) = parse_env::<u32>("CLUSTERMESH_CLUSTER_ID")? {
            self.cluster_id = id;
        }
        if let Some(node) = env_var("CLUSTERMESH_NODE_NAME") {
            self.node_name = node;
        }
        if let Some(max) = parse_env::<u32>("CLUSTERMESH_MAX_CONNECTED_CLUSTERS")? {
            self.max_connected_clusters = max;
        }
        Ok(())
    }
}

/// Check that `cluster_id` lies in `1..=max`.
pub fn validate_cluster_id(cluster_id: u32, max: u32) -> Result<(), ClusterIdError> {
    if !(CLUSTER_ID_MIN..=max).contains(&cluster_id) {
        return Err(ClusterIdError::OutOfRange { cluster_id, max });
    }
    Ok(())
}

/// Check that a cluster name is non-empty, bounded, and DNS-label shaped.
pub fn validate_cluster_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_CLUSTER_NAME_LEN {
        Some("is too long")
    } else if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        Some("must consist of lowercase alphanumerics and '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidValue {
            key: "cluster_name".to_string(),
            value: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ClusterMeshConfig {
        let mut config = ClusterMeshConfig {
            cluster_name: "local".to_string(),
            cluster_id: 1,
            ..Default::default()
        };
        config.remotes.insert("eu-west".to_string(), RemoteClusterConfig::new(2));
        config
    }

    #[test]
    fn test_default_is_disabled() {
        let config = ClusterMeshConfig::default();
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_requires_id_and_remotes() {
        let mut config = enabled_config();
        assert!(config.is_enabled());
        config.remotes.clear();
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_validate_rejects_out_of_range_remote() {
        let mut config = enabled_config();
        config.remotes.insert("far".to_string(), RemoteClusterConfig::new(300));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        config.max_connected_clusters = EXTENDED_MAX_CONNECTED_CLUSTERS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_local_collision() {
        let mut config = enabled_config();
        config.remotes.insert("other".to_string(), RemoteClusterConfig::new(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_max() {
        let config = ClusterMeshConfig {
            max_connected_clusters: 100,
            ..enabled_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cluster_name_rules() {
        assert!(validate_cluster_name("eu-west-1").is_ok());
        assert!(validate_cluster_name("").is_err());
        assert!(validate_cluster_name("-edge").is_err());
        assert!(validate_cluster_name("Upper").is_err());
        assert!(validate_cluster_name(&"a".repeat(MAX_CLUSTER_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = ClusterMeshConfig::from_toml_str(
            r#"
            cluster_name = "local"
            cluster_id = 4

            [remotes.eu-west]
            cluster_id = 7
            cached_identities = true
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster_id, 4);
        assert_eq!(config.max_connected_clusters, DEFAULT_MAX_CONNECTED_CLUSTERS);
        assert_eq!(config.remotes["eu-west"], RemoteClusterConfig {
            cluster_id: 7,
            cached_identities: true,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_cluster_id_bounds() {
        assert!(validate_cluster_id(0, 255).is_err());
        assert!(validate_cluster_id(1, 255).is_ok());
        assert!(validate_cluster_id(255, 255).is_ok());
        assert_eq!(validate_cluster_id(256, 255), Err(ClusterIdError::OutOfRange { cluster_id: 256, max: 255 }));
    }
}
