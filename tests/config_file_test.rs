//! Tests for loading the cluster mesh configuration from TOML files.

use std::io::Write;

use aspen_clustermesh::ClusterMeshConfig;
use aspen_clustermesh::ConfigError;
use aspen_clustermesh::RemoteClusterConfig;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(contents.as_bytes()).expect("failed to write config");
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        cluster_name = "local"
        cluster_id = 1
        node_name = "worker-3"
        max_connected_clusters = 511

        [remotes.eu-west]
        cluster_id = 300

        [remotes.us-east]
        cluster_id = 2
        cached_identities = true
        "#,
    );

    let config = ClusterMeshConfig::from_toml_file(file.path()).unwrap();
    config.validate().unwrap();

    assert!(config.is_enabled());
    assert_eq!(config.node_name, "worker-3");
    assert_eq!(config.max_connected_clusters, 511);
    assert_eq!(config.remotes.len(), 2);
    assert_eq!(config.remotes["eu-west"], RemoteClusterConfig::new(300));
    assert!(config.remotes["us-east"].cached_identities);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ClusterMeshConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn test_malformed_file() {
    let file = write_config("cluster_id = \"one\"");
    let err = ClusterMeshConfig::from_toml_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseToml { .. }));
}

#[test]
fn test_file_with_out_of_range_remote_fails_validation() {
    let file = write_config(
        r#"
        cluster_name = "local"
        cluster_id = 1

        [remotes.far]
        cluster_id = 300
        "#,
    );

    let config = ClusterMeshConfig::from_toml_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
}
