//! Entry types exchanged with remote clusters.
//!
//! Remote clusters publish nodes, shared services, and IP to identity
//! mappings as JSON values under well-known key prefixes. These types are the
//! decoded form handed to local sinks.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::IP_IDENTITIES_KEY_PREFIX;
use crate::constants::NODES_KEY_PREFIX;
use crate::constants::SERVICES_KEY_PREFIX;

/// Resource kinds watched from every remote cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Remote node entries.
    Nodes,
    /// Shared services exported by the remote.
    Services,
    /// IP to security identity mappings.
    IpIdentities,
}

impl ResourceKind {
    /// All resource kinds, in a stable order.
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Nodes, ResourceKind::Services, ResourceKind::IpIdentities];

    /// Convert the kind to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Services => "services",
            ResourceKind::IpIdentities => "ip-identities",
        }
    }

    /// Key prefix holding this kind's entries for the given remote cluster.
    pub fn key_prefix(&self, cluster_name: &str) -> String {
        let base = match self {
            ResourceKind::Nodes => NODES_KEY_PREFIX,
            ResourceKind::Services => SERVICES_KEY_PREFIX,
            ResourceKind::IpIdentities => IP_IDENTITIES_KEY_PREFIX,
        };
        format!("{}/{}", base, cluster_name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace-qualified name of a global service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId {
    /// Kubernetes-style namespace.
    pub namespace: String,
    /// Service name within the namespace.
    pub name: String,
}

impl ServiceId {
    /// Create a service identifier.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Port exposed by a frontend or backend address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Port number.
    pub port: u16,
    /// Transport protocol (e.g. "TCP").
    pub protocol: String,
}

/// One remote cluster's view of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterService {
    /// Name of the cluster publishing this entry.
    pub cluster: String,
    /// Service namespace.
    pub namespace: String,
    /// Service name.
    pub name: String,
    /// Frontend IPs, keyed by address, with named ports.
    #[serde(default)]
    pub frontends: BTreeMap<String, BTreeMap<String, PortConfig>>,
    /// Backend IPs, keyed by address, with named ports.
    #[serde(default)]
    pub backends: BTreeMap<String, BTreeMap<String, PortConfig>>,
    /// Service labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Whether the service is exported for cross-cluster consumption.
    #[serde(default)]
    pub shared: bool,
    /// Whether backends from other clusters are merged into this service.
    #[serde(default)]
    pub include_external: bool,
    /// Cluster ID of the publishing cluster.
    #[serde(default)]
    pub cluster_id: u32,
}

impl ClusterService {
    /// Global identifier of the service this entry belongs to.
    pub fn service_id(&self) -> ServiceId {
        ServiceId::new(&self.namespace, &self.name)
    }
}

/// Node entry published by a remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Cluster the node belongs to.
    pub cluster: String,
    /// Node name, unique within its cluster.
    pub name: String,
    /// Node addresses (internal and external IPs).
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Cluster ID of the owning cluster.
    #[serde(default)]
    pub cluster_id: u32,
}

/// IP address to security identity mapping published by a remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpIdentityPair {
    /// IP address or CIDR prefix.
    pub ip: String,
    /// Numeric security identity.
    pub identity: u32,
    /// IP of the node hosting the endpoint, if any.
    #[serde(default)]
    pub host_ip: Option<String>,
    /// Encryption key index.
    #[serde(default)]
    pub key: u8,
}

/// A decodable entry stored under a watched key prefix.
pub trait StoreEntry: Clone + Send + Sync + 'static {
    /// Decode an entry from its key and JSON value.
    fn decode(key: &str, value: &[u8]) -> Result<Self, serde_json::Error>;
}

impl StoreEntry for RemoteNode {
    fn decode(_key: &str, value: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(value)
    }
}

impl StoreEntry for ClusterService {
    fn decode(_key: &str, value: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(value)
    }
}

impl StoreEntry for IpIdentityPair {
    fn decode(_key: &str, value: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(value)
    }
}
