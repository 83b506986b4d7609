//! Host inventory reporting.
//!
//! A backend is constructed with an explicit [`NodeSet`]. The
//! [`InventoryReporter`] validates node identifiers against that set, asks a
//! [`NodeProbe`] for a fresh [`HostSnapshot`] per node and projects the
//! snapshots into the records the orchestration layer consumes. Snapshots are
//! recomputed on every request and never cached.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::{DriverError, DriverResult};

const BYTES_PER_MIB: u64 = 1024 * 1024;
const BYTES_PER_GIB: u64 = 1024 * BYTES_PER_MIB;

/// Ordered, de-duplicated set of node identifiers served by one backend.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeSet {
    nodes: Vec<String>,
}

impl NodeSet {
    /// Builds a set from `nodes`, trimming whitespace and dropping blanks and
    /// duplicates while preserving order.
    #[must_use]
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for node in nodes {
            let trimmed = node.as_ref().trim();
            if !trimmed.is_empty() && !unique.iter().any(|known| known == trimmed) {
                unique.push(trimmed.to_owned());
            }
        }
        Self { nodes: unique }
    }

    /// Set holding exactly one node.
    #[must_use]
    pub fn single(node: impl Into<String>) -> Self {
        Self::new([node.into()])
    }

    /// Parses a comma-separated node list.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Returns `true` when `node` belongs to the set.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|known| known == node)
    }

    /// Number of configured nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no node is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates node identifiers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Node identifiers as owned strings.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.nodes.clone()
    }
}

/// Capacity and usage of one node at the time it was probed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HostSnapshot {
    /// Node identifier.
    pub node_id: String,
    /// Physical or assignable CPUs.
    pub cpu_total: u32,
    /// CPUs assigned to instances.
    pub cpu_used: u32,
    /// Memory in MiB.
    pub memory_total_mb: u64,
    /// Memory assigned to instances, in MiB.
    pub memory_used_mb: u64,
    /// Local disk in GiB.
    pub disk_total_gb: u64,
    /// Local disk assigned to instances, in GiB.
    pub disk_used_gb: u64,
    /// Hypervisor family.
    pub hypervisor_type: String,
    /// Hypervisor version.
    pub hypervisor_version: String,
    /// Free-form CPU description.
    #[serde(default)]
    pub cpu_info: String,
}

impl HostSnapshot {
    /// Projects the snapshot into the resource-capacity record.
    #[must_use]
    pub fn to_resource_capacity(&self) -> ResourceCapacity {
        ResourceCapacity {
            vcpus: self.cpu_total,
            vcpus_used: self.cpu_used,
            memory_mb: self.memory_total_mb,
            memory_mb_used: self.memory_used_mb,
            local_gb: self.disk_total_gb,
            local_gb_used: self.disk_used_gb,
            hypervisor_type: self.hypervisor_type.clone(),
            hypervisor_version: self.hypervisor_version.clone(),
            hypervisor_hostname: self.node_id.clone(),
            cpu_info: self.cpu_info.clone(),
        }
    }

    /// Projects the snapshot into the host status record.
    #[must_use]
    pub fn to_host_status(&self, identity: &HostIdentity) -> HostStatus {
        let memory_total = self.memory_total_mb.saturating_mul(BYTES_PER_MIB);
        let memory_used = self.memory_used_mb.saturating_mul(BYTES_PER_MIB);
        let disk_total = self.disk_total_gb.saturating_mul(BYTES_PER_GIB);
        let disk_used = self.disk_used_gb.saturating_mul(BYTES_PER_GIB);
        HostStatus {
            host_name_label: self.node_id.clone(),
            hypervisor_hostname: self.node_id.clone(),
            host_memory_total: memory_total,
            host_memory_free: memory_total.saturating_sub(memory_used),
            disk_total,
            disk_used,
            disk_available: disk_total.saturating_sub(disk_used),
            host_uuid: identity.host_uuid,
            host_ip_address: identity.host_ip_address.clone(),
            host_cpu_info: identity.cpu_info.clone(),
            host_other_config: identity.other_config.clone(),
        }
    }
}

/// Resource-capacity record reported per node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceCapacity {
    /// Total virtual CPUs.
    pub vcpus: u32,
    /// Virtual CPUs in use.
    pub vcpus_used: u32,
    /// Total memory in MiB.
    pub memory_mb: u64,
    /// Memory in use in MiB.
    pub memory_mb_used: u64,
    /// Total local disk in GiB.
    pub local_gb: u64,
    /// Local disk in use in GiB.
    pub local_gb_used: u64,
    /// Hypervisor family.
    pub hypervisor_type: String,
    /// Hypervisor version.
    pub hypervisor_version: String,
    /// Node identifier.
    pub hypervisor_hostname: String,
    /// Free-form CPU description.
    pub cpu_info: String,
}

/// Host-level attributes that do not change between probes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostIdentity {
    /// Host identifier.
    pub host_uuid: Uuid,
    /// Management address.
    pub host_ip_address: String,
    /// CPU details.
    pub cpu_info: BTreeMap<String, String>,
    /// Additional host configuration.
    pub other_config: BTreeMap<String, String>,
}

impl HostIdentity {
    /// Identity with a fresh UUID and empty maps.
    #[must_use]
    pub fn new(host_ip_address: impl Into<String>) -> Self {
        Self {
            host_uuid: Uuid::new_v4(),
            host_ip_address: host_ip_address.into(),
            cpu_info: BTreeMap::new(),
            other_config: BTreeMap::new(),
        }
    }
}

/// Host status record; memory and disk figures are in bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HostStatus {
    /// Display label for the host.
    pub host_name_label: String,
    /// Node identifier.
    pub hypervisor_hostname: String,
    /// Total memory.
    pub host_memory_total: u64,
    /// Unassigned memory.
    pub host_memory_free: u64,
    /// Total local disk.
    pub disk_total: u64,
    /// Assigned local disk.
    pub disk_used: u64,
    /// Unassigned local disk.
    pub disk_available: u64,
    /// Host identifier.
    pub host_uuid: Uuid,
    /// Management address.
    pub host_ip_address: String,
    /// CPU details.
    pub host_cpu_info: BTreeMap<String, String>,
    /// Additional host configuration.
    pub host_other_config: BTreeMap<String, String>,
}

/// Result of `get_host_stats`: one record for a single node, a sequence
/// otherwise.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HostStats {
    /// Exactly one node is configured.
    Single(HostStatus),
    /// Two or more nodes are configured.
    Multiple(Vec<HostStatus>),
}

impl HostStats {
    /// Flattens the result into a list.
    #[must_use]
    pub fn into_vec(self) -> Vec<HostStatus> {
        match self {
            Self::Single(status) => vec![status],
            Self::Multiple(statuses) => statuses,
        }
    }
}

/// Source of per-node measurements.
pub trait NodeProbe {
    /// Measures `node`; the node has already been validated.
    ///
    /// # Errors
    ///
    /// Returns a backend specific error when the node cannot be measured.
    fn probe(&self, node: &str) -> DriverResult<HostSnapshot>;
}

/// Validates node identifiers and aggregates per-node snapshots.
#[derive(Clone, Debug)]
pub struct InventoryReporter {
    nodes: NodeSet,
    identity: HostIdentity,
}

impl InventoryReporter {
    /// Creates a reporter for `nodes`.
    #[must_use]
    pub const fn new(nodes: NodeSet, identity: HostIdentity) -> Self {
        Self { nodes, identity }
    }

    /// Configured nodes.
    #[must_use]
    pub const fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    /// Host identity used for status records.
    #[must_use]
    pub const fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    /// Probes a single configured node.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownNode`] when `node` is not configured, or
    /// the probe's error.
    pub fn snapshot<P: NodeProbe + ?Sized>(
        &self,
        probe: &P,
        node: &str,
    ) -> DriverResult<HostSnapshot> {
        if !self.nodes.contains(node) {
            return Err(DriverError::UnknownNode {
                node: node.to_owned(),
            });
        }
        probe.probe(node)
    }

    /// Probes every configured node in order.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoNodesConfigured`] for an empty node set, or
    /// the first probe error.
    pub fn snapshots<P: NodeProbe + ?Sized>(&self, probe: &P) -> DriverResult<Vec<HostSnapshot>> {
        if self.nodes.is_empty() {
            return Err(DriverError::NoNodesConfigured);
        }
        self.nodes.iter().map(|node| probe.probe(node)).collect()
    }

    /// Resource-capacity record for `node`.
    ///
    /// # Errors
    ///
    /// See [`InventoryReporter::snapshot`].
    pub fn available_resource<P: NodeProbe + ?Sized>(
        &self,
        probe: &P,
        node: &str,
    ) -> DriverResult<ResourceCapacity> {
        Ok(self.snapshot(probe, node)?.to_resource_capacity())
    }

    /// Host status for every node: a single record when one node is
    /// configured, a sequence otherwise.
    ///
    /// # Errors
    ///
    /// See [`InventoryReporter::snapshots`].
    pub fn host_stats<P: NodeProbe + ?Sized>(&self, probe: &P) -> DriverResult<HostStats> {
        let mut statuses: Vec<HostStatus> = self
            .snapshots(probe)?
            .iter()
            .map(|snapshot| snapshot.to_host_status(&self.identity))
            .collect();
        if statuses.len() == 1
            && let Some(status) = statuses.pop()
        {
            return Ok(HostStats::Single(status));
        }
        Ok(HostStats::Multiple(statuses))
    }
}

#[cfg(test)]
mod tests;
