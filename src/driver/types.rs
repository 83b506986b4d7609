//! Value types exchanged across the driver contract.
//!
//! These replace the attribute-style instance lookups of older driver
//! families with named fields.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use super::lifecycle::PowerState;

/// Caller context threaded through contract operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestContext {
    /// Correlation identifier used in logs.
    pub request_id: Uuid,
    /// Project issuing the request, when known.
    pub project_id: Option<String>,
}

impl RequestContext {
    /// Creates a context with a fresh request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            project_id: None,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Requested shape of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Stable identifier assigned by the orchestration layer.
    pub uuid: Uuid,
    /// Unique instance name; the registry key.
    pub name: String,
    /// Virtual CPU count.
    pub vcpus: u32,
    /// Memory in MiB.
    pub memory_mb: u64,
    /// Root disk size in GiB.
    pub root_gb: u64,
}

impl InstanceSpec {
    /// Builds a spec with a generated UUID.
    #[must_use]
    pub fn new(name: impl Into<String>, vcpus: u32, memory_mb: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            vcpus,
            memory_mb,
            root_gb: 0,
        }
    }

    /// Sets the root disk size.
    #[must_use]
    pub const fn with_root_gb(mut self, root_gb: u64) -> Self {
        self.root_gb = root_gb;
        self
    }
}

/// Boot or rescue image metadata.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageMeta {
    /// Image identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Local file holding the image, when the backend must upload it.
    pub local_path: Option<String>,
}

/// File written into the guest at spawn time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InjectedFile {
    /// Absolute guest path.
    pub path: String,
    /// Raw contents.
    pub contents: Vec<u8>,
}

/// A single virtual interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualInterface {
    /// Interface identifier.
    pub id: String,
    /// Hardware address.
    pub mac_address: String,
    /// Bridge or virtual switch the interface joins.
    pub bridge: String,
}

/// Network plumbing handed to the driver; opaque to this crate.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkInfo {
    /// Interfaces attached to the instance.
    pub interfaces: Vec<VirtualInterface>,
}

/// Volume connection details produced by the volume service.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConnectionInfo {
    /// Volume driver type (for example `iscsi`).
    pub driver_volume_type: String,
    /// Driver specific key/value data.
    pub data: BTreeMap<String, String>,
}

/// Block device mapping for one volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDeviceMapping {
    /// Guest device name (for example `/dev/vdb`).
    pub mount_device: String,
    /// Connection details for the volume.
    pub connection_info: ConnectionInfo,
}

/// Block devices associated with an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockDeviceInfo {
    /// Root device name.
    pub root_device_name: Option<String>,
    /// Attached volume mappings.
    pub mappings: Vec<BlockDeviceMapping>,
}

/// Progress marker reported while a snapshot is produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Waiting for the image to be created.
    ImagePendingUpload,
    /// Image upload in progress.
    ImageUploading,
}

/// Runtime view of an instance returned by `get_info`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceInfo {
    /// Current lifecycle state.
    pub state: PowerState,
    /// Maximum memory in KiB.
    pub max_mem_kb: u64,
    /// Memory in use in KiB.
    pub mem_kb: u64,
    /// Virtual CPU count.
    pub num_cpu: u32,
    /// Consumed CPU time in nanoseconds.
    pub cpu_time_ns: u64,
}

/// Counters for one virtual disk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DiskCounters {
    /// Bytes read.
    pub read: i64,
    /// Read requests.
    pub read_req: i64,
    /// Bytes written.
    pub write: i64,
    /// Write requests.
    pub write_req: i64,
    /// Error count; `-1` when the hypervisor does not track errors.
    pub errors: i64,
}

/// Counters for one virtual network interface.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InterfaceCounters {
    /// Bytes received.
    pub rx: i64,
    /// Received packets dropped.
    pub rx_drop: i64,
    /// Receive errors.
    pub rx_errors: i64,
    /// Packets received.
    pub rx_packets: i64,
    /// Bytes transmitted.
    pub tx: i64,
    /// Transmitted packets dropped.
    pub tx_drop: i64,
    /// Transmit errors.
    pub tx_errors: i64,
    /// Packets transmitted.
    pub tx_packets: i64,
}

/// Per-instance diagnostics with a stable key set.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Aggregate CPU time in nanoseconds.
    pub cpu_time_ns: i64,
    /// Memory in KiB.
    pub memory_kb: i64,
    /// Disk counters keyed by device name.
    pub disks: BTreeMap<String, DiskCounters>,
    /// Interface counters keyed by interface name.
    pub interfaces: BTreeMap<String, InterfaceCounters>,
}

impl Diagnostics {
    /// Flattens the record into `<device>_<counter>` keys.
    #[must_use]
    pub fn to_flat_map(&self) -> BTreeMap<String, i64> {
        let mut flat = BTreeMap::new();
        flat.insert(String::from("cpu0_time"), self.cpu_time_ns);
        flat.insert(String::from("memory"), self.memory_kb);
        for (disk, counters) in &self.disks {
            for (key, value) in [
                ("read", counters.read),
                ("read_req", counters.read_req),
                ("write", counters.write),
                ("write_req", counters.write_req),
                ("errors", counters.errors),
            ] {
                flat.insert(format!("{disk}_{key}"), value);
            }
        }
        for (iface, counters) in &self.interfaces {
            for (key, value) in [
                ("rx", counters.rx),
                ("rx_drop", counters.rx_drop),
                ("rx_errors", counters.rx_errors),
                ("rx_packets", counters.rx_packets),
                ("tx", counters.tx),
                ("tx_drop", counters.tx_drop),
                ("tx_errors", counters.tx_errors),
                ("tx_packets", counters.tx_packets),
            ] {
                flat.insert(format!("{iface}_{key}"), value);
            }
        }
        flat
    }
}

/// Details a volume service needs to export a volume to this host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VolumeConnector {
    /// Host address.
    pub ip: String,
    /// Storage initiator name.
    pub initiator: String,
    /// Host name.
    pub host: String,
}

/// Host power actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostPowerAction {
    /// Restart the host.
    Reboot,
    /// Power the host off.
    Shutdown,
    /// Power the host on.
    Startup,
}

/// Cold migration bookkeeping passed between source and destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationRecord {
    /// Migration identifier.
    pub id: Uuid,
    /// Node the instance leaves.
    pub source_node: String,
    /// Node the instance lands on.
    pub dest_node: String,
}

impl MigrationRecord {
    /// Creates a record with a fresh identifier.
    #[must_use]
    pub fn new(source_node: impl Into<String>, dest_node: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_node: source_node.into(),
            dest_node: dest_node.into(),
        }
    }
}
