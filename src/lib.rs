//! Hypervisor driver layer for the virtplane compute service.
//!
//! The crate exposes the [`Driver`] capability contract with its lifecycle
//! state machine and two backends: [`MemoryDriver`], which simulates a host
//! in memory, and [`RemoteDriver`], which drives a partition manager through
//! a restricted operator shell. The remote channels ([`SshTransport`] and
//! [`SftpTransfer`]) and the host inventory reporter are usable on their own.

pub mod driver;
pub mod inventory;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod remote_driver;
pub mod test_support;

pub use driver::{
    Driver, DriverError, DriverResult, LifecycleOp, MigrationHandle, PowerState, RebootType,
    TransferDirection,
};
pub use inventory::{
    HostIdentity, HostSnapshot, HostStats, HostStatus, InventoryReporter, NodeProbe, NodeSet,
    ResourceCapacity,
};
pub use memory::{HostProfile, MemoryDriver};
pub use registry::{InstanceRecord, InstanceRegistry};
pub use remote::{
    ChannelError, CommandResult, CommandRunner, ConfigError, ConnectionDescriptor, Credential,
    ProcessCommandRunner, RemoteConfig, SftpOptions, SftpTransfer, SshOptions, SshSession,
    SshTransport, remote_join,
};
pub use remote_driver::{CommandSet, RemoteDriver};
