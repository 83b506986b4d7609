//! In-memory backend.
//!
//! [`MemoryDriver`] keeps every instance in an [`InstanceRegistry`] and
//! reports inventory from a static [`HostProfile`]. It honours the same
//! lifecycle and error contract as the remote backend, which makes it the
//! reference for orchestration tests and for hosts without a hypervisor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{
    BlockDeviceInfo, ConnectionInfo, Diagnostics, DiskCounters, Driver, DriverError,
    DriverResult, HostPowerAction, ImageMeta, InjectedFile, InstanceInfo, InstanceSpec,
    InterfaceCounters, LifecycleOp, MigrationHandle, MigrationHandshakeData, MigrationRecord,
    NetworkInfo, PostMigrationFn, PowerState, RebootType, RecoverMigrationFn, RequestContext,
    TaskState, VolumeConnector, check_source_compatible, destination_handshake, spawn_migration,
};
use crate::inventory::{
    HostIdentity, HostSnapshot, HostStats, InventoryReporter, NodeProbe, NodeSet,
    ResourceCapacity,
};
use crate::registry::{InstanceRegistry, ResourceUsage};

/// Node served when none is configured explicitly.
pub const DEFAULT_NODE: &str = "fake-mini";

/// Canned console log.
pub const CONSOLE_OUTPUT: &str = "FAKE CONSOLE OUTPUT\nANOTHER\nLAST LINE";

const BACKEND_NAME: &str = "memory";

/// Static capacity reported for every node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostProfile {
    /// Virtual CPUs per node.
    pub vcpus: u32,
    /// Memory per node in MiB.
    pub memory_mb: u64,
    /// Local disk per node in GiB.
    pub local_gb: u64,
    /// Hypervisor family.
    pub hypervisor_type: String,
    /// Hypervisor version.
    pub hypervisor_version: String,
    /// CPU description.
    pub cpu_info: String,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            vcpus: 4,
            memory_mb: 8192,
            local_gb: 1028,
            hypervisor_type: String::from("fake"),
            hypervisor_version: String::from("1.0"),
            cpu_info: String::from("?"),
        }
    }
}

/// Reports the profile minus what registered instances claim.
struct UsageProbe<'a> {
    profile: &'a HostProfile,
    usage: ResourceUsage,
}

impl NodeProbe for UsageProbe<'_> {
    fn probe(&self, node: &str) -> DriverResult<HostSnapshot> {
        Ok(HostSnapshot {
            node_id: node.to_owned(),
            cpu_total: self.profile.vcpus,
            cpu_used: self.usage.vcpus,
            memory_total_mb: self.profile.memory_mb,
            memory_used_mb: self.usage.memory_mb,
            disk_total_gb: self.profile.local_gb,
            disk_used_gb: self.usage.disk_gb,
            hypervisor_type: self.profile.hypervisor_type.clone(),
            hypervisor_version: self.profile.hypervisor_version.clone(),
            cpu_info: self.profile.cpu_info.clone(),
        })
    }
}

/// Registry-backed backend. Clones share the same registry.
#[derive(Clone, Debug)]
pub struct MemoryDriver {
    registry: Arc<Mutex<InstanceRegistry>>,
    inventory: InventoryReporter,
    profile: HostProfile,
    migration_fault: Arc<Mutex<Option<String>>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new(NodeSet::single(DEFAULT_NODE), HostProfile::default())
    }
}

impl MemoryDriver {
    /// Creates a backend serving `nodes` with `profile` capacity each.
    #[must_use]
    pub fn new(nodes: NodeSet, profile: HostProfile) -> Self {
        Self {
            registry: Arc::new(Mutex::new(InstanceRegistry::new())),
            inventory: InventoryReporter::new(nodes, HostIdentity::new("127.0.0.1")),
            profile,
            migration_fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a default-profile backend serving `nodes`.
    #[must_use]
    pub fn with_nodes(nodes: NodeSet) -> Self {
        Self::new(nodes, HostProfile::default())
    }

    /// Capacity reported for each node.
    #[must_use]
    pub const fn profile(&self) -> &HostProfile {
        &self.profile
    }

    /// Marks a running instance as crashed, as a hypervisor would report it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`] when the instance is not running.
    pub fn crash_instance(&self, name: &str) -> DriverResult<()> {
        self.transition(name, LifecycleOp::Crash)
    }

    /// Makes the next live migration fail with `reason`.
    pub fn fail_next_migration(&self, reason: impl Into<String>) {
        *self
            .migration_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Current state of `name`, if registered.
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<PowerState> {
        self.registry().get(name).map(|record| record.state)
    }

    fn registry(&self) -> MutexGuard<'_, InstanceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, name: &str, op: LifecycleOp) -> DriverResult<()> {
        self.registry().transition(name, op).map(|_| ())
    }

    fn probe(&self) -> UsageProbe<'_> {
        UsageProbe {
            profile: &self.profile,
            usage: self.registry().usage(),
        }
    }

    fn source_capacity(&self) -> DriverResult<ResourceCapacity> {
        let node = self
            .inventory
            .nodes()
            .iter()
            .next()
            .ok_or(DriverError::NoNodesConfigured)?;
        self.inventory.available_resource(&self.probe(), node)
    }
}

impl Driver for MemoryDriver {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn init_host(&self, host: &str) -> DriverResult<()> {
        debug!(host, "memory backend ready");
        Ok(())
    }

    fn list_instances(&self) -> DriverResult<Vec<String>> {
        Ok(self.registry().names())
    }

    fn list_instance_uuids(&self) -> DriverResult<Vec<Uuid>> {
        Ok(self.registry().uuids())
    }

    fn spawn(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        image: &ImageMeta,
        _injected_files: &[InjectedFile],
        _admin_password: Option<&str>,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        let mut registry = self.registry();
        registry.insert(instance)?;
        registry.transition(&instance.name, LifecycleOp::Provisioned)?;
        debug!(instance = %instance.name, image = %image.id, "instance spawned");
        Ok(())
    }

    fn destroy(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
        _destroy_disks: bool,
    ) -> DriverResult<()> {
        let mut registry = self.registry();
        if !registry.contains(&instance.name) {
            warn!(instance = %instance.name, "destroy requested for unknown instance");
            return Ok(());
        }
        registry.remove(&instance.name);
        info!(instance = %instance.name, "instance destroyed");
        Ok(())
    }

    fn reboot(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        reboot_type: RebootType,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Reboot(reboot_type))
    }

    fn power_off(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::PowerOff)
    }

    fn power_on(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::PowerOn)
    }

    fn pause(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Pause)
    }

    fn unpause(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Unpause)
    }

    fn suspend(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Suspend)
    }

    fn resume(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Resume)
    }

    fn rescue(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _rescue_image: &ImageMeta,
        _rescue_password: Option<&str>,
    ) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Rescue)
    }

    fn unrescue(&self, instance: &InstanceSpec, _network_info: &NetworkInfo) -> DriverResult<()> {
        self.transition(&instance.name, LifecycleOp::Unrescue)
    }

    fn snapshot(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        name: &str,
        update_task_state: &mut dyn FnMut(TaskState),
    ) -> DriverResult<()> {
        if !self.registry().contains(&instance.name) {
            return Err(DriverError::InstanceNotRunning {
                name: instance.name.clone(),
            });
        }
        update_task_state(TaskState::ImagePendingUpload);
        update_task_state(TaskState::ImageUploading);
        debug!(instance = %instance.name, snapshot = name, "snapshot recorded");
        Ok(())
    }

    fn get_info(&self, instance: &InstanceSpec) -> DriverResult<InstanceInfo> {
        let registry = self.registry();
        let record = registry.require(&instance.name)?;
        let memory_kb = record.spec.memory_mb.saturating_mul(1024);
        Ok(InstanceInfo {
            state: record.state,
            max_mem_kb: memory_kb,
            mem_kb: memory_kb,
            num_cpu: record.spec.vcpus,
            cpu_time_ns: 0,
        })
    }

    fn get_diagnostics(&self, instance_name: &str) -> DriverResult<Diagnostics> {
        let registry = self.registry();
        let record = registry.require(instance_name)?;
        let mut diagnostics = Diagnostics {
            cpu_time_ns: 17_300_000_000,
            memory_kb: i64::try_from(record.spec.memory_mb.saturating_mul(1024))
                .unwrap_or(i64::MAX),
            ..Diagnostics::default()
        };
        diagnostics.disks.insert(
            String::from("vda"),
            DiskCounters {
                read: 262_144,
                read_req: 112,
                write: 5_778_432,
                write_req: 488,
                errors: -1,
            },
        );
        diagnostics.interfaces.insert(
            String::from("vnet1"),
            InterfaceCounters {
                rx: 2_070_139,
                rx_drop: 0,
                rx_errors: 0,
                rx_packets: 26_701,
                tx: 140_208,
                tx_drop: 0,
                tx_errors: 0,
                tx_packets: 662,
            },
        );
        Ok(diagnostics)
    }

    fn attach_volume(
        &self,
        connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()> {
        self.registry()
            .attach(&instance.name, mountpoint, connection_info)?;
        debug!(instance = %instance.name, mountpoint, "volume attached");
        Ok(())
    }

    fn detach_volume(
        &self,
        _connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()> {
        if self.registry().detach(&instance.name, mountpoint).is_none() {
            debug!(instance = %instance.name, mountpoint, "nothing mounted; detach ignored");
        }
        Ok(())
    }

    fn get_console_output(&self, instance: &InstanceSpec) -> DriverResult<String> {
        self.registry().require(&instance.name)?;
        Ok(String::from(CONSOLE_OUTPUT))
    }

    fn get_available_resource(&self, node: &str) -> DriverResult<ResourceCapacity> {
        self.inventory.available_resource(&self.probe(), node)
    }

    fn get_host_stats(&self, _refresh: bool) -> DriverResult<HostStats> {
        self.inventory.host_stats(&self.probe())
    }

    fn get_available_nodes(&self) -> Vec<String> {
        self.inventory.nodes().to_vec()
    }

    fn get_volume_connector(&self, instance: &InstanceSpec) -> DriverResult<VolumeConnector> {
        self.registry().require(&instance.name)?;
        Ok(VolumeConnector {
            ip: self.inventory.identity().host_ip_address.clone(),
            initiator: String::from("fake"),
            host: String::from("fakehost"),
        })
    }

    fn host_power_action(
        &self,
        host: &str,
        action: HostPowerAction,
    ) -> DriverResult<HostPowerAction> {
        info!(host, action = ?action, "host power action");
        Ok(action)
    }

    fn check_can_live_migrate_destination(
        &self,
        _ctxt: &RequestContext,
        _instance: &InstanceSpec,
        _src_info: &ResourceCapacity,
        dst_info: &ResourceCapacity,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> DriverResult<MigrationHandshakeData> {
        if !self.inventory.nodes().contains(&dst_info.hypervisor_hostname) {
            return Err(DriverError::UnknownNode {
                node: dst_info.hypervisor_hostname.clone(),
            });
        }
        Ok(destination_handshake(
            dst_info,
            block_migration,
            disk_over_commit,
        ))
    }

    fn check_can_live_migrate_source(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        handshake: &MigrationHandshakeData,
    ) -> DriverResult<()> {
        let state = self.registry().require(&instance.name)?.state;
        check_source_compatible(&self.source_capacity()?, instance, state, handshake)
    }

    fn pre_live_migration(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        _block_device_info: Option<&BlockDeviceInfo>,
        _network_info: &NetworkInfo,
        _migrate_data: Option<&MigrationHandshakeData>,
    ) -> DriverResult<()> {
        if self.registry().contains(&instance.name) {
            return Err(DriverError::InstanceExists {
                name: instance.name.clone(),
            });
        }
        debug!(instance = %instance.name, "destination prepared");
        Ok(())
    }

    fn live_migration(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        dest: &str,
        post_method: PostMigrationFn,
        recover_method: RecoverMigrationFn,
        _block_migration: bool,
        _migrate_data: Option<&MigrationHandshakeData>,
    ) -> DriverResult<MigrationHandle> {
        self.registry().begin_live_migration(&instance.name, dest)?;

        let registry = Arc::clone(&self.registry);
        let fault = self
            .migration_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        spawn_migration(
            instance.clone(),
            dest.to_owned(),
            post_method,
            recover_method,
            move |spec, _dest| {
                let mut source = registry.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(reason) = fault {
                    source.abort_migration(&spec.name);
                    return Err(DriverError::MigrationFailed {
                        name: spec.name.clone(),
                        reason,
                    });
                }
                source.remove(&spec.name);
                Ok(())
            },
        )
    }

    fn migrate_disk_and_power_off(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        dest: &str,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<String> {
        let mut registry = self.registry();
        if registry.require(&instance.name)?.state != PowerState::Shutoff {
            registry.transition(&instance.name, LifecycleOp::PowerOff)?;
        }
        registry.mark_migrating(&instance.name, dest)?;
        Ok(serde_json::json!({
            "instance": instance.name,
            "root_gb": instance.root_gb,
            "dest": dest,
        })
        .to_string())
    }

    fn finish_migration(
        &self,
        _ctxt: &RequestContext,
        migration: &MigrationRecord,
        instance: &InstanceSpec,
        _disk_info: &str,
        _network_info: &NetworkInfo,
        _image: &ImageMeta,
        _resize_instance: bool,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        self.registry()
            .admit(instance, LifecycleOp::FinishMigration)?;
        info!(instance = %instance.name, source = %migration.source_node, "migration finished");
        Ok(())
    }

    fn confirm_migration(
        &self,
        migration: &MigrationRecord,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
    ) -> DriverResult<()> {
        if self.registry().remove(&instance.name).is_none() {
            warn!(instance = %instance.name, "confirmed migration had no source record");
        }
        debug!(instance = %instance.name, dest = %migration.dest_node, "source resources released");
        Ok(())
    }

    fn finish_revert_migration(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        let mut registry = self.registry();
        registry.check(&instance.name, LifecycleOp::RevertMigration)?;
        registry.restore_running(&instance.name)
    }
}
