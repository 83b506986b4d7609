//! Driver capability contract.
//!
//! A backend exposes the full instance lifecycle through [`Driver`]. Every
//! backend drives the same [`PowerState`] machine and reports failures with
//! the same [`DriverError`] kinds, so the orchestration layer can treat the
//! in-memory and remote backends interchangeably.
//!
//! Calls block until the backend finished the operation. `live_migration` is
//! the exception: it returns once the transfer is running on its own thread
//! and signals the outcome through the supplied callbacks.

mod error;
mod lifecycle;
mod migration;
mod types;

pub use error::{DriverError, DriverResult, TransferDirection};
pub use lifecycle::{LifecycleOp, PowerState, RebootType};
pub(crate) use migration::spawn_migration;
pub use migration::{
    MigrationHandle, MigrationHandshakeData, PostMigrationFn, RecoverMigrationFn,
    check_source_compatible, destination_handshake,
};
pub use types::{
    BlockDeviceInfo, BlockDeviceMapping, ConnectionInfo, Diagnostics, DiskCounters,
    HostPowerAction, ImageMeta, InjectedFile, InstanceInfo, InstanceSpec, InterfaceCounters,
    MigrationRecord, NetworkInfo, RequestContext, TaskState, VirtualInterface, VolumeConnector,
};

use uuid::Uuid;

use crate::inventory::{HostStats, ResourceCapacity};

/// Operations every compute backend exposes to the orchestration layer.
///
/// Callers serialise mutating calls per instance name; implementations only
/// guarantee consistency of their own registry.
pub trait Driver: Send + Sync {
    /// Short backend name used in errors and logs.
    fn backend_name(&self) -> &'static str;

    /// Prepares the backend to serve `host`.
    ///
    /// # Errors
    ///
    /// Returns a backend specific error when the host cannot be reached.
    fn init_host(&self, host: &str) -> DriverResult<()>;

    /// Names of all instances the backend knows about.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot enumerate its instances.
    fn list_instances(&self) -> DriverResult<Vec<String>>;

    /// Identifiers of all instances the backend knows about, ordered by
    /// instance name.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot enumerate its instances.
    fn list_instance_uuids(&self) -> DriverResult<Vec<Uuid>>;

    /// Creates `instance` and leaves it running.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceExists`] when the name is already
    /// registered, or a channel error from the backend.
    #[expect(clippy::too_many_arguments, reason = "mirrors the contract's argument shape")]
    fn spawn(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        image: &ImageMeta,
        injected_files: &[InjectedFile],
        admin_password: Option<&str>,
        network_info: &NetworkInfo,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()>;

    /// Removes `instance`. Destroying an unknown instance logs a warning and
    /// succeeds so the call can be repeated safely.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the backend fails to tear the instance
    /// down.
    fn destroy(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
        block_device_info: Option<&BlockDeviceInfo>,
        destroy_disks: bool,
    ) -> DriverResult<()>;

    /// Restarts `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`] when the reboot type is not legal
    /// from the current state.
    fn reboot(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
        reboot_type: RebootType,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()>;

    /// Stops a running instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn power_off(&self, instance: &InstanceSpec) -> DriverResult<()>;

    /// Starts a stopped instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn power_on(&self, instance: &InstanceSpec) -> DriverResult<()>;

    /// Freezes a running instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn pause(&self, instance: &InstanceSpec) -> DriverResult<()>;

    /// Thaws a paused instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn unpause(&self, instance: &InstanceSpec) -> DriverResult<()>;

    /// Saves and stops a running instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn suspend(&self, instance: &InstanceSpec) -> DriverResult<()>;

    /// Restores a suspended instance.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn resume(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()>;

    /// Boots `instance` from `rescue_image`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn rescue(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
        rescue_image: &ImageMeta,
        rescue_password: Option<&str>,
    ) -> DriverResult<()>;

    /// Leaves rescue mode, returning to the state held before `rescue`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn unrescue(&self, instance: &InstanceSpec, network_info: &NetworkInfo) -> DriverResult<()>;

    /// Captures an image of `instance` named `name`.
    ///
    /// `update_task_state` is invoked at least once with
    /// [`TaskState::ImageUploading`] before the call returns successfully.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotRunning`] when the instance is not
    /// registered with this backend.
    fn snapshot(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        name: &str,
        update_task_state: &mut dyn FnMut(TaskState),
    ) -> DriverResult<()>;

    /// Runtime view of `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] for unknown instances.
    fn get_info(&self, instance: &InstanceSpec) -> DriverResult<InstanceInfo>;

    /// Per-device counters for `instance_name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] for unknown instances.
    fn get_diagnostics(&self, instance_name: &str) -> DriverResult<Diagnostics>;

    /// Attaches a volume to `instance` at `mountpoint`.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the backend fails to attach.
    fn attach_volume(
        &self,
        connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()>;

    /// Detaches the volume at `mountpoint`. Unknown mountpoints are ignored.
    ///
    /// # Errors
    ///
    /// Returns a channel error when the backend fails to detach.
    fn detach_volume(
        &self,
        connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()>;

    /// Console log of `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] for unknown instances.
    fn get_console_output(&self, instance: &InstanceSpec) -> DriverResult<String>;

    /// Capacity snapshot for `node`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownNode`] when `node` is not configured.
    fn get_available_resource(&self, node: &str) -> DriverResult<ResourceCapacity>;

    /// Host status for every configured node.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoNodesConfigured`] when the node set is empty.
    fn get_host_stats(&self, refresh: bool) -> DriverResult<HostStats>;

    /// Node identifiers this backend serves.
    fn get_available_nodes(&self) -> Vec<String>;

    /// Details a volume service needs to export volumes to this host.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] for unknown instances.
    fn get_volume_connector(&self, instance: &InstanceSpec) -> DriverResult<VolumeConnector>;

    /// Reboots, shuts down or starts the host; returns the action performed.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnsupportedOperation`] when the backend cannot
    /// control host power.
    fn host_power_action(&self, host: &str, action: HostPowerAction)
    -> DriverResult<HostPowerAction>;

    /// Enters or leaves maintenance mode; returns `on_maintenance` or
    /// `off_maintenance`.
    ///
    /// # Errors
    ///
    /// Returns a backend specific error when the mode cannot change.
    fn host_maintenance_mode(&self, host: &str, enable: bool) -> DriverResult<String> {
        let _ = host;
        Ok(String::from(if enable {
            "on_maintenance"
        } else {
            "off_maintenance"
        }))
    }

    /// Allows or refuses new instances on the host; returns `enabled` or
    /// `disabled`.
    ///
    /// # Errors
    ///
    /// Returns a backend specific error when the flag cannot change.
    fn set_host_enabled(&self, host: &str, enabled: bool) -> DriverResult<String> {
        let _ = host;
        Ok(String::from(if enabled { "enabled" } else { "disabled" }))
    }

    /// Plugs virtual interfaces; network plumbing lives outside this crate.
    ///
    /// # Errors
    ///
    /// The default implementation never fails.
    fn plug_vifs(&self, instance: &InstanceSpec, network_info: &NetworkInfo) -> DriverResult<()> {
        let _ = (instance, network_info);
        Ok(())
    }

    /// Unplugs virtual interfaces; network plumbing lives outside this crate.
    ///
    /// # Errors
    ///
    /// The default implementation never fails.
    fn unplug_vifs(&self, instance: &InstanceSpec, network_info: &NetworkInfo) -> DriverResult<()> {
        let _ = (instance, network_info);
        Ok(())
    }

    /// Destination-side compatibility check.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownNode`] when the destination node is not
    /// served by this backend.
    fn check_can_live_migrate_destination(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        src_info: &ResourceCapacity,
        dst_info: &ResourceCapacity,
        block_migration: bool,
        disk_over_commit: bool,
    ) -> DriverResult<MigrationHandshakeData>;

    /// Releases whatever the destination check set aside. Nothing is held
    /// by default.
    ///
    /// # Errors
    ///
    /// The default implementation never fails.
    fn check_can_live_migrate_destination_cleanup(
        &self,
        ctxt: &RequestContext,
        handshake: &MigrationHandshakeData,
    ) -> DriverResult<()> {
        let _ = (ctxt, handshake);
        Ok(())
    }

    /// Source-side compatibility check using the destination's handshake.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MigrationIncompatible`] when the pair cannot
    /// migrate.
    fn check_can_live_migrate_source(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        handshake: &MigrationHandshakeData,
    ) -> DriverResult<()>;

    /// Prepares the destination host to receive `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceExists`] when the destination already
    /// hosts an instance of the same name.
    fn pre_live_migration(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        block_device_info: Option<&BlockDeviceInfo>,
        network_info: &NetworkInfo,
        migrate_data: Option<&MigrationHandshakeData>,
    ) -> DriverResult<()>;

    /// Starts moving `instance` to `dest` on a background thread.
    ///
    /// `post_method` runs after a successful transfer; `recover_method` runs
    /// after any transfer failure, once the instance is running on the source
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] synchronously when the
    /// instance is unknown; transfer failures are reported through the
    /// callbacks and [`MigrationHandle::join`].
    #[expect(clippy::too_many_arguments, reason = "mirrors the contract's argument shape")]
    fn live_migration(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        dest: &str,
        post_method: PostMigrationFn,
        recover_method: RecoverMigrationFn,
        block_migration: bool,
        migrate_data: Option<&MigrationHandshakeData>,
    ) -> DriverResult<MigrationHandle>;

    /// Powers the instance off on the source ahead of a cold migration and
    /// returns its disk description.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    fn migrate_disk_and_power_off(
        &self,
        ctxt: &RequestContext,
        instance: &InstanceSpec,
        dest: &str,
        network_info: &NetworkInfo,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<String>;

    /// Completes a migration on the destination; the instance ends running.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceExists`] when the destination already
    /// hosts an instance of the same name.
    #[expect(clippy::too_many_arguments, reason = "mirrors the contract's argument shape")]
    fn finish_migration(
        &self,
        ctxt: &RequestContext,
        migration: &MigrationRecord,
        instance: &InstanceSpec,
        disk_info: &str,
        network_info: &NetworkInfo,
        image: &ImageMeta,
        resize_instance: bool,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()>;

    /// Confirms a finished migration by discarding source-side resources.
    ///
    /// # Errors
    ///
    /// Returns a channel error when cleanup fails.
    fn confirm_migration(
        &self,
        migration: &MigrationRecord,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
    ) -> DriverResult<()>;

    /// Restores the source after the destination never confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when the source no longer
    /// holds the instance.
    fn finish_revert_migration(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
        block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()>;

    /// Installs hypervisor firewall rules; only some hypervisors offer it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnsupportedOperation`] unless overridden.
    fn ensure_filtering_rules_for_instance(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
    ) -> DriverResult<()> {
        let _ = (instance, network_info);
        Err(DriverError::unsupported(
            "ensure_filtering_rules_for_instance",
            self.backend_name(),
        ))
    }

    /// Removes hypervisor firewall rules; only some hypervisors offer it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnsupportedOperation`] unless overridden.
    fn unfilter_instance(
        &self,
        instance: &InstanceSpec,
        network_info: &NetworkInfo,
    ) -> DriverResult<()> {
        let _ = (instance, network_info);
        Err(DriverError::unsupported(
            "unfilter_instance",
            self.backend_name(),
        ))
    }
}
