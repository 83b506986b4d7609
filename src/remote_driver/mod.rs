//! Backend driving a partition manager through the remote channels.
//!
//! Each lifecycle operation validates the transition against the registry,
//! renders its [`CommandSet`] template, runs it in a fresh privileged
//! session and only then commits the new state. A failed command leaves the
//! registry untouched. Images and snapshots travel over the transfer
//! channel.

mod commands;
mod probe;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use commands::{CommandSet, render};
use commands::render_for;
use probe::RemoteProbe;

use crate::driver::{
    BlockDeviceInfo, ConnectionInfo, Diagnostics, Driver, DriverError, DriverResult,
    HostPowerAction, ImageMeta, InjectedFile, InstanceInfo, InstanceSpec, LifecycleOp,
    MigrationHandle, MigrationHandshakeData, MigrationRecord, NetworkInfo, PostMigrationFn,
    PowerState, RebootType, RecoverMigrationFn, RequestContext, TaskState, VolumeConnector,
    check_source_compatible, destination_handshake, spawn_migration,
};
use crate::inventory::{HostIdentity, HostStats, InventoryReporter, NodeSet, ResourceCapacity};
use crate::registry::InstanceRegistry;
use crate::remote::{
    ChannelError, CommandResult, CommandRunner, ConfigError, ConnectionDescriptor,
    DEFAULT_REMOTE_IMAGE_DIR, DEFAULT_STAGING_DIR, RemoteConfig, SftpOptions, SftpTransfer,
    SshOptions, SshTransport, remote_join, split_remote,
};

const BACKEND_NAME: &str = "remote";

/// Runs one command in its own privileged session and closes the session.
pub(crate) fn run_privileged<R: CommandRunner>(
    transport: &SshTransport<R>,
    descriptor: &ConnectionDescriptor,
    command: &str,
    check_exit_code: bool,
) -> Result<CommandResult, ChannelError> {
    let mut session = transport.connect(descriptor)?;
    let result = session.run_as_privileged(command, check_exit_code);
    session.close();
    result
}

/// Backend for hosts reachable only through a restricted operator shell.
#[derive(Debug)]
pub struct RemoteDriver<R> {
    descriptor: ConnectionDescriptor,
    transport: SshTransport<R>,
    transfer: SftpTransfer<R>,
    commands: CommandSet,
    registry: Arc<Mutex<InstanceRegistry>>,
    inventory: InventoryReporter,
    remote_image_dir: String,
    staging_dir: Utf8PathBuf,
}

impl<R> RemoteDriver<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Creates a backend for `descriptor` serving the endpoint host as its
    /// only node, with the default command set.
    #[must_use]
    pub fn new(
        descriptor: ConnectionDescriptor,
        ssh_options: SshOptions,
        sftp_options: SftpOptions,
        runner: R,
    ) -> Self {
        let nodes = NodeSet::single(descriptor.host());
        let identity = HostIdentity::new(descriptor.host());
        Self {
            transport: SshTransport::new(ssh_options.clone(), runner.clone()),
            transfer: SftpTransfer::new(ssh_options, sftp_options, runner),
            descriptor,
            commands: CommandSet::default(),
            registry: Arc::new(Mutex::new(InstanceRegistry::new())),
            inventory: InventoryReporter::new(nodes, identity),
            remote_image_dir: String::from(DEFAULT_REMOTE_IMAGE_DIR),
            staging_dir: Utf8PathBuf::from(DEFAULT_STAGING_DIR),
        }
    }

    /// Builds a backend from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration does not validate.
    pub fn from_config(config: &RemoteConfig, runner: R) -> Result<Self, ConfigError> {
        let driver = Self::new(
            config.descriptor()?,
            config.ssh_options(),
            config.sftp_options(),
            runner,
        )
        .with_nodes(config.node_set())
        .with_remote_image_dir(&config.remote_image_dir)
        .with_staging_dir(&config.staging_dir);
        Ok(driver)
    }

    /// Replaces the served node set.
    #[must_use]
    pub fn with_nodes(mut self, nodes: NodeSet) -> Self {
        self.inventory = InventoryReporter::new(nodes, self.inventory.identity().clone());
        self
    }

    /// Replaces the command templates.
    #[must_use]
    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = commands;
        self
    }

    /// Sets the remote directory receiving uploaded images.
    #[must_use]
    pub fn with_remote_image_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_image_dir = dir.into();
        self
    }

    /// Sets the local directory receiving downloaded snapshots.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Endpoint this backend manages.
    #[must_use]
    pub const fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Current state of `name` as recorded locally.
    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<PowerState> {
        self.registry().get(name).map(|record| record.state)
    }

    fn registry(&self) -> MutexGuard<'_, InstanceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, command: &str) -> DriverResult<CommandResult> {
        Ok(run_privileged(&self.transport, &self.descriptor, command, true)?)
    }

    fn run_unchecked(&self, command: &str) -> DriverResult<CommandResult> {
        Ok(run_privileged(&self.transport, &self.descriptor, command, false)?)
    }

    fn probe(&self) -> RemoteProbe<'_, R> {
        RemoteProbe {
            transport: &self.transport,
            descriptor: &self.descriptor,
            template: &self.commands.inventory,
        }
    }

    /// Validates `op`, runs `template` for `instance` and commits the
    /// transition.
    fn apply(&self, instance: &InstanceSpec, op: LifecycleOp, template: &str) -> DriverResult<()> {
        self.registry().check(&instance.name, op)?;
        self.run(&render_for(template, instance, &[]))?;
        self.registry().transition(&instance.name, op)?;
        Ok(())
    }

    fn apply_optional(
        &self,
        instance: &InstanceSpec,
        op: LifecycleOp,
        template: Option<&str>,
    ) -> DriverResult<()> {
        let command =
            template.ok_or_else(|| DriverError::unsupported(op.name(), BACKEND_NAME))?;
        self.apply(instance, op, command)
    }

    fn provision(&self, instance: &InstanceSpec, image: &ImageMeta) -> DriverResult<()> {
        self.run(&render_for(&self.commands.create, instance, &[]))?;
        let outcome = self.boot_created(instance, image);
        if outcome.is_err() {
            self.discard_definition(instance);
        }
        outcome
    }

    fn boot_created(&self, instance: &InstanceSpec, image: &ImageMeta) -> DriverResult<()> {
        if let Some(path) = image.local_path.as_deref() {
            let local = Utf8Path::new(path);
            self.transfer
                .put(&self.descriptor, local, &self.remote_image_dir)?;
            let file_name = local.file_name().unwrap_or(local.as_str());
            let image_path = remote_join(&self.remote_image_dir, file_name);
            self.run(&render_for(
                &self.commands.deploy_image,
                instance,
                &[("image_path", image_path.as_str())],
            ))?;
            self.remove_remote_file(&image_path);
        }
        self.run(&render_for(&self.commands.start, instance, &[]))?;
        Ok(())
    }

    fn discard_definition(&self, instance: &InstanceSpec) {
        let command = render_for(&self.commands.destroy, instance, &[]);
        match self.run_unchecked(&command) {
            Ok(result) if result.is_success() => {
                debug!(instance = %instance.name, "partial definition removed");
            }
            Ok(result) => warn!(
                instance = %instance.name,
                status = result.exit_status,
                "failed to remove partial definition"
            ),
            Err(err) => warn!(
                instance = %instance.name,
                error = %err,
                "failed to remove partial definition"
            ),
        }
    }

    fn remove_remote_file(&self, path: &str) {
        let command = render(&self.commands.remove_file, &[("path", path)]);
        if let Err(err) = self.run_unchecked(&command) {
            warn!(path, error = %err, "failed to remove remote file");
        }
    }

    fn remote_status(&self, instance: &InstanceSpec) -> DriverResult<Option<PowerState>> {
        let output = self.run(&render_for(&self.commands.status, instance, &[]))?;
        Ok(PowerState::from_remote_label(&output.stdout_text()))
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

impl<R> Driver for RemoteDriver<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn init_host(&self, host: &str) -> DriverResult<()> {
        let listing = self.run(&self.commands.list)?.stdout_text();
        for name in listing.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let spec = InstanceSpec::new(name, 0, 0);
            match self.remote_status(&spec)? {
                Some(state) => self.registry().adopt(spec, state),
                None => warn!(instance = %name, "unrecognised status; instance skipped"),
            }
        }
        info!(host, instances = self.registry().len(), "host reconciled");
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
        self.registry().insert(instance)?;
        if let Err(err) = self.provision(instance, image) {
            self.registry().remove(&instance.name);
            return Err(err);
        }
        self.registry()
            .transition(&instance.name, LifecycleOp::Provisioned)?;
        Ok(())
    }

    fn destroy(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
        _destroy_disks: bool,
    ) -> DriverResult<()> {
        if !self.registry().contains(&instance.name) {
            warn!(instance = %instance.name, "destroy requested for unknown instance");
            return Ok(());
        }
        self.run_unchecked(&render_for(&self.commands.stop, instance, &[]))?;
        self.run(&render_for(&self.commands.destroy, instance, &[]))?;
        self.registry().remove(&instance.name);
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
        let template = match reboot_type {
            RebootType::Soft => &self.commands.soft_reboot,
            RebootType::Hard => &self.commands.hard_reboot,
        };
        self.apply(instance, LifecycleOp::Reboot(reboot_type), template)
    }

    fn power_off(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.apply(instance, LifecycleOp::PowerOff, &self.commands.stop)
    }

    fn power_on(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.apply(instance, LifecycleOp::PowerOn, &self.commands.start)
    }

    fn pause(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Pause, self.commands.pause.as_deref())
    }

    fn unpause(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Unpause, self.commands.unpause.as_deref())
    }

    fn suspend(&self, instance: &InstanceSpec) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Suspend, self.commands.suspend.as_deref())
    }

    fn resume(
        &self,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _block_device_info: Option<&BlockDeviceInfo>,
    ) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Resume, self.commands.resume.as_deref())
    }

    fn rescue(
        &self,
        _ctxt: &RequestContext,
        instance: &InstanceSpec,
        _network_info: &NetworkInfo,
        _rescue_image: &ImageMeta,
        _rescue_password: Option<&str>,
    ) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Rescue, self.commands.rescue.as_deref())
    }

    fn unrescue(&self, instance: &InstanceSpec, _network_info: &NetworkInfo) -> DriverResult<()> {
        self.apply_optional(instance, LifecycleOp::Unrescue, self.commands.unrescue.as_deref())
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

        let remote_path = remote_join(&self.remote_image_dir, &format!("{name}.img"));
        self.run(&render_for(
            &self.commands.snapshot,
            instance,
            &[("snapshot", remote_path.as_str())],
        ))?;

        update_task_state(TaskState::ImageUploading);
        let (_, file_name) = split_remote(&remote_path);
        let local = self.staging_dir.join(file_name);
        let fetched = self.transfer.get(&self.descriptor, &remote_path, &local);
        self.remove_remote_file(&remote_path);
        fetched?;
        debug!(instance = %instance.name, snapshot = %local, "snapshot staged");
        Ok(())
    }

    fn get_info(&self, instance: &InstanceSpec) -> DriverResult<InstanceInfo> {
        self.registry().require(&instance.name)?;
        let observed = self.remote_status(instance)?;

        let mut registry = self.registry();
        if observed == Some(PowerState::Crashed)
            && registry.check(&instance.name, LifecycleOp::Crash).is_ok()
        {
            registry.transition(&instance.name, LifecycleOp::Crash)?;
        }
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

    fn get_diagnostics(&self, _instance_name: &str) -> DriverResult<Diagnostics> {
        Err(DriverError::unsupported("get_diagnostics", BACKEND_NAME))
    }

    fn attach_volume(
        &self,
        connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()> {
        self.registry().require(&instance.name)?;
        self.run(&render_for(
            &self.commands.attach_volume,
            instance,
            &[
                ("mountpoint", mountpoint),
                ("volume_type", connection_info.driver_volume_type.as_str()),
            ],
        ))?;
        self.registry()
            .attach(&instance.name, mountpoint, connection_info)
    }

    fn detach_volume(
        &self,
        _connection_info: &ConnectionInfo,
        instance: &InstanceSpec,
        mountpoint: &str,
    ) -> DriverResult<()> {
        if !self.registry().mounts(&instance.name).contains_key(mountpoint) {
            debug!(instance = %instance.name, mountpoint, "nothing mounted; detach ignored");
            return Ok(());
        }
        self.run(&render_for(
            &self.commands.detach_volume,
            instance,
            &[("mountpoint", mountpoint)],
        ))?;
        self.registry().detach(&instance.name, mountpoint);
        Ok(())
    }

    fn get_console_output(&self, instance: &InstanceSpec) -> DriverResult<String> {
        self.registry().require(&instance.name)?;
        Ok(self
            .run(&render_for(&self.commands.console, instance, &[]))?
            .stdout_text())
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
        let host = self.descriptor.host();
        Ok(VolumeConnector {
            ip: self.inventory.identity().host_ip_address.clone(),
            initiator: format!("iqn.virtplane:{host}"),
            host: host.to_owned(),
        })
    }

    fn host_power_action(
        &self,
        _host: &str,
        _action: HostPowerAction,
    ) -> DriverResult<HostPowerAction> {
        Err(DriverError::unsupported("host_power_action", BACKEND_NAME))
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

        let transport = self.transport.clone();
        let descriptor = self.descriptor.clone();
        let template = self.commands.migrate.clone();
        let registry = Arc::clone(&self.registry);
        spawn_migration(
            instance.clone(),
            dest.to_owned(),
            post_method,
            recover_method,
            move |spec, target| {
                let command = render_for(&template, spec, &[("dest", target)]);
                let outcome = run_privileged(&transport, &descriptor, &command, true);
                let mut source = registry.lock().unwrap_or_else(PoisonError::into_inner);
                match outcome {
                    Ok(_) => {
                        source.remove(&spec.name);
                        Ok(())
                    }
                    Err(err) => {
                        source.abort_migration(&spec.name);
                        Err(err.into())
                    }
                }
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
        let state = self.registry().require(&instance.name)?.state;
        if state != PowerState::Shutoff {
            self.apply(instance, LifecycleOp::PowerOff, &self.commands.stop)?;
        }
        self.registry().mark_migrating(&instance.name, dest)?;
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
        if self.registry().contains(&instance.name) {
            return Err(DriverError::InstanceExists {
                name: instance.name.clone(),
            });
        }
        self.run(&render_for(&self.commands.create, instance, &[]))?;
        self.run(&render_for(&self.commands.start, instance, &[]))?;
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
        if self.registry().contains(&instance.name) {
            self.run(&render_for(&self.commands.destroy, instance, &[]))?;
            self.registry().remove(&instance.name);
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
        let state = self.registry().require(&instance.name)?.state;
        self.registry()
            .check(&instance.name, LifecycleOp::RevertMigration)?;
        if state == PowerState::Shutoff {
            self.run(&render_for(&self.commands.start, instance, &[]))?;
        }
        self.registry().restore_running(&instance.name)
    }
}

#[cfg(test)]
mod tests;
