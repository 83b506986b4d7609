//! Live-migration handshake checks and the background worker used by
//! `live_migration`.
//!
//! The destination builds [`MigrationHandshakeData`] from its own capacity; the
//! source validates it before the orchestration layer commits to the move.
//! The transfer itself runs on a dedicated thread and reports through the
//! post/recover callbacks.

use std::cmp::Ordering;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{info, warn};

use super::error::{DriverError, DriverResult};
use super::lifecycle::PowerState;
use super::types::InstanceSpec;
use crate::inventory::ResourceCapacity;

/// Compatibility payload produced by the destination and consumed by the
/// source.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MigrationHandshakeData {
    /// Destination node identifier.
    pub destination_node: String,
    /// Hypervisor family on the destination.
    pub hypervisor_type: String,
    /// Hypervisor version on the destination.
    pub hypervisor_version: String,
    /// Memory the destination can still hand out, in MiB.
    pub free_memory_mb: u64,
    /// Local disk the destination can still hand out, in GiB.
    pub free_disk_gb: u64,
    /// Whether disks are copied along with memory.
    pub block_migration: bool,
    /// Whether disk over-commit is allowed on the destination.
    pub disk_over_commit: bool,
}

/// Callback invoked once the transfer succeeded: `(instance, destination)`.
pub type PostMigrationFn = Box<dyn FnOnce(&InstanceSpec, &str) + Send + 'static>;

/// Callback invoked after a failed transfer once the instance is running on
/// the source again: `(instance, destination)`.
pub type RecoverMigrationFn = Box<dyn FnOnce(&InstanceSpec, &str) + Send + 'static>;

/// Handle to a migration running in the background.
#[derive(Debug)]
pub struct MigrationHandle {
    name: String,
    worker: JoinHandle<DriverResult<()>>,
}

impl MigrationHandle {
    /// Instance being migrated.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.name
    }

    /// Blocks until the worker finished and returns the transfer outcome.
    ///
    /// The callbacks have already run by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns the transfer error, or [`DriverError::MigrationFailed`] when
    /// the worker panicked.
    pub fn join(self) -> DriverResult<()> {
        let name = self.name;
        self.worker
            .join()
            .unwrap_or_else(|_| {
                Err(DriverError::MigrationFailed {
                    name,
                    reason: String::from("migration worker panicked"),
                })
            })
    }
}

/// Builds the handshake the destination hands back to the orchestrator.
#[must_use]
pub fn destination_handshake(
    destination: &ResourceCapacity,
    block_migration: bool,
    disk_over_commit: bool,
) -> MigrationHandshakeData {
    MigrationHandshakeData {
        destination_node: destination.hypervisor_hostname.clone(),
        hypervisor_type: destination.hypervisor_type.clone(),
        hypervisor_version: destination.hypervisor_version.clone(),
        free_memory_mb: destination.memory_mb.saturating_sub(destination.memory_mb_used),
        free_disk_gb: destination.local_gb.saturating_sub(destination.local_gb_used),
        block_migration,
        disk_over_commit,
    }
}

/// Validates that `instance` can move from `source` to the destination
/// described by `handshake`.
///
/// # Errors
///
/// Returns [`DriverError::MigrationIncompatible`] naming the first failed
/// check.
pub fn check_source_compatible(
    source: &ResourceCapacity,
    instance: &InstanceSpec,
    state: PowerState,
    handshake: &MigrationHandshakeData,
) -> DriverResult<()> {
    let incompatible = |reason: String| Err(DriverError::MigrationIncompatible { reason });

    if state != PowerState::Running {
        return incompatible(format!("instance {} is {state}", instance.name));
    }
    if handshake.destination_node == source.hypervisor_hostname {
        return incompatible(format!(
            "source and destination are the same node {}",
            source.hypervisor_hostname
        ));
    }
    if handshake.hypervisor_type != source.hypervisor_type {
        return incompatible(format!(
            "hypervisor type {} differs from source {}",
            handshake.hypervisor_type, source.hypervisor_type
        ));
    }
    if compare_versions(&handshake.hypervisor_version, &source.hypervisor_version)
        == Ordering::Less
    {
        return incompatible(format!(
            "destination hypervisor {} is older than source {}",
            handshake.hypervisor_version, source.hypervisor_version
        ));
    }
    if handshake.free_memory_mb < instance.memory_mb {
        return incompatible(format!(
            "destination has {} MiB free, instance needs {}",
            handshake.free_memory_mb, instance.memory_mb
        ));
    }
    if handshake.block_migration
        && !handshake.disk_over_commit
        && handshake.free_disk_gb < instance.root_gb
    {
        return incompatible(format!(
            "destination has {} GiB disk free, instance needs {}",
            handshake.free_disk_gb, instance.root_gb
        ));
    }
    Ok(())
}

/// Orders dotted version strings numerically, falling back to a plain string
/// comparison for non-numeric components.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left_parts = left.split('.');
    let mut right_parts = right.split('.');
    loop {
        match (left_parts.next(), right_parts.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Runs `transfer` on a dedicated thread and dispatches the callbacks.
///
/// `transfer` is responsible for restoring the source record before it
/// returns an error; `recover` runs only after that.
pub(crate) fn spawn_migration<F>(
    instance: InstanceSpec,
    dest: String,
    post_method: PostMigrationFn,
    recover_method: RecoverMigrationFn,
    transfer: F,
) -> DriverResult<MigrationHandle>
where
    F: FnOnce(&InstanceSpec, &str) -> DriverResult<()> + Send + 'static,
{
    let name = instance.name.clone();
    let worker = thread::Builder::new()
        .name(format!("live-migration-{name}"))
        .spawn(move || match transfer(&instance, &dest) {
            Ok(()) => {
                info!(instance = %instance.name, dest = %dest, "live migration completed");
                post_method(&instance, &dest);
                Ok(())
            }
            Err(err) => {
                warn!(
                    instance = %instance.name,
                    dest = %dest,
                    error = %err,
                    "live migration failed; instance stays on source"
                );
                recover_method(&instance, &dest);
                Err(err)
            }
        })
        .map_err(|err| DriverError::MigrationFailed {
            name: name.clone(),
            reason: err.to_string(),
        })?;

    Ok(MigrationHandle { name, worker })
}
