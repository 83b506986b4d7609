//! Authoritative name → record map used by backends to validate lifecycle
//! operations and answer queries.
//!
//! The registry is a plain value; backends that share it across threads wrap
//! it in a mutex.

use std::collections::{BTreeMap, HashMap};

use tracing::info;
use uuid::Uuid;

use crate::driver::{ConnectionInfo, DriverError, DriverResult, InstanceSpec, LifecycleOp, PowerState};

/// One registered instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRecord {
    /// Shape requested at spawn time.
    pub spec: InstanceSpec,
    /// Current lifecycle state.
    pub state: PowerState,
    /// State held before `rescue`, restored by `unrescue`.
    pub rescued_from: Option<PowerState>,
    /// Destination of an in-flight migration.
    pub migrating_to: Option<String>,
}

/// Resources claimed by registered instances.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResourceUsage {
    /// Virtual CPUs.
    pub vcpus: u32,
    /// Memory in MiB.
    pub memory_mb: u64,
    /// Root disk in GiB.
    pub disk_gb: u64,
}

/// Instance records plus the per-instance mountpoint map.
#[derive(Clone, Debug, Default)]
pub struct InstanceRegistry {
    records: HashMap<String, InstanceRecord>,
    mounts: HashMap<String, BTreeMap<String, ConnectionInfo>>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spec` in `BUILDING`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceExists`] when the name is taken.
    pub fn insert(&mut self, spec: &InstanceSpec) -> DriverResult<PowerState> {
        self.admit(spec, LifecycleOp::Spawn)
    }

    /// Registers `spec` in whatever state `op` reaches from `NOSTATE`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceExists`] when the name is taken, or
    /// [`DriverError::InvalidTransition`] when `op` cannot create a record.
    pub fn admit(&mut self, spec: &InstanceSpec, op: LifecycleOp) -> DriverResult<PowerState> {
        if self.records.contains_key(&spec.name) {
            return Err(DriverError::InstanceExists {
                name: spec.name.clone(),
            });
        }
        let state = PowerState::NoState
            .apply(op, None)
            .ok_or_else(|| invalid(&spec.name, PowerState::NoState, op))?;
        self.records.insert(
            spec.name.clone(),
            InstanceRecord {
                spec: spec.clone(),
                state,
                rescued_from: None,
                migrating_to: None,
            },
        );
        info!(instance = %spec.name, state = %state, "instance registered");
        Ok(state)
    }

    /// Records `spec` in `state` as observed on a hypervisor, replacing the
    /// state of an existing record. Used when reconciling with a backend.
    pub fn adopt(&mut self, spec: InstanceSpec, state: PowerState) {
        info!(instance = %spec.name, state = %state, "instance adopted");
        self.records
            .entry(spec.name.clone())
            .and_modify(|record| record.state = state)
            .or_insert(InstanceRecord {
                spec,
                state,
                rescued_from: None,
                migrating_to: None,
            });
    }

    /// Record for `name`, if registered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InstanceRecord> {
        self.records.get(name)
    }

    /// Record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when absent.
    pub fn require(&self, name: &str) -> DriverResult<&InstanceRecord> {
        self.records.get(name).ok_or_else(|| DriverError::not_found(name))
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Computes the state `op` would reach without committing it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`].
    pub fn check(&self, name: &str, op: LifecycleOp) -> DriverResult<PowerState> {
        let record = self.require(name)?;
        record
            .state
            .apply(op, record.rescued_from)
            .ok_or_else(|| invalid(name, record.state, op))
    }

    /// Validates and commits `op` on `name`, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] or
    /// [`DriverError::InvalidTransition`]; the record is unchanged on error.
    pub fn transition(&mut self, name: &str, op: LifecycleOp) -> DriverResult<PowerState> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| DriverError::not_found(name))?;
        let previous = record.state;
        let next = previous
            .apply(op, record.rescued_from)
            .ok_or_else(|| invalid(name, previous, op))?;
        match op {
            LifecycleOp::Rescue => record.rescued_from = Some(previous),
            LifecycleOp::Unrescue => record.rescued_from = None,
            _ => {}
        }
        record.state = next;
        info!(instance = %name, from = %previous, to = %next, operation = %op, "lifecycle transition");
        Ok(next)
    }

    /// Forces `name` back to `RUNNING` and clears migration bookkeeping.
    /// Used by `finish_revert_migration` once `RevertMigration` was checked.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when absent.
    pub fn restore_running(&mut self, name: &str) -> DriverResult<()> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| DriverError::not_found(name))?;
        record.state = PowerState::Running;
        record.migrating_to = None;
        Ok(())
    }

    /// Records that a live migration of `name` to `dest` has started.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when absent, or
    /// [`DriverError::InvalidTransition`] when `name` is not running or is
    /// already migrating.
    pub fn begin_live_migration(&mut self, name: &str, dest: &str) -> DriverResult<()> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| DriverError::not_found(name))?;
        let op = LifecycleOp::LiveMigrate;
        if record.migrating_to.is_some() {
            return Err(DriverError::InvalidTransition {
                name: name.to_owned(),
                state: String::from("migrating"),
                operation: op.name().to_owned(),
            });
        }
        record
            .state
            .apply(op, record.rescued_from)
            .ok_or_else(|| invalid(name, record.state, op))?;
        record.migrating_to = Some(dest.to_owned());
        Ok(())
    }

    /// Clears the migration destination of `name` and keeps its state.
    /// Unknown names are ignored.
    pub fn abort_migration(&mut self, name: &str) {
        if let Some(record) = self.records.get_mut(name) {
            record.migrating_to = None;
        }
    }

    /// Records that `name` is migrating to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when absent.
    pub fn mark_migrating(&mut self, name: &str, dest: &str) -> DriverResult<()> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| DriverError::not_found(name))?;
        record.migrating_to = Some(dest.to_owned());
        Ok(())
    }

    /// Removes `name` together with its mountpoints.
    pub fn remove(&mut self, name: &str) -> Option<InstanceRecord> {
        self.mounts.remove(name);
        self.records.remove(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instance identifiers in name order.
    #[must_use]
    pub fn uuids(&self) -> Vec<Uuid> {
        self.names()
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|record| record.spec.uuid)
            .collect()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records `connection_info` at `mountpoint`, replacing any previous
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InstanceNotFound`] when `name` is absent.
    pub fn attach(
        &mut self,
        name: &str,
        mountpoint: &str,
        connection_info: &ConnectionInfo,
    ) -> DriverResult<()> {
        self.require(name)?;
        self.mounts
            .entry(name.to_owned())
            .or_default()
            .insert(mountpoint.to_owned(), connection_info.clone());
        Ok(())
    }

    /// Forgets `mountpoint`; unknown instances and mountpoints are ignored.
    pub fn detach(&mut self, name: &str, mountpoint: &str) -> Option<ConnectionInfo> {
        let mounts = self.mounts.get_mut(name)?;
        let removed = mounts.remove(mountpoint);
        if mounts.is_empty() {
            self.mounts.remove(name);
        }
        removed
    }

    /// Mountpoints of `name`.
    #[must_use]
    pub fn mounts(&self, name: &str) -> BTreeMap<String, ConnectionInfo> {
        self.mounts.get(name).cloned().unwrap_or_default()
    }

    /// Resources claimed by every registered instance.
    #[must_use]
    pub fn usage(&self) -> ResourceUsage {
        self.records
            .values()
            .fold(ResourceUsage::default(), |acc, record| ResourceUsage {
                vcpus: acc.vcpus.saturating_add(record.spec.vcpus),
                memory_mb: acc.memory_mb.saturating_add(record.spec.memory_mb),
                disk_gb: acc.disk_gb.saturating_add(record.spec.root_gb),
            })
    }
}

fn invalid(name: &str, state: PowerState, op: LifecycleOp) -> DriverError {
    DriverError::InvalidTransition {
        name: name.to_owned(),
        state: state.label().to_owned(),
        operation: op.name().to_owned(),
    }
}
