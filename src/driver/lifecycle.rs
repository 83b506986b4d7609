//! Instance lifecycle state machine shared by every backend.
//!
//! Backends never mutate a record's state directly. They ask
//! [`PowerState::apply`] for the target of an operation and only commit it when
//! the transition is legal, so both backends reject the same illegal requests.

use std::fmt;

use serde::Serialize;

/// Observable lifecycle state of an instance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Not yet known to the backend.
    NoState,
    /// Accepted by `spawn` and still provisioning.
    Building,
    /// Running normally.
    Running,
    /// Execution frozen in memory.
    Paused,
    /// State saved and execution stopped.
    Suspended,
    /// Powered off.
    Shutoff,
    /// Booted from a rescue image.
    Rescued,
    /// Detected as failed without a command asking for it.
    Crashed,
    /// Removed by `destroy`; terminal.
    Destroyed,
}

impl PowerState {
    /// Returns the target state for `op` applied to `self`, or `None` when the
    /// transition is not part of the state machine.
    ///
    /// `Unrescue` needs the state recorded when the rescue began, so callers
    /// pass it as `rescued_from`.
    #[must_use]
    pub const fn apply(self, op: LifecycleOp, rescued_from: Option<Self>) -> Option<Self> {
        use LifecycleOp as Op;
        use PowerState as S;

        match (op, self) {
            (Op::Spawn, S::NoState) => Some(S::Building),
            (Op::Provisioned, S::Building)
            | (Op::Reboot(RebootType::Soft), S::Running)
            | (
                Op::Reboot(RebootType::Hard),
                S::Running | S::Shutoff | S::Paused | S::Suspended | S::Crashed,
            )
            | (Op::PowerOn, S::Shutoff)
            | (Op::Unpause, S::Paused)
            | (Op::Resume, S::Suspended)
            | (Op::LiveMigrate, S::Running)
            | (Op::FinishMigration, S::NoState)
            | (Op::RevertMigration, S::Running | S::Shutoff) => Some(S::Running),
            (Op::PowerOff, S::Running) => Some(S::Shutoff),
            (Op::Pause, S::Running) => Some(S::Paused),
            (Op::Suspend, S::Running) => Some(S::Suspended),
            (Op::Rescue, S::Running | S::Shutoff) => Some(S::Rescued),
            (Op::Unrescue, S::Rescued) => match rescued_from {
                Some(S::Shutoff) => Some(S::Shutoff),
                _ => Some(S::Running),
            },
            (Op::Crash, S::Running) => Some(S::Crashed),
            (Op::Destroy, S::Destroyed) => None,
            (Op::Destroy, _) => Some(S::Destroyed),
            _ => None,
        }
    }

    /// Stable lowercase label used in logs and error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NoState => "nostate",
            Self::Building => "building",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Suspended => "suspended",
            Self::Shutoff => "shutoff",
            Self::Rescued => "rescued",
            Self::Crashed => "crashed",
            Self::Destroyed => "destroyed",
        }
    }

    /// Maps a status word reported by a remote endpoint to a state.
    ///
    /// Matching is case-insensitive and accepts the common synonyms used by
    /// partition managers (`not activated`, `error`, ...).
    #[must_use]
    pub fn from_remote_label(label: &str) -> Option<Self> {
        let normalised = label.trim().to_ascii_lowercase();
        let state = match normalised.as_str() {
            "building" | "starting" | "open firmware" => Self::Building,
            "running" | "active" => Self::Running,
            "paused" => Self::Paused,
            "suspended" => Self::Suspended,
            "shutoff" | "shutdown" | "not activated" | "stopped" => Self::Shutoff,
            "rescued" | "rescue" => Self::Rescued,
            "crashed" | "error" | "failed" => Self::Crashed,
            _ => return None,
        };
        Some(state)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reboot flavour requested by the caller.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RebootType {
    /// Graceful guest restart; only valid while running.
    #[default]
    Soft,
    /// Power-cycle; also recovers stopped, paused, suspended or crashed
    /// instances.
    Hard,
}

/// Operations that move an instance through the state machine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleOp {
    /// Record creation.
    Spawn,
    /// Provisioning finished.
    Provisioned,
    /// Restart.
    Reboot(RebootType),
    /// Stop.
    PowerOff,
    /// Start a stopped instance.
    PowerOn,
    /// Freeze.
    Pause,
    /// Thaw.
    Unpause,
    /// Save and stop.
    Suspend,
    /// Restore a suspended instance.
    Resume,
    /// Boot into the rescue image.
    Rescue,
    /// Leave the rescue image.
    Unrescue,
    /// Failure detected by the backend.
    Crash,
    /// Move to another host without stopping; the source stays running
    /// until the move completes.
    LiveMigrate,
    /// Instance lands on a migration destination.
    FinishMigration,
    /// Instance restored on the migration source.
    RevertMigration,
    /// Removal.
    Destroy,
}

impl LifecycleOp {
    /// Operation name as exposed by the driver contract.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Provisioned => "provisioned",
            Self::Reboot(_) => "reboot",
            Self::PowerOff => "power_off",
            Self::PowerOn => "power_on",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Rescue => "rescue",
            Self::Unrescue => "unrescue",
            Self::Crash => "crash",
            Self::LiveMigrate => "live_migration",
            Self::FinishMigration => "finish_migration",
            Self::RevertMigration => "finish_revert_migration",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PowerState::NoState, LifecycleOp::Spawn, PowerState::Building)]
    #[case(PowerState::Building, LifecycleOp::Provisioned, PowerState::Running)]
    #[case(PowerState::Running, LifecycleOp::Pause, PowerState::Paused)]
    #[case(PowerState::Paused, LifecycleOp::Unpause, PowerState::Running)]
    #[case(PowerState::Running, LifecycleOp::Suspend, PowerState::Suspended)]
    #[case(PowerState::Suspended, LifecycleOp::Resume, PowerState::Running)]
    #[case(PowerState::Running, LifecycleOp::PowerOff, PowerState::Shutoff)]
    #[case(PowerState::Shutoff, LifecycleOp::PowerOn, PowerState::Running)]
    #[case(PowerState::Shutoff, LifecycleOp::Rescue, PowerState::Rescued)]
    #[case(PowerState::Running, LifecycleOp::Crash, PowerState::Crashed)]
    #[case(PowerState::Crashed, LifecycleOp::Reboot(RebootType::Hard), PowerState::Running)]
    #[case(PowerState::Paused, LifecycleOp::Destroy, PowerState::Destroyed)]
    #[case(PowerState::Running, LifecycleOp::LiveMigrate, PowerState::Running)]
    fn legal_transitions_reach_expected_state(
        #[case] from: PowerState,
        #[case] op: LifecycleOp,
        #[case] expected: PowerState,
    ) {
        assert_eq!(from.apply(op, None), Some(expected));
    }

    #[rstest]
    #[case(PowerState::Paused, LifecycleOp::Pause)]
    #[case(PowerState::Shutoff, LifecycleOp::PowerOff)]
    #[case(PowerState::Running, LifecycleOp::PowerOn)]
    #[case(PowerState::Suspended, LifecycleOp::Pause)]
    #[case(PowerState::Paused, LifecycleOp::Rescue)]
    #[case(PowerState::Shutoff, LifecycleOp::Reboot(RebootType::Soft))]
    #[case(PowerState::Shutoff, LifecycleOp::Crash)]
    #[case(PowerState::Destroyed, LifecycleOp::Destroy)]
    #[case(PowerState::Running, LifecycleOp::Spawn)]
    #[case(PowerState::Shutoff, LifecycleOp::LiveMigrate)]
    #[case(PowerState::Rescued, LifecycleOp::LiveMigrate)]
    #[case(PowerState::Crashed, LifecycleOp::LiveMigrate)]
    fn illegal_transitions_are_rejected(#[case] from: PowerState, #[case] op: LifecycleOp) {
        assert_eq!(from.apply(op, None), None, "{op} from {from} should be rejected");
    }

    #[rstest]
    #[case(Some(PowerState::Shutoff), PowerState::Shutoff)]
    #[case(Some(PowerState::Running), PowerState::Running)]
    #[case(None, PowerState::Running)]
    fn unrescue_returns_to_pre_rescue_state(
        #[case] rescued_from: Option<PowerState>,
        #[case] expected: PowerState,
    ) {
        assert_eq!(
            PowerState::Rescued.apply(LifecycleOp::Unrescue, rescued_from),
            Some(expected)
        );
    }

    #[rstest]
    #[case("Running", Some(PowerState::Running))]
    #[case("Not Activated", Some(PowerState::Shutoff))]
    #[case(" error\n", Some(PowerState::Crashed))]
    #[case("migrating", None)]
    fn remote_labels_map_to_states(#[case] label: &str, #[case] expected: Option<PowerState>) {
        assert_eq!(PowerState::from_remote_label(label), expected);
    }
}
