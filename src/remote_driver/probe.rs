//! Inventory probe that asks the endpoint for a JSON host snapshot.

use tracing::debug;

use super::commands::render;
use super::run_privileged;
use crate::driver::{DriverError, DriverResult};
use crate::inventory::{HostSnapshot, NodeProbe};
use crate::remote::{CommandRunner, ConnectionDescriptor, SshTransport};

/// Runs the inventory template once per node.
pub(crate) struct RemoteProbe<'a, R> {
    pub(crate) transport: &'a SshTransport<R>,
    pub(crate) descriptor: &'a ConnectionDescriptor,
    pub(crate) template: &'a str,
}

impl<R: CommandRunner> NodeProbe for RemoteProbe<'_, R> {
    fn probe(&self, node: &str) -> DriverResult<HostSnapshot> {
        let command = render(self.template, &[("node", node)]);
        let output = run_privileged(self.transport, self.descriptor, &command, true)?;
        debug!(node, bytes = output.stdout.len(), "inventory received");
        parse_snapshot(node, &output.stdout)
    }
}

/// Parses the inventory output of `node`. A blank `node_id` is filled in.
pub(crate) fn parse_snapshot(node: &str, stdout: &[u8]) -> DriverResult<HostSnapshot> {
    let mut snapshot: HostSnapshot =
        serde_json::from_slice(stdout).map_err(|err| DriverError::InventoryParse {
            node: node.to_owned(),
            message: err.to_string(),
        })?;
    if snapshot.node_id.trim().is_empty() {
        snapshot.node_id = node.to_owned();
    }
    Ok(snapshot)
}
