//! Unit tests for node validation and host-stat aggregation.

use std::cell::RefCell;

use rstest::{fixture, rstest};

use super::*;

#[derive(Debug, Default)]
struct RecordingProbe {
    probed: RefCell<Vec<String>>,
}

impl NodeProbe for RecordingProbe {
    fn probe(&self, node: &str) -> DriverResult<HostSnapshot> {
        self.probed.borrow_mut().push(node.to_owned());
        Ok(HostSnapshot {
            node_id: node.to_owned(),
            cpu_total: 4,
            cpu_used: 1,
            memory_total_mb: 2048,
            memory_used_mb: 512,
            disk_total_gb: 10,
            disk_used_gb: 4,
            hypervisor_type: String::from("fake"),
            hypervisor_version: String::from("1.0"),
            cpu_info: String::from("?"),
        })
    }
}

#[fixture]
fn probe() -> RecordingProbe {
    RecordingProbe::default()
}

fn reporter(nodes: &[&str]) -> InventoryReporter {
    InventoryReporter::new(NodeSet::new(nodes), HostIdentity::new("192.0.2.10"))
}

#[rstest]
fn node_set_trims_and_deduplicates() {
    let nodes = NodeSet::parse_list(" a, b ,,a ");

    assert_eq!(nodes.to_vec(), vec![String::from("a"), String::from("b")]);
    assert!(nodes.contains("b"));
    assert!(!nodes.contains(" b"));
}

#[rstest]
fn unknown_node_is_rejected_before_probing(probe: RecordingProbe) {
    let err = reporter(&["node-a"])
        .available_resource(&probe, "node-z")
        .expect_err("unknown node should fail");

    assert_eq!(
        err,
        DriverError::UnknownNode {
            node: String::from("node-z")
        }
    );
    assert!(probe.probed.borrow().is_empty());
}

#[rstest]
fn configured_node_returns_populated_capacity(probe: RecordingProbe) {
    let capacity = reporter(&["node-a", "node-b"])
        .available_resource(&probe, "node-b")
        .expect("configured node should report");

    assert_eq!(capacity.hypervisor_hostname, "node-b");
    assert_eq!(capacity.vcpus, 4);
    assert_eq!(capacity.memory_mb_used, 512);
    assert_eq!(capacity.local_gb, 10);
}

#[rstest]
fn single_node_yields_single_record(probe: RecordingProbe) {
    let stats = reporter(&["node-a"])
        .host_stats(&probe)
        .expect("host stats should succeed");

    let status = match stats {
        HostStats::Single(status) => status,
        HostStats::Multiple(other) => panic!("expected a single record, got {other:?}"),
    };
    assert_eq!(status.host_name_label, "node-a");
    assert_eq!(status.host_memory_total, 2048 * 1024 * 1024);
    assert_eq!(status.host_memory_free, 1536 * 1024 * 1024);
    assert_eq!(status.disk_available, 6 * 1024 * 1024 * 1024);
    assert_eq!(status.host_ip_address, "192.0.2.10");
}

#[rstest]
#[case(2)]
#[case(5)]
fn many_nodes_yield_a_sequence(probe: RecordingProbe, #[case] count: usize) {
    let names: Vec<String> = (0..count).map(|idx| format!("node-{idx}")).collect();
    let reporter = InventoryReporter::new(NodeSet::new(&names), HostIdentity::new("192.0.2.10"));

    let stats = reporter.host_stats(&probe).expect("host stats should succeed");

    let statuses = match stats {
        HostStats::Multiple(statuses) => statuses,
        HostStats::Single(other) => panic!("expected a sequence, got {other:?}"),
    };
    let labels: Vec<String> = statuses
        .into_iter()
        .map(|status| status.hypervisor_hostname)
        .collect();
    assert_eq!(labels, names);
    assert_eq!(*probe.probed.borrow(), names);
}

#[rstest]
fn zero_nodes_is_a_configuration_error(probe: RecordingProbe) {
    let err = reporter(&[])
        .host_stats(&probe)
        .expect_err("empty node set should fail");

    assert_eq!(err, DriverError::NoNodesConfigured);
}

#[rstest]
fn host_stats_serialises_single_record_as_object(probe: RecordingProbe) {
    let stats = reporter(&["node-a"])
        .host_stats(&probe)
        .expect("host stats should succeed");

    let json = serde_json::to_value(&stats).expect("stats should serialise");
    assert!(json.is_object(), "expected object, got {json}");
    assert_eq!(json["hypervisor_hostname"], "node-a");
}
