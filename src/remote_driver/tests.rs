//! Unit tests for the remote backend.
//!
//! Every privileged command consumes three scripted responses (open, run,
//! close); every transfer consumes three as well (open, sftp, close).

use std::sync::mpsc;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::driver::TransferDirection;
use crate::remote::Credential;
use crate::test_support::ScriptedRunner;

const SNAPSHOT_JSON: &str = r#"{"node_id":"p7-a","cpu_total":16,"cpu_used":4,"memory_total_mb":65536,"memory_used_mb":8192,"disk_total_gb":500,"disk_used_gb":120,"hypervisor_type":"powervm","hypervisor_version":"2.2.1"}"#;

struct Harness {
    runner: ScriptedRunner,
    driver: RemoteDriver<ScriptedRunner>,
    staging: TempDir,
}

impl Harness {
    /// Commands delivered to the elevated shell, in order.
    fn sent(&self) -> Vec<String> {
        self.runner
            .invocations()
            .iter()
            .filter(|invocation| invocation.program == "ssh" && invocation.stdin.is_some())
            .map(|invocation| {
                let text = invocation.stdin_text();
                text.strip_suffix("\nexit\n").unwrap_or(&text).to_owned()
            })
            .collect()
    }

    fn spawn(&self, spec: &InstanceSpec) -> DriverResult<()> {
        self.driver.spawn(
            &RequestContext::new(),
            spec,
            &ImageMeta::default(),
            &[],
            None,
            &NetworkInfo::default(),
            None,
        )
    }

    fn spawn_running(&self, spec: &InstanceSpec) {
        self.runner.push_remote_success("");
        self.runner.push_remote_success("");
        self.spawn(spec).expect("spawn should succeed");
    }
}

#[fixture]
fn harness() -> Harness {
    let runner = ScriptedRunner::new();
    let staging = TempDir::new().expect("temp dir");
    let staging_path =
        Utf8PathBuf::from_path_buf(staging.path().to_path_buf()).expect("utf8 path");
    let descriptor = ConnectionDescriptor::new(
        "ivm.example",
        "padmin",
        Credential::IdentityFile(String::from("/keys/ivm")),
    );
    let driver = RemoteDriver::new(
        descriptor,
        SshOptions::default(),
        SftpOptions::default(),
        runner.clone(),
    )
    .with_nodes(NodeSet::parse_list("p7-a,p7-b"))
    .with_staging_dir(staging_path);
    Harness {
        runner,
        driver,
        staging,
    }
}

#[fixture]
fn spec() -> InstanceSpec {
    InstanceSpec::new("vm-1", 2, 1024).with_root_gb(20)
}

#[rstest]
fn spawn_defines_and_starts_the_instance(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert!(
        sent[0].starts_with("mksyscfg -r lpar -i name=vm-1,desired_procs=2,desired_mem=1024"),
        "{sent:?}"
    );
    assert_eq!(sent[1], "chsysstate -r lpar -o on -n vm-1");
    assert_eq!(harness.driver.list_instances(), Ok(vec![String::from("vm-1")]));
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Running));
}

#[rstest]
fn failed_create_releases_the_name(harness: Harness, spec: InstanceSpec) {
    harness.runner.push_remote_command(Some(1), "", "no such profile");

    let err = harness.spawn(&spec).expect_err("create should fail");

    assert!(
        matches!(err, DriverError::Execution { exit_code: 1, ref stderr, .. } if stderr == "no such profile"),
        "{err:?}"
    );
    assert_eq!(harness.driver.state_of("vm-1"), None);
    assert_eq!(harness.sent().len(), 1, "nothing to clean up before create");
}

#[rstest]
#[case::cleanup_succeeds(Some(0))]
#[case::cleanup_fails(Some(1))]
fn failed_provisioning_removes_the_remote_definition(
    harness: Harness,
    spec: InstanceSpec,
    #[case] cleanup_status: Option<i32>,
) {
    harness.runner.push_remote_success("");
    harness.runner.push_remote_command(Some(1), "", "firmware busy");
    harness.runner.push_remote_command(cleanup_status, "", "");

    let err = harness.spawn(&spec).expect_err("start should fail");

    assert!(
        matches!(err, DriverError::Execution { ref stderr, .. } if stderr == "firmware busy"),
        "{err:?}"
    );
    let sent = harness.sent();
    assert_eq!(sent.len(), 3, "{sent:?}");
    assert_eq!(sent[2], "rmsyscfg -r lpar -n vm-1 && rmlv -f lv_vm-1");
    assert_eq!(harness.driver.list_instances(), Ok(Vec::new()));

    harness.spawn_running(&spec);
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Running));
}

#[rstest]
fn spawn_uploads_and_deploys_the_image(harness: Harness, spec: InstanceSpec) {
    let image_dir = TempDir::new().expect("temp dir");
    let image_path = image_dir.path().join("rhel.img");
    std::fs::write(&image_path, b"image").expect("write image");
    let image = ImageMeta {
        id: String::from("img-1"),
        name: String::from("rhel"),
        local_path: Some(image_path.to_string_lossy().into_owned()),
    };
    harness.runner.push_remote_success("");
    harness.runner.push_transfer(0);
    harness.runner.push_remote_success("");
    harness.runner.push_remote_success("");
    harness.runner.push_remote_success("");

    harness
        .driver
        .spawn(
            &RequestContext::new(),
            &spec,
            &image,
            &[],
            None,
            &NetworkInfo::default(),
            None,
        )
        .expect("spawn should succeed");

    let sent = harness.sent();
    assert_eq!(
        sent.get(1).map(String::as_str),
        Some("dd if=/home/padmin/rhel.img of=/dev/rlv_vm-1 bs=1024k")
    );
    assert_eq!(sent.get(2).map(String::as_str), Some("rm -f /home/padmin/rhel.img"));
    assert_eq!(harness.runner.pending(), 0);
}

#[rstest]
fn duplicate_spawn_sends_nothing(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    let before = harness.runner.invocations().len();

    let err = harness.spawn(&spec).expect_err("duplicate should fail");

    assert_eq!(
        err,
        DriverError::InstanceExists {
            name: String::from("vm-1")
        }
    );
    assert_eq!(harness.runner.invocations().len(), before);
}

#[rstest]
fn illegal_transition_sends_nothing(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    let before = harness.runner.invocations().len();

    let err = harness
        .driver
        .power_on(&spec)
        .expect_err("instance is already running");

    assert!(matches!(err, DriverError::InvalidTransition { .. }));
    assert_eq!(harness.runner.invocations().len(), before);
}

#[rstest]
fn power_cycle_commits_after_each_command(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("");
    harness.runner.push_remote_success("");

    harness.driver.power_off(&spec).expect("power off");
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Shutoff));
    harness.driver.power_on(&spec).expect("power on");

    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Running));
    assert_eq!(
        harness.sent().get(2).map(String::as_str),
        Some("chsysstate -r lpar -o shutdown --immed -n vm-1")
    );
}

#[rstest]
fn failed_command_keeps_the_previous_state(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_command(Some(2), "", "busy");

    let err = harness.driver.power_off(&spec).expect_err("command fails");

    assert!(matches!(err, DriverError::Execution { exit_code: 2, .. }));
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Running));
}

#[rstest]
fn indeterminate_status_is_neither_success_nor_failure(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_command(None, "partial", "");

    let err = harness.driver.power_off(&spec).expect_err("status unknown");

    assert!(
        matches!(err, DriverError::IndeterminateExecution { ref stdout, .. } if stdout == "partial"),
        "{err:?}"
    );
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Running));
}

#[rstest]
fn refused_session_is_a_connection_failure(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_failure(255);

    let err = harness.driver.suspend(&spec).expect_err("session refused");

    assert!(matches!(err, DriverError::ConnectionFailed { ref host, port: 22, .. } if host == "ivm.example"));
}

#[rstest]
#[case("pause")]
#[case("rescue")]
fn operations_without_a_template_are_unsupported(
    harness: Harness,
    spec: InstanceSpec,
    #[case] operation: &str,
) {
    harness.spawn_running(&spec);

    let outcome = match operation {
        "pause" => harness.driver.pause(&spec),
        _ => harness.driver.rescue(
            &RequestContext::new(),
            &spec,
            &NetworkInfo::default(),
            &ImageMeta::default(),
            None,
        ),
    };

    assert_eq!(outcome, Err(DriverError::unsupported(operation, "remote")));
}

#[rstest]
fn configured_template_enables_an_operation(harness: Harness, spec: InstanceSpec) {
    let Harness {
        runner,
        driver: base,
        staging: _staging,
    } = harness;
    let driver = base.with_commands(CommandSet {
        pause: Some(String::from("chsysstate -r lpar -o pause -n {name}")),
        ..CommandSet::default()
    });
    for _ in 0..3 {
        runner.push_remote_success("");
    }
    driver
        .spawn(
            &RequestContext::new(),
            &spec,
            &ImageMeta::default(),
            &[],
            None,
            &NetworkInfo::default(),
            None,
        )
        .expect("spawn should succeed");

    driver.pause(&spec).expect("pause is configured");

    assert_eq!(driver.state_of("vm-1"), Some(PowerState::Paused));
}

#[rstest]
fn destroy_is_repeatable(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_command(Some(1), "", "already off");
    harness.runner.push_remote_success("");
    let network = NetworkInfo::default();

    harness
        .driver
        .destroy(&spec, &network, None, true)
        .expect("destroy should succeed");
    let after_first = harness.runner.invocations().len();
    harness
        .driver
        .destroy(&spec, &network, None, true)
        .expect("second destroy should succeed");

    assert_eq!(harness.driver.list_instances(), Ok(Vec::new()));
    assert_eq!(harness.runner.invocations().len(), after_first);
    assert_eq!(
        harness.sent().last().map(String::as_str),
        Some("rmsyscfg -r lpar -n vm-1 && rmlv -f lv_vm-1")
    );
}

#[rstest]
fn snapshot_of_unknown_instance_is_not_running(harness: Harness, spec: InstanceSpec) {
    let mut calls = 0;

    let err = harness
        .driver
        .snapshot(&RequestContext::new(), &spec, "snap", &mut |_| calls += 1)
        .expect_err("unknown instance");

    assert_eq!(
        err,
        DriverError::InstanceNotRunning {
            name: String::from("vm-1")
        }
    );
    assert_eq!(calls, 0);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn snapshot_stages_the_image_locally(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("");
    harness.runner.push_transfer(0);
    harness.runner.push_remote_success("");
    let mut seen = Vec::new();

    harness
        .driver
        .snapshot(&RequestContext::new(), &spec, "snap-1", &mut |state| {
            seen.push(state);
        })
        .expect("snapshot should succeed");

    assert!(seen.contains(&TaskState::ImageUploading));
    let sent = harness.sent();
    assert_eq!(
        sent.get(2).map(String::as_str),
        Some("dd if=/dev/rlv_vm-1 of=/home/padmin/snap-1.img bs=1024k")
    );
    assert_eq!(sent.last().map(String::as_str), Some("rm -f /home/padmin/snap-1.img"));
    let sftp = harness
        .runner
        .invocations()
        .into_iter()
        .find(|invocation| invocation.program == "sftp")
        .expect("sftp invocation recorded");
    let local = harness.staging.path().join("snap-1.img");
    assert!(
        sftp.stdin_text()
            .contains(&format!("get \"snap-1.img\" \"{}\"", local.display())),
        "{}",
        sftp.stdin_text()
    );
}

#[rstest]
fn failed_snapshot_download_reports_get(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("");
    harness.runner.push_transfer(1);
    harness.runner.push_remote_success("");

    let err = harness
        .driver
        .snapshot(&RequestContext::new(), &spec, "snap-1", &mut |_| {})
        .expect_err("download fails");

    assert!(
        matches!(
            err,
            DriverError::FileTransferFailed { direction: TransferDirection::Get, ref source_path, .. }
                if source_path == "/home/padmin/snap-1.img"
        ),
        "{err:?}"
    );
    assert_eq!(harness.runner.pending(), 0, "remote copy is still removed");
}

#[rstest]
fn unknown_node_is_rejected_without_a_session(harness: Harness) {
    let err = harness
        .driver
        .get_available_resource("p7-z")
        .expect_err("node is not configured");

    assert_eq!(
        err,
        DriverError::UnknownNode {
            node: String::from("p7-z")
        }
    );
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn available_resource_parses_the_inventory(harness: Harness) {
    harness.runner.push_remote_success(SNAPSHOT_JSON);

    let resource = harness
        .driver
        .get_available_resource("p7-a")
        .expect("node is configured");

    assert_eq!(resource.vcpus, 16);
    assert_eq!(resource.memory_mb_used, 8192);
    assert_eq!(resource.hypervisor_type, "powervm");
    assert!(
        harness.sent()[0].contains("\"hypervisor_type\":\"powervm\""),
        "inventory template should be sent"
    );
}

#[rstest]
fn garbled_inventory_is_a_parse_error(harness: Harness) {
    harness.runner.push_remote_success("ksh: lshwres: not found");

    let err = harness
        .driver
        .get_available_resource("p7-b")
        .expect_err("output is not JSON");

    assert!(matches!(err, DriverError::InventoryParse { ref node, .. } if node == "p7-b"));
}

#[rstest]
fn host_stats_follow_the_node_count(harness: Harness) {
    harness.runner.push_remote_success(SNAPSHOT_JSON);
    harness.runner.push_remote_success(SNAPSHOT_JSON);

    let stats = harness.driver.get_host_stats(true).expect("two nodes");

    assert!(matches!(stats, HostStats::Multiple(ref statuses) if statuses.len() == 2));
}

#[rstest]
fn host_stats_without_nodes_fail(harness: Harness) {
    let driver = harness.driver.with_nodes(NodeSet::default());

    assert_eq!(driver.get_host_stats(false), Err(DriverError::NoNodesConfigured));
    assert!(driver.get_available_nodes().is_empty());
}

#[rstest]
fn init_host_adopts_listed_instances(harness: Harness) {
    harness.runner.push_remote_success("vm-a\nvm-b\n\n");
    harness.runner.push_remote_success("Running\n");
    harness.runner.push_remote_success("Not Activated\n");

    harness.driver.init_host("ivm.example").expect("reconcile");

    assert_eq!(harness.driver.state_of("vm-a"), Some(PowerState::Running));
    assert_eq!(harness.driver.state_of("vm-b"), Some(PowerState::Shutoff));
}

#[rstest]
fn get_info_detects_a_crash(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("Error\n");

    let info = harness.driver.get_info(&spec).expect("info");

    assert_eq!(info.state, PowerState::Crashed);
    assert_eq!(info.num_cpu, 2);
}

#[rstest]
fn volumes_are_tracked_per_mountpoint(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("");
    harness.runner.push_remote_success("");
    let info = ConnectionInfo {
        driver_volume_type: String::from("iscsi"),
        ..ConnectionInfo::default()
    };

    harness
        .driver
        .attach_volume(&info, &spec, "hdisk4")
        .expect("attach");
    let before = harness.runner.invocations().len();
    harness
        .driver
        .detach_volume(&info, &spec, "hdisk9")
        .expect("unknown mountpoint is ignored");
    assert_eq!(harness.runner.invocations().len(), before);
    harness
        .driver
        .detach_volume(&info, &spec, "hdisk4")
        .expect("detach");

    assert_eq!(
        harness.sent().last().map(String::as_str),
        Some("rmvdev -vdev hdisk4")
    );
}

#[rstest]
fn vendor_operations_are_unsupported(harness: Harness) {
    assert_eq!(
        harness.driver.get_diagnostics("vm-1"),
        Err(DriverError::unsupported("get_diagnostics", "remote"))
    );
    assert_eq!(
        harness
            .driver
            .host_power_action("ivm.example", HostPowerAction::Shutdown),
        Err(DriverError::unsupported("host_power_action", "remote"))
    );
}

fn callbacks() -> (PostMigrationFn, RecoverMigrationFn, mpsc::Receiver<&'static str>) {
    let (tx, rx) = mpsc::channel();
    let post_tx = tx.clone();
    let post: PostMigrationFn = Box::new(move |_, _| {
        post_tx.send("post").expect("receiver alive");
    });
    let recover: RecoverMigrationFn = Box::new(move |_, _| {
        tx.send("recover").expect("receiver alive");
    });
    (post, recover, rx)
}

#[rstest]
#[case(Some(0), true, "post", None)]
#[case(Some(1), false, "recover", Some(PowerState::Running))]
fn live_migration_reports_through_callbacks(
    harness: Harness,
    spec: InstanceSpec,
    #[case] status: Option<i32>,
    #[case] succeeds: bool,
    #[case] callback: &str,
    #[case] source_state: Option<PowerState>,
) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_command(status, "", "target refused");
    let (post, recover, rx) = callbacks();

    let handle = harness
        .driver
        .live_migration(
            &RequestContext::new(),
            &spec,
            "p7-b",
            post,
            recover,
            false,
            None,
        )
        .expect("migration starts");
    let outcome = handle.join();

    assert_eq!(outcome.is_ok(), succeeds, "{outcome:?}");
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![callback]);
    assert_eq!(harness.driver.state_of("vm-1"), source_state);
    assert_eq!(
        harness.sent().last().map(String::as_str),
        Some("migrlpar -o m -t p7-b -p vm-1")
    );
}

#[rstest]
fn live_migration_of_stopped_instance_sends_nothing(harness: Harness, spec: InstanceSpec) {
    harness.spawn_running(&spec);
    harness.runner.push_remote_success("");
    harness.driver.power_off(&spec).expect("power off succeeds");
    let before = harness.sent().len();
    let (post, recover, rx) = callbacks();

    let err = harness
        .driver
        .live_migration(
            &RequestContext::new(),
            &spec,
            "p7-b",
            post,
            recover,
            false,
            None,
        )
        .expect_err("stopped instances cannot migrate live");

    assert!(
        matches!(err, DriverError::InvalidTransition { ref state, .. } if state == "shutoff"),
        "{err:?}"
    );
    assert!(rx.try_recv().is_err(), "no callback may run");
    assert_eq!(harness.sent().len(), before);
    assert_eq!(harness.driver.state_of("vm-1"), Some(PowerState::Shutoff));
}

#[rstest]
fn from_config_uses_configured_nodes() {
    let config = RemoteConfig {
        host: String::from("ivm.example"),
        port: 22,
        username: String::from("padmin"),
        password: None,
        identity_file: None,
        ssh_bin: String::from("ssh"),
        sftp_bin: String::from("sftp"),
        sshpass_bin: String::from("sshpass"),
        elevation_command: String::from("ioscli oem_setup_env"),
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        nodes: Some(String::from("p7-a, p7-b")),
        remote_image_dir: String::from("/images"),
        staging_dir: String::from("/tmp/staging"),
    };

    let driver =
        RemoteDriver::from_config(&config, ScriptedRunner::new()).expect("config is valid");

    assert_eq!(
        driver.get_available_nodes(),
        vec![String::from("p7-a"), String::from("p7-b")]
    );
    assert_eq!(driver.descriptor().target(), "padmin@ivm.example");
}
