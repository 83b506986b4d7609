//! Behaviour of the execution and transfer channels through the public API.

#[path = "common/backends.rs"]
mod backends;

use backends::descriptor;
use camino::Utf8Path;
use rstest::rstest;
use virtplane::remote::INDETERMINATE_EXIT_STATUS;
use virtplane::test_support::ScriptedRunner;
use virtplane::{
    ChannelError, DriverError, SftpOptions, SftpTransfer, SshOptions, SshTransport,
    TransferDirection, remote_join,
};

fn run(runner: &ScriptedRunner, command: &str, check: bool) -> Result<String, ChannelError> {
    let transport = SshTransport::new(SshOptions::default(), runner.clone());
    let mut session = transport.connect(&descriptor())?;
    let outcome = session.run_as_privileged(command, check);
    session.close();
    outcome.map(|result| result.stdout_text())
}

#[rstest]
fn checked_failure_is_an_execution_error() {
    let runner = ScriptedRunner::new();
    runner.push_remote_command(Some(1), "", "lssyscfg: not found");

    let err = run(&runner, "lssyscfg -r lpar", true).expect_err("exit 1 is checked");

    assert_eq!(
        err,
        ChannelError::Execution {
            exit_code: 1,
            stdout: String::new(),
            stderr: String::from("lssyscfg: not found"),
            command: String::from("lssyscfg -r lpar"),
        }
    );
}

#[rstest]
fn success_returns_captured_streams() {
    let runner = ScriptedRunner::new();
    runner.push_remote_success("vm-1\n");

    let stdout = run(&runner, "lssyscfg -r lpar -F name", true).expect("exit 0");

    assert_eq!(stdout, "vm-1\n");
}

#[rstest]
fn indeterminate_status_is_its_own_outcome() {
    let runner = ScriptedRunner::new();
    runner.push_remote_command(None, "", "");

    let err = run(&runner, "lssyscfg -r lpar", true).expect_err("status unknown");

    assert!(matches!(err, ChannelError::Indeterminate { .. }), "{err:?}");
    assert_eq!(INDETERMINATE_EXIT_STATUS, -1);
    assert!(matches!(
        DriverError::from(err),
        DriverError::IndeterminateExecution { .. }
    ));
}

#[rstest]
fn put_failure_keeps_original_paths() {
    let runner = ScriptedRunner::new();
    runner.push_transfer(1);
    let dir = tempfile::tempdir().expect("temp dir");
    let local_path = dir.path().join("rhel.img");
    std::fs::write(&local_path, b"image").expect("write image");
    let local = Utf8Path::from_path(&local_path).expect("utf8 path");
    let transfer = SftpTransfer::new(SshOptions::default(), SftpOptions::default(), runner);

    let err = transfer
        .put(&descriptor(), local, "/home/padmin/")
        .expect_err("sftp fails");

    assert_eq!(
        err,
        ChannelError::FileTransferFailed {
            direction: TransferDirection::Put,
            source_path: local.to_string(),
            dest_path: String::from("/home/padmin/"),
        }
    );
}

#[rstest]
#[case("/a/", "/b", "/a/b")]
#[case("a", "b", "a/b")]
#[case("a/", "b/", "a/b/")]
fn remote_join_uses_exactly_one_separator(
    #[case] left: &str,
    #[case] right: &str,
    #[case] expected: &str,
) {
    assert_eq!(remote_join(left, right), expected);
}
