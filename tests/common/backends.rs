//! Backend builders shared by the integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/backends.rs"]
//! mod backends;
//! ```

use virtplane::driver::{ImageMeta, InstanceSpec, NetworkInfo, RequestContext};
use virtplane::test_support::ScriptedRunner;
use virtplane::{
    ConnectionDescriptor, Credential, Driver, DriverResult, MemoryDriver, RemoteDriver,
    SftpOptions, SshOptions,
};

/// Responses queued for a permissive runner; far more than any test uses.
const PERMISSIVE_RESPONSES: usize = 256;

/// Management host used by remote backends.
pub const REMOTE_HOST: &str = "ivm.example";

/// Endpoint descriptor for the scripted remote backend.
pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        REMOTE_HOST,
        "padmin",
        Credential::IdentityFile(String::from("/keys/ivm")),
    )
}

/// Remote backend driven by `runner`.
pub fn remote(runner: &ScriptedRunner) -> RemoteDriver<ScriptedRunner> {
    RemoteDriver::new(
        descriptor(),
        SshOptions::default(),
        SftpOptions::default(),
        runner.clone(),
    )
}

/// Runner where every client invocation exits zero with empty output.
pub fn permissive_runner() -> ScriptedRunner {
    let runner = ScriptedRunner::new();
    for _ in 0..PERMISSIVE_RESPONSES {
        runner.push_success();
    }
    runner
}

/// In-memory backend with its default single node.
pub fn memory_backend() -> Box<dyn Driver> {
    Box::new(MemoryDriver::default())
}

/// Remote backend whose every command succeeds.
pub fn remote_backend() -> Box<dyn Driver> {
    Box::new(remote(&permissive_runner()))
}

/// Small instance shape used across the suites.
pub fn spec(name: &str) -> InstanceSpec {
    InstanceSpec::new(name, 1, 512).with_root_gb(10)
}

/// Spawns `instance` with empty image and network data.
pub fn spawn(driver: &dyn Driver, instance: &InstanceSpec) -> DriverResult<()> {
    driver.spawn(
        &RequestContext::new(),
        instance,
        &ImageMeta::default(),
        &[],
        None,
        &NetworkInfo::default(),
        None,
    )
}
