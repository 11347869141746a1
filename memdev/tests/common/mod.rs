use std::sync::Once;
use std::time::Duration;

use memdev::{Credentials, OpenContext, OpenFlags};

static INIT: Once = Once::new();

/// Route `log` and `tracing` output to the test harness; `RUST_LOG` filters
#[allow(dead_code)]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Long enough for a spawned thread to reach its blocking point
#[allow(dead_code)]
pub const SETTLE: Duration = Duration::from_millis(50);

#[allow(dead_code)]
pub fn ctx(uid: u32, flags: OpenFlags) -> OpenContext {
    OpenContext::new(Credentials::user(uid), flags)
}
