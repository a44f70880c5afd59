#![allow(dead_code)]

pub use jobwarden_test_utils::builders;
pub use jobwarden_test_utils::fake_backend;
pub use jobwarden_test_utils::{
    collect_events, init_tracing, log_payloads, status_changes, wait_for_state, with_timeout,
};
