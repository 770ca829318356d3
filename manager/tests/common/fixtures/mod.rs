//! This module provides reusable test utilities:
//! - An in-memory database engine with failure injection
//! - Test configuration builders
//! - A mock webhook server
//! - A shell stand-in for gpg

// Allow unused code in test fixtures - not every test binary uses all of them
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fake_engine;
pub mod fake_gpg;
pub mod mock_webhook;
pub mod test_config;

// Re-export commonly used items
pub use fake_engine::{dump_bytes, FakeEngine, Failure};
pub use mock_webhook::MockWebhookServer;
pub use test_config::{TestConfig, TestConfigBuilder, TEST_DATABASE, TEST_PREFIX};

use backup_manager::context::ManagerContext;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Pre-flight a context over the fake engine
pub fn context(config: &TestConfig, engine: &Arc<FakeEngine>) -> ManagerContext {
    ManagerContext::with_engine(config.config.clone(), engine.clone())
        .expect("pre-flight should pass in a temp directory")
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}
