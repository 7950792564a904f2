//! Shared fixtures for exercising [`GroupCore`](groupframe::GroupCore)
//! sessions in tests.
//!
//! ```rust
//! use groupframe::{CoreConfig, MemoryGroup};
//! use groupframe_testing::{TestResult, open_sessions};
//!
//! # async fn example() -> TestResult {
//! let group = MemoryGroup::new();
//! let sessions = open_sessions(&group, 2, CoreConfig::default()).await?;
//! assert_eq!(sessions.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod group;
pub mod logging;
pub mod payload;

pub use group::{
    CHANNEL,
    MEMORY_URL,
    RECV_TIMEOUT,
    TestResult,
    open_session,
    open_sessions,
    recv_ordered,
    recv_within,
    wait_all_for_members,
    wait_for_members,
};
pub use logging::{LoggerHandle, logger};
pub use payload::patterned_payload;
