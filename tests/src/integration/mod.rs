//! # Cross-Tab Integration Scenarios
//!
//! Each module drives several real `SessionCoordinator`s through one
//! `TabHarness` and asserts on what every tab observes.
//!
//! | Module | Scenario |
//! |--------|----------|
//! | `bus_failover` | Channel loss demotes to the store and recovers |
//! | `circuit_breaker` | Failing store trips the breaker, probe closes it |
//! | `election` | Exactly one leader; self-healing after leader loss |
//! | `refresh` | One network refresh per flight across all tabs |
//! | `session` | Logout and session expiry reach every tab |
//! | `stale_messages` | Old, future and duplicate messages are dropped |
//! | `store_only` | Coordination with the shared store as the only transport |

pub mod bus_failover;
pub mod circuit_breaker;
pub mod election;
pub mod refresh;
pub mod session;
pub mod stale_messages;
pub mod store_only;
