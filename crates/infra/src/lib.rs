//! Infrastructure layer: stores, the RBAC engine, the JIT workflow and the
//! expiration sweeper.

pub mod config;
pub mod jit;
pub mod rbac;
pub mod store;
pub mod sweeper;


pub use config::{ConfigError, WardenConfig};
pub use jit::JitWorkflow;
pub use rbac::RbacEngine;
pub use store::{
    ensure_schema, GrantStore, InMemoryGrantStore, InMemoryRequestStore, PostgresGrantStore,
    PostgresRequestStore, RequestStore,
};
pub use sweeper::{ExpirationSweeper, SweeperConfig, SweeperHandle, SweeperStats};
