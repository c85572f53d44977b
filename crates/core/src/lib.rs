//! `warden-core` — foundation building blocks shared by the authorization core.
//!
//! This crate contains **pure** primitives (no storage, no transport).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AccessError, AccessResult, StoreError};
pub use id::{GrantId, RequestId, ResourceId, UserId};
