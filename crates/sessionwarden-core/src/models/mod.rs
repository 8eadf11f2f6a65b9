//! Data models for the remote account service.
//!
//! - `UserProfile`, `PlanTier`: the cached identity of the signed-in user
//! - `UserStats`: usage counters and plan limits
//! - Request payloads: `LoginRequest`, `RegisterRequest`, `ProfileUpdate`,
//!   `ChangePasswordRequest`

pub mod requests;
pub mod user;

pub use requests::{ChangePasswordRequest, LoginRequest, ProfileUpdate, RegisterRequest};
pub use user::{PlanLimits, PlanTier, UserProfile, UserStats};
