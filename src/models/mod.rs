//! Data models
//!
//! This module contains the data structures used throughout Userhub:
//! - Account records and their public/private projections
//! - Server-side session records

mod session;
mod user;

pub use session::{Session, SessionPayload};
pub use user::{CreateUserInput, PrivateUser, PublicUser, UpdateUserInput, User};
