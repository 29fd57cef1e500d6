//! Types and structures shared across the filesystem core.
//!
//! # Modules
//!
//! - [`errors`]: the internal error taxonomy and its errno mapping.
//! - [`object`]: the remote object record and mime sentinels.
//! - [`row`]: metadata rows of the mirror and materialized tables.
//!
//! Key types are re-exported here for easier access.

pub mod errors;
pub mod object;
pub mod row;

pub use self::{errors::*, object::*, row::*};
