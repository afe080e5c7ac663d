//! Service layer
//!
//! Domain logic fed by the federation core.

mod follow;

pub use follow::{FollowAcceptor, build_accept};
