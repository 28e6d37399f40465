//! Session and permission model: the tier ordering and the exclusive
//! session controller.

mod core;
mod role;

pub use core::Rig;
pub use role::Role;
