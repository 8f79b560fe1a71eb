//! CLI command implementations.

pub mod common;
pub mod convert;
pub mod inspect;
pub mod params;
pub mod route;
pub mod uevent;
