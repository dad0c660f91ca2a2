//! Domain model module declarations.

pub mod capabilities;
pub mod events;
pub mod process;
pub mod session;
pub mod value;
