//! Common data types

pub mod device;
pub mod scan;

pub use device::*;
pub use scan::*;
