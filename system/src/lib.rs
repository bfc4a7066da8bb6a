mod id;
mod net;
mod size;

pub use crate::id::*;
pub use crate::net::*;
pub use crate::size::*;
