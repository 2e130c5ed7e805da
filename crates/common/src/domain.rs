mod message;
mod publisher;
mod registry;
mod result;

pub use message::*;
pub use publisher::*;
pub use registry::*;
pub use result::*;
