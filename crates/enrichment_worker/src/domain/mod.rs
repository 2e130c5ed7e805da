mod dispatch_queue;
mod enrichment_service;
mod error;
mod topic;

pub use dispatch_queue::*;
pub use enrichment_service::*;
pub use error::*;
pub use topic::*;
