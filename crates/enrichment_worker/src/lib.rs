pub mod domain;
pub mod enrichment_worker;
pub mod mqtt;

pub use domain::*;
pub use enrichment_worker::*;
pub use mqtt::*;
