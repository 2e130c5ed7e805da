pub mod domain;
pub mod registry;
pub mod telemetry;

pub use domain::*;
pub use registry::*;
pub use telemetry::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEnrichedMessagePublisher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRegistryLookup;
