pub mod digest;
pub mod job_id;
pub mod metrics;
pub mod store;

pub use digest::{Algorithm, Digester};
pub use job_id::JobId;
pub use metrics::RequestMetrics;
pub use store::Store;
