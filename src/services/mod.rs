pub mod grading_backend;
pub mod http_backend;

pub use grading_backend::{BackendError, GradingBackend};
pub use http_backend::HttpGradingBackend;
