//! Admission pipeline: one admit/deny decision per request.

mod pipeline;
mod rejection;
mod request;
mod response;

pub use pipeline::{Admission, GuardPipeline};
pub use rejection::{RejectReason, Rejection};
pub use request::GuardRequest;
pub use response::{apply_rate_limit_headers, full_body, json_response, BoxBody};
