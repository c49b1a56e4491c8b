//! Per-path input policies, request sanitization and origin violation
//! tracking.

mod manager;
mod policy;
mod transform;
mod violations;

pub use manager::{
    tracking_origin, InputArea, InspectedInput, SanitizationManager, SanitizeRejection, SanitizedRequest,
};
pub use policy::{PolicyRegistry, SanitizationPolicy};
pub use transform::{html_escape, Sanitizer};
pub use violations::{ViolationSnapshot, ViolationTracker};
