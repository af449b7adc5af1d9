//! Pure rendering helpers: the canonical raw form of a captured request and
//! human-relative timestamps for the inspection view.

pub mod raw_request;
pub mod relative_time;

pub use raw_request::format_raw_request;
pub use relative_time::{absolute_time, time_ago};
