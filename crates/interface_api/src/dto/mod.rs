//! Request and response bodies

pub mod invoice;
pub mod worklog;
