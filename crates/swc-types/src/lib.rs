//! Shared types for the SWCombine SDK

pub mod errors;

pub use errors::{SdkError, SdkResult};
