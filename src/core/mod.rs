//! Core library modules for rangefetch
//!
//! This module contains the internal implementation details of the rangefetch library.

pub mod downloader;
pub mod error;
pub mod probe;
pub mod range;
pub mod source;
pub mod storage;
pub mod stream;
pub mod worker;

// Re-export main types for internal use
pub use downloader::{FetchReport, Fetcher};
pub use source::FetchJob;
