//! Integration tests for crawl-runner
//!
//! Supervisor and video tests drive real child processes through `sh`
//! scripts, so they only run on Unix. Attachment tests use wiremock.

mod acquisition_tests;
#[cfg(unix)]
mod supervisor_tests;
#[cfg(unix)]
mod video_tests;
