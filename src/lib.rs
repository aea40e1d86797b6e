//! Formgate - Form Submission Admission Guard
//!
//! This crate decides, for each incoming form submission identified by a
//! client address and a form identifier, whether to accept or reject the
//! request based on a sliding-window rate limit, with IP allow/deny
//! override lists layered on top. The core is storage- and clock-agnostic:
//! window state lives behind a compare-and-swap key-value contract so the
//! backing can be in-process memory or a shared cache.

pub mod access;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod response;
pub mod storage;
