#![forbid(unsafe_code)]

//! Encoding Guardian (encg): keeps watched text files valid UTF-8.
//!
//! Pipeline per file:
//! 1. **Validate**: strict UTF-8 decode (optionally a strict-pattern pre-check)
//! 2. **Quarantine**: copy the original bytes into a timestamped store
//! 3. **Repair**: re-decode through a fallback encoding table and rewrite as UTF-8
//!
//! A guardian loop repeats the pipeline over the watch directories on an
//! interval, and a commit gate applies the validator to staged files.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use encoding_guardian::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use encoding_guardian::core::config::Config;
//! use encoding_guardian::encoding::validator::{ValidationMode, validate_with};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod encoding;
pub mod gate;
pub mod logger;
pub mod scanner;
