//! Encoding validation and the repair decode table.

pub mod codecs;
pub mod validator;
