//! The three patch algebras
//!
//! Each `apply` takes the decoded original object and the raw patch bytes and returns
//! the patched document, or fails without producing any output.

pub mod json;
pub mod merge;
pub mod strategic;
