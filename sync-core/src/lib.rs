//! Shared types and path-safety primitives for FileMirrorSync.
//!
//! This crate is imported by both the server and the client binary so the wire
//! contract (`protocol`) and the path-validation rules (`path`) can never drift
//! between the two processes.

pub mod path;
pub mod protocol;

pub use path::{PathError, base64url_decode, base64url_encode, join_under_root, validate_relative_path};
pub use protocol::*;
