//! Formant Path
//!
//! This crate provides the addressing primitives for the Formant form engine:
//!
//! - **FormPath**: normalized segment sequences parsed from dotted/bracket
//!   strings (`a.b[0].c`), with wildcard pattern matching
//! - **Value access**: `get_in`/`set_in`/`remove_in` helpers that read and
//!   write `serde_json::Value` trees at a path, auto-vivifying containers
//!
//! # Example
//!
//! ```rust
//! use formant_path::FormPath;
//!
//! let path = FormPath::parse("users[0].name");
//! let pattern = FormPath::parse("users.*.name");
//! assert!(pattern.matches(&path));
//! ```

pub mod accessor;
pub mod path;

pub use accessor::{exist_in, get_in, remove_in, set_in};
pub use path::{FormPath, PathSegment};
