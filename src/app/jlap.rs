//! JLAP: hash-chained JSON patch logs
//!
//! [`Jlap`] parses, verifies and writes logs. [`find_patches`] and
//! [`apply_patches`] turn a verified log body into an updated document.

pub mod core;
pub mod patch;

pub use self::core::{split_lines, Jlap, JlapEntry};
pub use self::patch::{apply_patches, find_patches, PatchRecord};
