//! Database models.
//!
//! These map directly to the schema; structured payloads are stored as JSON text.

pub mod progress;
pub mod scan_result;

pub use progress::*;
pub use scan_result::*;
