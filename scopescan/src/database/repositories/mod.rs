//! Repository layer for database access.
//!
//! Each repository implements one of the pipeline's persistence seams on top
//! of SQLite.

pub mod progress;
pub mod result;

pub use progress::*;
pub use result::*;
