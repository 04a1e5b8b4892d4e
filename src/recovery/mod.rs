//! Recovery of files whose trailer is missing or damaged.
//!
//! A file cut off while muxing still has a valid program header and a
//! readable packet region; only the footer and the indices are gone.  The
//! [`scanner`] walks the packet region to rebuild both indices so that such
//! a file becomes seekable again.

pub mod scanner;

pub use scanner::ScanReport;
