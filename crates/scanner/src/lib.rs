//! Keeps the metadata cache in sync with storage backends.
//!
//! [`Scanner`] reconciles one storage (or one subtree of it) on demand;
//! [`background_scan`] drives any number of scanners until no folder is
//! left partially scanned.

mod background;
pub mod error;
mod filter;
mod outcome;
mod reuse;
mod scanner;

pub use crate::background::{BackgroundEvent, background_scan};
pub use crate::filter::{DEFAULT_BLACKLIST, PARTIAL_SUFFIX, ScanFilter};
pub use crate::outcome::{ScanFailure, ScanOutcome, ScanStats};
pub use crate::reuse::{ReuseFlags, ScanMode, UnknownReuseFlag};
pub use crate::scanner::Scanner;
