pub mod snapshot;
pub mod watch;

pub use snapshot::*;
pub use watch::*;

/// Number of characters kept when a snapshot or changed line is previewed.
pub const PREVIEW_CHARS: usize = 200;
