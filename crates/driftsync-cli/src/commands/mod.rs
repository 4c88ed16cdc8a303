pub mod common;
pub mod completions;
pub mod conflicts;
pub mod folder;
pub mod queue;
pub mod status;
pub mod sync;
pub mod watch;
