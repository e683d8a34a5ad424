//! Folder watcher: drop folder in, processed folder out

mod pipeline;
mod trigger;

pub use pipeline::IngestionWatcher;
pub use trigger::run_watch_loop;
