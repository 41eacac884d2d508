mod engine;

pub use engine::{SyncEngine, SyncReport, SyncSettings};
