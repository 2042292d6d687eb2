mod file;

pub use file::{FileStateStore, RunState};
