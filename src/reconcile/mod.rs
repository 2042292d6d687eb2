mod engine;

pub use engine::{CycleOutcome, Reconciler};
