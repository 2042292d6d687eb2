pub mod config;
pub mod dns;
pub mod error;
pub mod ip;
pub mod logs;
pub mod notify;
pub mod reconcile;
pub mod retry;
pub mod state;

pub use error::{Error, Result};
