pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod graph;
pub mod io;
pub mod paths;
pub mod pattern;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod store;

#[cfg(test)]
mod testutil;

pub use error::{CascadeError, Result};
