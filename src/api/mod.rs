//! Entry points exposed to the outside world.

pub mod cli;

pub use cli::{Cli, Command, Pipeline};
