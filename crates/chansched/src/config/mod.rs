pub mod cli;
pub mod daemon;
pub mod sim;

pub use cli::{Cli, Commands};
