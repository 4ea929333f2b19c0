//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod info;
pub(crate) mod upload;

pub(crate) use completions::cmd_completions;
pub(crate) use info::cmd_info;
pub(crate) use upload::cmd_upload;
