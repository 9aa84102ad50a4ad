//! Command-line interface components
//!
//! This module contains CLI-specific code for the Patcher application,
//! including argument parsing and command handlers.

pub mod args;
pub mod commands;

pub use args::{
    AuthAction, AuthArgs, CacheAction, CacheArgs, Cli, Commands, FetchArgs, GlobalArgs,
    ResetArgs, ResetTarget,
};
pub use commands::{handle_auth, handle_cache, handle_fetch, handle_reset};
