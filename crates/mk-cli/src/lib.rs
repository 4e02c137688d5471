//! mk-cli: Command-line interface for mkube
//!
//! Provides the `mkube` binary: the long-running `tunnel` command, its
//! stale-tunnel cleanup and registry listing, and configuration helpers.

pub mod commands;
pub mod output;
