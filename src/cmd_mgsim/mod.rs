//! Subcommand modules for the `mgsim` binary.

pub mod communities;
pub mod genome_download;
pub mod reads;
