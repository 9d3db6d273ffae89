extern crate clap;
use clap::*;

mod cmd_mgsim;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let app = Command::new("mgsim")
        .version(crate_version!())
        .about("`mgsim` - Metagenome read simulation of synthetic communities")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_mgsim::genome_download::make_subcommand())
        .subcommand(cmd_mgsim::communities::make_subcommand())
        .subcommand(cmd_mgsim::reads::make_subcommand())
        .after_help(
            r###"Pipeline stages:

* genome-download - Fetch genome FASTA files for a (Taxon, Accession) table
* communities     - Sample per-community taxon rank-abundance profiles
* reads           - Run read simulators and merge reads per community

Stages communicate through tab-separated tables, so each can also be used
on its own. External read simulators (art_illumina, simlord, nanosim-h)
must be on PATH for `reads`.

"###,
        );

    // Check which subcomamnd the user ran...
    match app.get_matches().subcommand() {
        Some(("genome-download", sub_matches)) => cmd_mgsim::genome_download::execute(sub_matches),
        Some(("communities", sub_matches)) => cmd_mgsim::communities::execute(sub_matches),
        Some(("reads", sub_matches)) => cmd_mgsim::reads::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
