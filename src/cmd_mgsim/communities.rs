use clap::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use mgsim::libs::comm;
use mgsim::libs::table::{AbundRecord, AbundTable, GenomeTable};

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("communities")
        .about("Simulate taxon abundances of synthetic communities")
        .after_help(
            r###"
This command samples per-community rank-abundance profiles for the taxa of a
genome table and writes them as a tab-separated abundance table. The output
feeds directly into `mgsim reads`.

Sampling model:
* Each community holds `--richness` taxa; values of 0-1 are a fraction of
  the taxon pool, larger values an absolute count.
* `--shared-perc` percent of each community's taxa come from one shared set,
  the rest are community-specific.
* All communities inherit one base rank order; `--perm-perc` percent of the
  rank positions are reshuffled per community.
* Abundances are drawn from `--abund-dist`, sorted descending and normalized
  to percent.

Output:
* <prefix>_abund.txt with columns Community, Taxon, Rank, Perc_rel_abund

Notes:
* The genome table needs `Taxon` and `Fasta` columns (tab-separated)
* `--rnd-seed` makes the output reproducible

Examples:
1. One community over all genomes:
   mgsim communities genome_list.tsv comm

2. Three communities, 16 taxa each, half of the taxa shared:
   mgsim communities genome_list.tsv comm --n-comm 3 --richness 16 --shared-perc 50

3. Geometric instead of lognormal rank-abundances:
   mgsim communities genome_list.tsv comm --abund-dist geometric,0.4

"###,
        )
        .arg(
            Arg::new("genome_table")
                .required(true)
                .index(1)
                .help("Genome table (Taxon, Fasta)"),
        )
        .arg(
            Arg::new("prefix")
                .required(true)
                .index(2)
                .help("Output file prefix"),
        )
        .arg(
            Arg::new("n_comm")
                .long("n-comm")
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of communities to simulate"),
        )
        .arg(
            Arg::new("richness")
                .long("richness")
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(f64))
                .help("Taxa per community; <=1 is a fraction of the pool"),
        )
        .arg(
            Arg::new("abund_dist")
                .long("abund-dist")
                .num_args(1)
                .default_value("lognormal,0,2")
                .help("Rank-abundance distribution"),
        )
        .arg(
            Arg::new("shared_perc")
                .long("shared-perc")
                .num_args(1)
                .default_value("100")
                .value_parser(value_parser!(f64))
                .help("Percent of taxa shared among communities"),
        )
        .arg(
            Arg::new("perm_perc")
                .long("perm-perc")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Percent of rank positions permuted per community"),
        )
        .arg(
            Arg::new("rnd_seed")
                .long("rnd-seed")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .help("Random seed for reproducible output"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let genome_table = args.get_one::<String>("genome_table").unwrap();
    let prefix = args.get_one::<String>("prefix").unwrap();

    let params = comm::CommunityParams {
        n_comm: *args.get_one::<usize>("n_comm").unwrap(),
        richness: *args.get_one::<f64>("richness").unwrap(),
        shared_perc: *args.get_one::<f64>("shared_perc").unwrap(),
        perm_perc: *args.get_one::<f64>("perm_perc").unwrap(),
    };
    let dist: comm::AbundDist = args.get_one::<String>("abund_dist").unwrap().parse()?;

    let mut rng = match args.get_one::<u64>("rnd_seed") {
        Some(seed) => StdRng::seed_from_u64(*seed),
        None => StdRng::from_entropy(),
    };

    //----------------------------
    // Sampling
    //----------------------------
    let genomes = GenomeTable::load(genome_table)?;
    tracing::info!(
        "Simulating {} communities from {} taxa",
        params.n_comm,
        genomes.records.len()
    );

    let communities = comm::assemble(&genomes.taxa(), &params, &mut rng)?;

    let mut table = AbundTable::default();
    for (i, members) in communities.iter().enumerate() {
        let community = (i + 1).to_string();
        let draws = dist.sample(members.len(), &mut rng)?;
        let abunds = comm::rank_abundances(draws);

        tracing::info!(
            "Community {}: richness {}, top taxon {}",
            community,
            members.len(),
            members[0]
        );
        for (rank, (taxon, perc)) in members.iter().zip(&abunds).enumerate() {
            table.records.push(AbundRecord {
                community: community.clone(),
                taxon: taxon.clone(),
                perc_rel_abund: *perc,
                rank: rank + 1,
            });
        }
    }

    //----------------------------
    // Output
    //----------------------------
    let outfile = format!("{}_abund.txt", prefix);
    table.write(&outfile)?;
    tracing::info!("File written: {}", outfile);

    Ok(())
}
