use std::path::PathBuf;

use clap::*;

use mgsim::libs::sim;
use mgsim::libs::table::{AbundTable, GenomeTable};

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("reads")
        .about("Simulate reads for each community in an abundance table")
        .after_help(
            r###"
This command turns per-community taxon abundances into simulated sequencing
reads. For every (community, taxon) pair it computes the per-genome coverage
from the taxon's relative abundance and the requested sequencing depth, runs
an external read simulator, then concatenates the per-taxon files into
per-community read files with reads renamed to <taxon>__SEQ<i>.

Simulators:
* Illumina: art_illumina  (--sr-seq-depth, on by default)
* PacBio:   simlord       (--pb-seq-depth, off when 0)
* Nanopore: nanosim-h     (--np-seq-depth, off when 0)

Output layout:
* <output_dir>/illumina/<community>/R1.fq [R2.fq]
* <output_dir>/pacbio/<community>/R1.fq
* <output_dir>/nanopore/<community>/R1.fa

Notes:
* Tables are tab-separated; the genome table needs `Taxon` and `Fasta`,
  the abundance table `Community`, `Taxon` and `Perc_rel_abund`
* Illumina coverage: perc/100 * depth * read_len * pairs / genome_size
* Long-read counts: perc/100 * depth
* `--art-mflen 0` turns mate pairs off
* Use RUST_LOG=debug to see every simulator command line

Examples:
1. Paired-end Illumina reads, 1M read pairs per community:
   mgsim reads genome_list.tsv comm_abund.txt reads_out \
       --art-paired --sr-seq-depth 1e6

2. Add PacBio and Nanopore long reads:
   mgsim reads genome_list.tsv comm_abund.txt reads_out \
       --art-paired --pb-seq-depth 1e4 --np-seq-depth 1e4

3. Gzipped output, 8 threads, fixed seed:
   mgsim reads genome_list.tsv comm_abund.txt reads_out \
       --art-paired -p 8 --rnd-seed 42 --gzip

"###,
        )
        .arg(
            Arg::new("genome_table")
                .required(true)
                .index(1)
                .help("Genome table (Taxon, Fasta)"),
        )
        .arg(
            Arg::new("abund_table")
                .required(true)
                .index(2)
                .help("Abundance table (Community, Taxon, Perc_rel_abund)"),
        )
        .arg(
            Arg::new("output_dir")
                .required(true)
                .index(3)
                .help("Output directory for all read files"),
        )
        .arg(
            Arg::new("sr_seq_depth")
                .long("sr-seq-depth")
                .num_args(1)
                .default_value("1e5")
                .value_parser(value_parser!(f64))
                .help("Number of (paired) Illumina reads per community"),
        )
        .arg(
            Arg::new("art_paired")
                .long("art-paired")
                .action(ArgAction::SetTrue)
                .help("art_illumina --paired"),
        )
        .arg(
            Arg::new("art_len")
                .long("art-len")
                .num_args(1)
                .default_value("150")
                .value_parser(value_parser!(usize))
                .help("art_illumina --len"),
        )
        .arg(
            Arg::new("art_mflen")
                .long("art-mflen")
                .num_args(1)
                .default_value("200")
                .value_parser(value_parser!(f64))
                .help("art_illumina --mflen; 0 turns it off"),
        )
        .arg(
            Arg::new("art_sdev")
                .long("art-sdev")
                .num_args(1)
                .default_value("10")
                .value_parser(value_parser!(f64))
                .help("art_illumina --sdev"),
        )
        .arg(
            Arg::new("art_seq_sys")
                .long("art-seq-sys")
                .num_args(1)
                .default_value("HS25")
                .help("art_illumina --seqSys"),
        )
        .arg(
            Arg::new("pb_seq_depth")
                .long("pb-seq-depth")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Number of PacBio reads per community; 0 skips simlord"),
        )
        .arg(
            Arg::new("sl_args")
                .long("sl-args")
                .num_args(1)
                .help("Additional arguments passed directly to simlord"),
        )
        .arg(
            Arg::new("np_seq_depth")
                .long("np-seq-depth")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Number of Nanopore reads per community; 0 skips nanosim-h"),
        )
        .arg(
            Arg::new("ns_args")
                .long("ns-args")
                .num_args(1)
                .help("Additional arguments passed directly to nanosim-h"),
        )
        .arg(
            Arg::new("tmp_dir")
                .long("tmp-dir")
                .num_args(1)
                .default_value(".sim_reads")
                .help("Temporary directory for per-taxon read files"),
        )
        .arg(
            Arg::new("rnd_seed")
                .long("rnd-seed")
                .num_args(1)
                .value_parser(value_parser!(u64))
                .help("Random seed passed to the read simulator"),
        )
        .arg(
            Arg::new("gzip")
                .long("gzip")
                .action(ArgAction::SetTrue)
                .help("gzip the combined read files"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of simulator processes run in parallel"),
        )
}

fn split_extra(args: Option<&String>) -> Vec<String> {
    args.map(|s| s.split_whitespace().map(|f| f.to_string()).collect())
        .unwrap_or_default()
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let genome_table = args.get_one::<String>("genome_table").unwrap();
    let abund_table = args.get_one::<String>("abund_table").unwrap();
    let output_dir = PathBuf::from(args.get_one::<String>("output_dir").unwrap());

    let sr_seq_depth = *args.get_one::<f64>("sr_seq_depth").unwrap();
    let pb_seq_depth = *args.get_one::<f64>("pb_seq_depth").unwrap();
    let np_seq_depth = *args.get_one::<f64>("np_seq_depth").unwrap();
    if sr_seq_depth <= 0.0 && pb_seq_depth <= 0.0 && np_seq_depth <= 0.0 {
        anyhow::bail!("All sequencing depths are zero; nothing to simulate");
    }

    let art = sim::ArtParams {
        paired: args.get_flag("art_paired"),
        len: *args.get_one::<usize>("art_len").unwrap(),
        mflen: *args.get_one::<f64>("art_mflen").unwrap(),
        sdev: *args.get_one::<f64>("art_sdev").unwrap(),
        seq_sys: args.get_one::<String>("art_seq_sys").unwrap().clone(),
        rnd_seed: args.get_one::<u64>("rnd_seed").copied(),
    };
    let sl_args = split_extra(args.get_one::<String>("sl_args"));
    let ns_args = split_extra(args.get_one::<String>("ns_args"));

    let tmp_dir = PathBuf::from(args.get_one::<String>("tmp_dir").unwrap());
    let gzip = args.get_flag("gzip");
    let opt_parallel = *args.get_one::<usize>("parallel").unwrap();

    //----------------------------
    // Tables
    //----------------------------
    let genomes = GenomeTable::load_with_sizes(genome_table, opt_parallel)?;
    let abunds = AbundTable::load(abund_table)?;
    let tasks = sim::build_tasks(&genomes, &abunds)?;

    //----------------------------
    // Simulation
    //----------------------------
    if sr_seq_depth > 0.0 {
        sim::check_exe("art_illumina")?;
        tracing::info!("Simulating Illumina reads...");
        let files = sim::run_parallel(&tasks, opt_parallel, |t| {
            sim::sim_art(t, &art, sr_seq_depth, &tmp_dir)
        })?;

        tracing::info!("Combining simulated reads by community...");
        let written = sim::combine_by_community(
            files,
            &output_dir.join("illumina"),
            sim::ReadFormat::Fastq,
            gzip,
        )?;
        for file in written {
            tracing::info!("File written: {}", file.display());
        }
    }

    if pb_seq_depth > 0.0 {
        sim::check_exe("simlord")?;
        tracing::info!("Simulating PacBio reads...");
        let files = sim::run_parallel(&tasks, opt_parallel, |t| {
            sim::sim_simlord(t, &sl_args, pb_seq_depth, &tmp_dir)
        })?;

        tracing::info!("Combining simulated reads by community...");
        let written = sim::combine_by_community(
            files,
            &output_dir.join("pacbio"),
            sim::ReadFormat::Fastq,
            gzip,
        )?;
        for file in written {
            tracing::info!("File written: {}", file.display());
        }
    }

    if np_seq_depth > 0.0 {
        sim::check_exe("nanosim-h")?;
        tracing::info!("Simulating Nanopore reads...");
        let files = sim::run_parallel(&tasks, opt_parallel, |t| {
            sim::sim_nanosim(t, &ns_args, np_seq_depth, &tmp_dir)
        })?;

        tracing::info!("Combining simulated reads by community...");
        let written = sim::combine_by_community(
            files,
            &output_dir.join("nanopore"),
            sim::ReadFormat::Fasta,
            gzip,
        )?;
        for file in written {
            tracing::info!("File written: {}", file.display());
        }
    }

    //----------------------------
    // Cleanup
    //----------------------------
    if tmp_dir.exists() {
        tracing::info!("Removing temp directory...");
        std::fs::remove_dir_all(&tmp_dir)?;
    }

    Ok(())
}
