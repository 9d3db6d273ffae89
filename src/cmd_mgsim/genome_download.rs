use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::*;
use rayon::prelude::*;

use mgsim::libs::table::AccessionTable;

const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    Command::new("genome-download")
        .alias("genome_download")
        .about("Download genome sequences from NCBI by accession")
        .after_help(
            r###"
This command fetches one genome FASTA per table row from the NCBI nucleotide
database (E-utilities efetch) and writes it to <outdir>/<Taxon>.fna. The
input table is echoed back with a `Fasta` column appended, ready for
`mgsim communities` and `mgsim reads`.

Notes:
* The accession table needs `Taxon` and `Accession` columns (tab-separated)
* Taxon names are tidied (special characters become `_`) and must be unique
* Requests are rate limited to 3/s, or 10/s with `--api-key`
* A failed download leaves no partial .fna behind

Examples:
1. Download into ./genomes and capture the updated table:
   mgsim genome-download accessions.tsv -o genome_list.tsv

2. Parallel downloads with an NCBI API key:
   mgsim genome-download accessions.tsv --api-key $NCBI_KEY -p 4

3. Rename sequences to the taxon name:
   mgsim genome-download accessions.tsv --rename

"###,
        )
        .arg(
            Arg::new("accession_table")
                .required(true)
                .index(1)
                .help("Accession table (Taxon, Accession)"),
        )
        .arg(
            Arg::new("outdir")
                .long("outdir")
                .short('d')
                .num_args(1)
                .default_value("genomes")
                .help("Directory for downloaded genome FASTA files"),
        )
        .arg(
            Arg::new("email")
                .long("email")
                .num_args(1)
                .help("Email reported to NCBI E-utilities"),
        )
        .arg(
            Arg::new("api_key")
                .long("api-key")
                .num_args(1)
                .help("NCBI API key (raises the request rate limit)"),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .num_args(1)
                .default_value("3")
                .value_parser(value_parser!(usize))
                .help("Download attempts per accession"),
        )
        .arg(
            Arg::new("rename")
                .long("rename")
                .action(ArgAction::SetTrue)
                .help("Rename sequences to <Taxon>__seq<i>"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of parallel downloads"),
        )
        .arg(
            Arg::new("outfile")
                .long("outfile")
                .short('o')
                .num_args(1)
                .default_value("stdout")
                .help("Updated genome table. [stdout] for screen"),
        )
}

struct Efetch {
    client: reqwest::blocking::Client,
    email: Option<String>,
    api_key: Option<String>,
    retries: usize,
    // request pacing shared across worker threads
    gate: std::sync::Mutex<Instant>,
    min_gap: Duration,
}

impl Efetch {
    fn new(email: Option<String>, api_key: Option<String>, retries: usize) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("mgsim/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()?;
        let min_gap = if api_key.is_some() {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(334)
        };
        Ok(Self {
            client,
            email,
            api_key,
            retries,
            gate: std::sync::Mutex::new(Instant::now() - min_gap),
            min_gap,
        })
    }

    fn wait_turn(&self) {
        let mut last = self.gate.lock().unwrap();
        let elapsed = last.elapsed();
        if elapsed < self.min_gap {
            std::thread::sleep(self.min_gap - elapsed);
        }
        *last = Instant::now();
    }

    fn fetch(&self, accession: &str) -> anyhow::Result<String> {
        let mut query: Vec<(&str, &str)> = vec![
            ("db", "nuccore"),
            ("id", accession),
            ("rettype", "fasta"),
            ("retmode", "text"),
        ];
        if let Some(email) = self.email.as_deref() {
            query.push(("email", email));
        }
        if let Some(key) = self.api_key.as_deref() {
            query.push(("api_key", key));
        }

        let mut last_err = anyhow::anyhow!("no attempts made");
        for attempt in 1..=self.retries.max(1) {
            self.wait_turn();
            let result = self
                .client
                .get(EFETCH_URL)
                .query(&query)
                .send()
                .and_then(|resp| resp.error_for_status())
                .map_err(anyhow::Error::from)
                .and_then(|resp| resp.text().map_err(anyhow::Error::from));

            match result {
                Ok(body) if body.starts_with('>') => return Ok(body),
                Ok(body) => {
                    last_err = anyhow::anyhow!(
                        "efetch returned no FASTA for {}: {}",
                        accession,
                        body.chars().take(100).collect::<String>().trim()
                    );
                }
                Err(e) => last_err = e,
            }
            tracing::warn!("Attempt {} failed for {}: {}", attempt, accession, last_err);
            std::thread::sleep(Duration::from_secs(attempt as u64));
        }

        Err(last_err.context(format!("Cannot download accession: {}", accession)))
    }
}

/// Writes the FASTA body atomically; with `rename`, records become
/// `<taxon>__seq<i>`
fn write_genome(body: &str, taxon: &str, outdir: &Path, rename: bool) -> anyhow::Result<PathBuf> {
    let out_path = outdir.join(format!("{}.fna", taxon));
    let mut tmp = tempfile::NamedTempFile::new_in(outdir)?;

    if rename {
        let mut fa_in = noodles_fasta::io::Reader::new(body.as_bytes());
        let mut fa_out = noodles_fasta::io::Writer::new(&mut tmp);
        let mut n = 0;
        for result in fa_in.records() {
            let record = result?;
            n += 1;
            let definition =
                noodles_fasta::record::Definition::new(format!("{}__seq{}", taxon, n), None);
            fa_out.write_record(&noodles_fasta::Record::new(
                definition,
                record.sequence().clone(),
            ))?;
        }
        if n == 0 {
            anyhow::bail!("No FASTA records for {}", taxon);
        }
    } else {
        tmp.write_all(body.as_bytes())?;
    }

    tmp.flush()?;
    tmp.persist(&out_path)
        .with_context(|| format!("Cannot write {}", out_path.display()))?;
    Ok(out_path)
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    //----------------------------
    // Args
    //----------------------------
    let accession_table = args.get_one::<String>("accession_table").unwrap();
    let outdir = PathBuf::from(args.get_one::<String>("outdir").unwrap());
    let outfile = args.get_one::<String>("outfile").unwrap();
    let rename = args.get_flag("rename");
    let retries = *args.get_one::<usize>("retries").unwrap();
    let opt_parallel = *args.get_one::<usize>("parallel").unwrap();

    let table = AccessionTable::load(accession_table)?;
    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("Cannot create output directory: {}", outdir.display()))?;

    let efetch = Efetch::new(
        args.get_one::<String>("email").cloned(),
        args.get_one::<String>("api_key").cloned(),
        retries,
    )?;

    //----------------------------
    // Downloads
    //----------------------------
    tracing::info!(
        "Downloading {} genomes (threads: {})",
        table.rows.len(),
        opt_parallel
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opt_parallel)
        .build()?;
    let fastas: anyhow::Result<Vec<String>> = pool.install(|| {
        (0..table.rows.len())
            .into_par_iter()
            .map(|i| {
                let body = efetch.fetch(table.accession(i))?;
                let path = write_genome(&body, table.taxon(i), &outdir, rename)?;
                tracing::info!("File written: {}", path.display());
                Ok(path.display().to_string())
            })
            .collect()
    });

    //----------------------------
    // Output
    //----------------------------
    table.write_with_fasta(&fastas?, outfile)?;

    Ok(())
}
