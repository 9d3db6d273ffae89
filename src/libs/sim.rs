use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use itertools::Itertools;
use rayon::prelude::*;

use crate::libs::table::{AbundTable, GenomeTable};

/// One read-simulation job: a taxon's genome inside one community
#[derive(Debug, Clone)]
pub struct SimTask {
    pub community: String,
    pub taxon: String,
    pub genome_size: u64,
    pub fasta: String,
    pub perc_rel_abund: f64,
}

impl SimTask {
    /// Coverage passed to `art_illumina -f`
    pub fn fold(&self, seq_depth: f64, read_len: u64) -> f64 {
        self.perc_rel_abund / 100.0 * seq_depth * read_len as f64 / self.genome_size as f64
    }

    /// Read-count budget for the long-read simulators
    pub fn n_reads(&self, seq_depth: f64) -> u64 {
        (self.perc_rel_abund / 100.0 * seq_depth) as u64
    }

    fn tmp_prefix(&self, tmp_dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
        let dir = tmp_dir.join(&self.community).join(&self.taxon);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create temp directory: {}", dir.display()))?;
        Ok(dir.join(stem))
    }
}

/// Joins the abundance table to the genome table on tidied taxon names
pub fn build_tasks(genomes: &GenomeTable, abunds: &AbundTable) -> anyhow::Result<Vec<SimTask>> {
    let by_taxon = genomes.by_taxon();

    let mut tasks = Vec::with_capacity(abunds.records.len());
    let mut missing: Vec<String> = Vec::new();
    for rec in &abunds.records {
        match by_taxon.get(rec.taxon.as_str()) {
            Some(genome) => tasks.push(SimTask {
                community: rec.community.clone(),
                taxon: rec.taxon.clone(),
                genome_size: genome.genome_size,
                fasta: genome.fasta.clone(),
                perc_rel_abund: rec.perc_rel_abund,
            }),
            None => missing.push(rec.taxon.clone()),
        }
    }

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        bail!(
            "No genome for abundance-table taxa: {}",
            missing.join(",")
        );
    }

    Ok(tasks)
}

#[derive(Debug, Clone)]
pub struct ArtParams {
    pub paired: bool,
    pub len: usize,
    pub mflen: f64,
    pub sdev: f64,
    pub seq_sys: String,
    pub rnd_seed: Option<u64>,
}

impl ArtParams {
    /// `--mflen > 0` implies a paired run, matching art's own behavior
    pub fn pairs(&self) -> u64 {
        if self.paired || self.mflen > 0.0 {
            2
        } else {
            1
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--len".to_string(),
            self.len.to_string(),
            "--seqSys".to_string(),
            self.seq_sys.clone(),
        ];
        if self.paired {
            args.push("--paired".to_string());
        }
        if self.mflen > 0.0 {
            args.push("--mflen".to_string());
            args.push(self.mflen.to_string());
            args.push("--sdev".to_string());
            args.push(self.sdev.to_string());
        }
        args
    }
}

/// Per-taxon read files produced by one simulator run
#[derive(Debug, Clone)]
pub struct TaskReads {
    pub community: String,
    pub r1: PathBuf,
    pub r2: Option<PathBuf>,
}

pub fn check_exe(exe: &str) -> anyhow::Result<()> {
    if which::which(exe).is_err() {
        bail!("{} not found in PATH. Please install {} first.", exe, exe);
    }
    Ok(())
}

fn run_tool(program: &str, args: &[String]) -> anyhow::Result<()> {
    tracing::debug!("CMD: {} {}", program, args.join(" "));
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {}", program))?;

    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Runs `art_illumina` for one task, returning the temp fastq file(s)
pub fn sim_art(
    task: &SimTask,
    art: &ArtParams,
    seq_depth: f64,
    tmp_dir: &Path,
) -> anyhow::Result<TaskReads> {
    let prefix = task.tmp_prefix(tmp_dir, "illumina")?;
    let fold = task.fold(seq_depth, art.len as u64 * art.pairs());

    let mut args = art.to_args();
    args.extend([
        "--noALN".to_string(),
        "-f".to_string(),
        fold.to_string(),
        "-i".to_string(),
        task.fasta.clone(),
        "-o".to_string(),
        prefix.display().to_string(),
    ]);
    if let Some(seed) = art.rnd_seed {
        args.push("--rndSeed".to_string());
        args.push(seed.to_string());
    }
    run_tool("art_illumina", &args)?;

    let r0 = PathBuf::from(format!("{}.fq", prefix.display()));
    let r1 = PathBuf::from(format!("{}1.fq", prefix.display()));
    let r2 = PathBuf::from(format!("{}2.fq", prefix.display()));
    if r1.is_file() && r2.is_file() {
        Ok(TaskReads {
            community: task.community.clone(),
            r1,
            r2: Some(r2),
        })
    } else if r0.is_file() {
        Ok(TaskReads {
            community: task.community.clone(),
            r1: r0,
            r2: None,
        })
    } else {
        bail!(
            "Cannot find art_illumina output files for: {}",
            prefix.display()
        );
    }
}

/// Runs `simlord` for one task
pub fn sim_simlord(
    task: &SimTask,
    extra: &[String],
    seq_depth: f64,
    tmp_dir: &Path,
) -> anyhow::Result<TaskReads> {
    let prefix = task.tmp_prefix(tmp_dir, "pacbio")?;

    let mut args = extra.to_vec();
    args.extend([
        "--num-reads".to_string(),
        task.n_reads(seq_depth).to_string(),
        "--read-reference".to_string(),
        task.fasta.clone(),
        prefix.display().to_string(),
    ]);
    run_tool("simlord", &args)?;

    let r0 = PathBuf::from(format!("{}.fastq", prefix.display()));
    if !r0.is_file() {
        bail!("Cannot find simlord output fastq for: {}", prefix.display());
    }
    Ok(TaskReads {
        community: task.community.clone(),
        r1: r0,
        r2: None,
    })
}

/// Runs `nanosim-h` for one task; its output is FASTA
pub fn sim_nanosim(
    task: &SimTask,
    extra: &[String],
    seq_depth: f64,
    tmp_dir: &Path,
) -> anyhow::Result<TaskReads> {
    let prefix = task.tmp_prefix(tmp_dir, "nanopore")?;

    let mut args = extra.to_vec();
    args.extend([
        "--circular".to_string(),
        "--number".to_string(),
        task.n_reads(seq_depth).to_string(),
        "--out-pref".to_string(),
        prefix.display().to_string(),
        task.fasta.clone(),
    ]);
    run_tool("nanosim-h", &args)?;

    let r0 = PathBuf::from(format!("{}.fa", prefix.display()));
    if !r0.is_file() {
        bail!("Cannot find nanosim-h output fasta for: {}", prefix.display());
    }
    Ok(TaskReads {
        community: task.community.clone(),
        r1: r0,
        r2: None,
    })
}

/// Runs one simulator over all tasks in a rayon pool of `parallel` threads
pub fn run_parallel<F>(
    tasks: &[SimTask],
    parallel: usize,
    sim_fn: F,
) -> anyhow::Result<Vec<TaskReads>>
where
    F: Fn(&SimTask) -> anyhow::Result<TaskReads> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel)
        .build()?;
    pool.install(|| tasks.par_iter().map(|t| sim_fn(t)).collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadFormat {
    Fastq,
    Fasta,
}

impl ReadFormat {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Fastq => "fq",
            Self::Fasta => "fa",
        }
    }
}

/// Concatenates per-taxon read files into per-community R1/R2 files,
/// renaming read `i` of taxon `t` to `t__SEQ{i}`. Consumed temp files are
/// deleted.
pub fn combine_by_community(
    files: Vec<TaskReads>,
    outdir: &Path,
    format: ReadFormat,
    gzip: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let by_comm = files
        .into_iter()
        .map(|t| (t.community.clone(), t))
        .into_group_map();

    let mut written: Vec<PathBuf> = Vec::new();
    for community in by_comm.keys().sorted() {
        let tasks = &by_comm[community];
        let dir = outdir.join(community);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory: {}", dir.display()))?;

        let gz = if gzip { ".gz" } else { "" };
        let r1_out = dir.join(format!("R1.{}{}", format.suffix(), gz));
        let r1_files: Vec<&PathBuf> = tasks.iter().map(|t| &t.r1).collect();
        combine_files(&r1_files, &r1_out, format)?;
        written.push(r1_out);

        if tasks.iter().all(|t| t.r2.is_some()) {
            let r2_out = dir.join(format!("R2.{}{}", format.suffix(), gz));
            let r2_files: Vec<&PathBuf> = tasks.iter().filter_map(|t| t.r2.as_ref()).collect();
            combine_files(&r2_files, &r2_out, format)?;
            written.push(r2_out);
        }
    }

    Ok(written)
}

fn taxon_of(input: &Path) -> anyhow::Result<&str> {
    input
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive taxon from path: {}", input.display()))
}

fn combine_files(inputs: &[&PathBuf], outfile: &Path, format: ReadFormat) -> anyhow::Result<()> {
    let writer = crate::writer(&outfile.display().to_string());

    match format {
        ReadFormat::Fastq => {
            let mut fq_out = noodles_fastq::io::Writer::new(writer);
            for input in inputs {
                let taxon = taxon_of(input)?;
                let mut fq_in =
                    noodles_fastq::io::Reader::new(crate::reader(&input.display().to_string()));
                for (i, result) in fq_in.records().enumerate() {
                    let record = result?;
                    let definition =
                        noodles_fastq::record::Definition::new(format!("{}__SEQ{}", taxon, i), "");
                    let renamed = noodles_fastq::Record::new(
                        definition,
                        record.sequence().to_vec(),
                        record.quality_scores().to_vec(),
                    );
                    fq_out.write_record(&renamed)?;
                }
                std::fs::remove_file(input)?;
            }
        }
        ReadFormat::Fasta => {
            let mut fa_out = noodles_fasta::io::writer::Builder::default()
                .set_line_base_count(usize::MAX)
                .build_from_writer(writer);
            for input in inputs {
                let taxon = taxon_of(input)?;
                let mut fa_in =
                    noodles_fasta::io::Reader::new(crate::reader(&input.display().to_string()));
                for (i, result) in fa_in.records().enumerate() {
                    let record = result?;
                    let definition = noodles_fasta::record::Definition::new(
                        format!("{}__SEQ{}", taxon, i),
                        None,
                    );
                    let renamed =
                        noodles_fasta::Record::new(definition, record.sequence().clone());
                    fa_out.write_record(&renamed)?;
                }
                std::fs::remove_file(input)?;
            }
        }
    }

    Ok(())
}
