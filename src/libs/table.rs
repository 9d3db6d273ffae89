use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::io::Write;

use anyhow::{bail, Context};
use lazy_static::lazy_static;
use rayon::prelude::*;

lazy_static! {
    static ref TAXON_RE: regex::Regex = regex::Regex::new(r"[()/:;, ]+").unwrap();
}

/// Replaces runs of special characters in taxon names with `_`
///
/// ```
/// assert_eq!(mgsim::libs::table::tidy_taxon_name("Escherichia coli K-12"), "Escherichia_coli_K-12");
/// ```
pub fn tidy_taxon_name(name: &str) -> String {
    TAXON_RE.replace_all(name.trim(), "_").into_owned()
}

struct Header {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

fn parse_header(line: &str, required: &[&str]) -> anyhow::Result<Header> {
    let columns: Vec<String> = line
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .map(|s| s.to_string())
        .collect();
    let index: HashMap<String, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect();

    let missing: Vec<&str> = required
        .iter()
        .filter(|c| !index.contains_key(**c))
        .copied()
        .collect();
    if !missing.is_empty() {
        bail!("Cannot find table columns: {}", missing.join(","));
    }

    Ok(Header { columns, index })
}

fn split_row(line: &str, ncols: usize, lineno: usize) -> anyhow::Result<Vec<String>> {
    let fields: Vec<String> = line
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .map(|s| s.to_string())
        .collect();
    if fields.len() != ncols {
        bail!(
            "Line {}: expected {} fields, found {}",
            lineno,
            ncols,
            fields.len()
        );
    }
    Ok(fields)
}

#[derive(Debug, Clone)]
pub struct GenomeRecord {
    pub taxon: String,
    pub fasta: String,
    pub accession: Option<String>,
    pub genome_size: u64,
}

/// Genome table: tab-separated, named columns `Taxon` and `Fasta`
#[derive(Debug, Default)]
pub struct GenomeTable {
    pub records: Vec<GenomeRecord>,
}

impl GenomeTable {
    pub fn load(input: &str) -> anyhow::Result<Self> {
        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut header: Option<Header> = None;

        for (i, line) in crate::reader(input).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let hdr = match header.as_ref() {
                Some(hdr) => hdr,
                None => {
                    header = Some(parse_header(&line, &["Taxon", "Fasta"])?);
                    continue;
                }
            };

            let fields = split_row(&line, hdr.columns.len(), i + 1)?;
            let taxon = tidy_taxon_name(&fields[hdr.index["Taxon"]]);
            if !seen.insert(taxon.clone()) {
                bail!("Duplicated taxon in genome table: {}", taxon);
            }
            records.push(GenomeRecord {
                taxon,
                fasta: fields[hdr.index["Fasta"]].clone(),
                accession: hdr.index.get("Accession").map(|&i| fields[i].clone()),
                genome_size: 0,
            });
        }

        if records.is_empty() {
            bail!("Empty genome table: {}", input);
        }

        Ok(Self { records })
    }

    /// Loads the table and fills in total bp per genome, in parallel
    pub fn load_with_sizes(input: &str, parallel: usize) -> anyhow::Result<Self> {
        let mut table = Self::load(input)?;

        tracing::info!("Getting genome sizes (threads: {})", parallel);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel)
            .build()?;
        let sizes: anyhow::Result<Vec<u64>> = pool.install(|| {
            table
                .records
                .par_iter()
                .map(|r| {
                    genome_size(&r.fasta)
                        .with_context(|| format!("genome FASTA for {}: {}", r.taxon, r.fasta))
                })
                .collect()
        });

        for (record, size) in table.records.iter_mut().zip(sizes?) {
            if size == 0 {
                bail!("Genome {} has no sequence: {}", record.taxon, record.fasta);
            }
            record.genome_size = size;
        }

        Ok(table)
    }

    pub fn taxa(&self) -> Vec<String> {
        self.records.iter().map(|r| r.taxon.clone()).collect()
    }

    pub fn by_taxon(&self) -> HashMap<&str, &GenomeRecord> {
        self.records
            .iter()
            .map(|r| (r.taxon.as_str(), r))
            .collect()
    }
}

/// Total bases across all records of a FASTA file (plain or gzipped)
pub fn genome_size(fasta: &str) -> anyhow::Result<u64> {
    let mut fa_in = noodles_fasta::io::Reader::new(crate::reader(fasta));
    let mut bp = 0u64;
    for result in fa_in.records() {
        let record = result?;
        bp += record.sequence().len() as u64;
    }
    Ok(bp)
}

#[derive(Debug, Clone)]
pub struct AbundRecord {
    pub community: String,
    pub taxon: String,
    pub perc_rel_abund: f64,
    pub rank: usize,
}

/// Abundance table: tab-separated, named columns `Community`, `Taxon` and
/// `Perc_rel_abund`; `Rank` is filled in by row order when absent
#[derive(Debug, Default)]
pub struct AbundTable {
    pub records: Vec<AbundRecord>,
}

impl AbundTable {
    pub fn load(input: &str) -> anyhow::Result<Self> {
        let mut records: Vec<AbundRecord> = Vec::new();
        let mut header: Option<Header> = None;
        let mut rank_ctr: HashMap<String, usize> = HashMap::new();

        for (i, line) in crate::reader(input).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let hdr = match header.as_ref() {
                Some(hdr) => hdr,
                None => {
                    header = Some(parse_header(
                        &line,
                        &["Community", "Taxon", "Perc_rel_abund"],
                    )?);
                    continue;
                }
            };

            let fields = split_row(&line, hdr.columns.len(), i + 1)?;
            let community = fields[hdr.index["Community"]].clone();
            let perc: f64 = fields[hdr.index["Perc_rel_abund"]]
                .parse()
                .with_context(|| format!("Line {}: invalid Perc_rel_abund", i + 1))?;
            let rank = match hdr.index.get("Rank") {
                Some(&idx) => fields[idx]
                    .parse()
                    .with_context(|| format!("Line {}: invalid Rank", i + 1))?,
                None => {
                    let ctr = rank_ctr.entry(community.clone()).or_insert(0);
                    *ctr += 1;
                    *ctr
                }
            };
            records.push(AbundRecord {
                community,
                taxon: tidy_taxon_name(&fields[hdr.index["Taxon"]]),
                perc_rel_abund: perc,
                rank,
            });
        }

        if records.is_empty() {
            bail!("Empty abundance table: {}", input);
        }

        Ok(Self { records })
    }

    pub fn write(&self, output: &str) -> anyhow::Result<()> {
        let mut writer = crate::writer(output);
        writer.write_all(b"Community\tTaxon\tRank\tPerc_rel_abund\n")?;
        for r in &self.records {
            writer.write_fmt(format_args!(
                "{}\t{}\t{}\t{}\n",
                r.community, r.taxon, r.rank, r.perc_rel_abund
            ))?;
        }
        Ok(())
    }

    pub fn communities(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.community.clone()))
            .map(|r| r.community.clone())
            .collect()
    }
}

/// Accession table for `genome-download`: requires `Taxon` and `Accession`;
/// other columns pass through untouched
#[derive(Debug)]
pub struct AccessionTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    taxon_idx: usize,
    acc_idx: usize,
}

impl AccessionTable {
    pub fn load(input: &str) -> anyhow::Result<Self> {
        let mut header: Option<Header> = None;
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (i, line) in crate::reader(input).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let hdr = match header.as_ref() {
                Some(hdr) => hdr,
                None => {
                    header = Some(parse_header(&line, &["Taxon", "Accession"])?);
                    continue;
                }
            };

            let mut fields = split_row(&line, hdr.columns.len(), i + 1)?;
            let taxon = tidy_taxon_name(&fields[hdr.index["Taxon"]]);
            if !seen.insert(taxon.clone()) {
                bail!("Duplicated taxon in accession table: {}", taxon);
            }
            fields[hdr.index["Taxon"]] = taxon;
            rows.push(fields);
        }

        let header = match header {
            Some(hdr) if !rows.is_empty() => hdr,
            _ => bail!("Empty accession table: {}", input),
        };

        Ok(Self {
            taxon_idx: header.index["Taxon"],
            acc_idx: header.index["Accession"],
            columns: header.columns,
            rows,
        })
    }

    pub fn taxon(&self, row: usize) -> &str {
        &self.rows[row][self.taxon_idx]
    }

    pub fn accession(&self, row: usize) -> &str {
        &self.rows[row][self.acc_idx]
    }

    /// Writes the table back out with a `Fasta` column pointing at the
    /// downloaded files, replacing any existing `Fasta` column
    pub fn write_with_fasta(&self, fastas: &[String], output: &str) -> anyhow::Result<()> {
        let mut writer = crate::writer(output);
        let fasta_idx = self.columns.iter().position(|c| c == "Fasta");

        let mut columns = self.columns.clone();
        if fasta_idx.is_none() {
            columns.push("Fasta".to_string());
        }
        writer.write_fmt(format_args!("{}\n", columns.join("\t")))?;

        for (row, fasta) in self.rows.iter().zip(fastas) {
            let mut fields = row.clone();
            match fasta_idx {
                Some(idx) => fields[idx] = fasta.clone(),
                None => fields.push(fasta.clone()),
            }
            writer.write_fmt(format_args!("{}\n", fields.join("\t")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_tidy_taxon_name() {
        assert_eq!(tidy_taxon_name("Escherichia coli"), "Escherichia_coli");
        assert_eq!(tidy_taxon_name("E. coli (K-12)"), "E._coli_K-12_");
        assert_eq!(tidy_taxon_name("a/b:c;d,e"), "a_b_c_d_e");
        assert_eq!(tidy_taxon_name("plain"), "plain");
    }

    #[test]
    fn test_genome_table_load() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("genomes.tsv");
        // columns out of order on purpose
        fs::write(&table, "Fasta\tTaxon\na.fna\tE. coli\nb.fna\tB subtilis\n").unwrap();

        let gt = GenomeTable::load(table.to_str().unwrap()).unwrap();
        assert_eq!(gt.records.len(), 2);
        assert_eq!(gt.records[0].taxon, "E._coli");
        assert_eq!(gt.records[0].fasta, "a.fna");
        assert_eq!(gt.records[1].taxon, "B_subtilis");
    }

    #[test]
    fn test_genome_table_missing_column() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("genomes.tsv");
        fs::write(&table, "Taxon\tPath\nE_coli\ta.fna\n").unwrap();

        let err = GenomeTable::load(table.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Cannot find table columns: Fasta"));
    }

    #[test]
    fn test_genome_table_duplicate_taxon() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("genomes.tsv");
        fs::write(&table, "Taxon\tFasta\nE_coli\ta.fna\nE_coli\tb.fna\n").unwrap();

        let err = GenomeTable::load(table.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Duplicated taxon"));
    }

    #[test]
    fn test_genome_size() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("g.fna");
        fs::write(&fasta, ">s1\nACGTACGT\nACGT\n>s2\nTTTT\n").unwrap();

        let bp = genome_size(fasta.to_str().unwrap()).unwrap();
        assert_eq!(bp, 16);
    }

    #[test]
    fn test_abund_table_load_without_rank() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("abund.tsv");
        fs::write(
            &table,
            "Community\tTaxon\tPerc_rel_abund\n1\tE_coli\t75.0\n1\tB_subtilis\t25.0\n2\tE_coli\t100.0\n",
        )
        .unwrap();

        let at = AbundTable::load(table.to_str().unwrap()).unwrap();
        assert_eq!(at.records.len(), 3);
        assert_eq!(at.records[0].rank, 1);
        assert_eq!(at.records[1].rank, 2);
        assert_eq!(at.records[2].rank, 1);
        assert_eq!(at.communities(), vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_accession_table_roundtrip() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("acc.tsv");
        fs::write(&table, "Taxon\tAccession\nE coli\tNC_000913.3\n").unwrap();

        let at = AccessionTable::load(table.to_str().unwrap()).unwrap();
        assert_eq!(at.taxon(0), "E_coli");
        assert_eq!(at.accession(0), "NC_000913.3");

        let out = dir.path().join("out.tsv");
        at.write_with_fasta(
            &["genomes/E_coli.fna".to_string()],
            out.to_str().unwrap(),
        )
        .unwrap();
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(
            written,
            "Taxon\tAccession\tFasta\nE_coli\tNC_000913.3\tgenomes/E_coli.fna\n"
        );
    }
}
