use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn command_genome_download_missing_column() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let table = temp.path().join("acc.tsv");
    fs::write(&table, "Taxon\tId\nE_coli\tNC_000913.3\n")?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("genome-download")
        .arg(&table)
        .arg("-d")
        .arg(temp.path().join("genomes"))
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Cannot find table columns: Accession",
        ));

    Ok(())
}

#[test]
fn command_genome_download_duplicate_taxon() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let table = temp.path().join("acc.tsv");
    fs::write(
        &table,
        "Taxon\tAccession\nE coli\tNC_000913.3\nE_coli\tU00096.3\n",
    )?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("genome-download")
        .arg(&table)
        .arg("-d")
        .arg(temp.path().join("genomes"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicated taxon"));

    Ok(())
}

#[test]
fn command_genome_download_empty_table() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let table = temp.path().join("acc.tsv");
    fs::write(&table, "Taxon\tAccession\n")?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("genome-download")
        .arg(&table)
        .arg("-d")
        .arg(temp.path().join("genomes"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Empty accession table"));

    Ok(())
}
