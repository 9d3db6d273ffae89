use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn parse_abund(path: &std::path::Path) -> Vec<(String, String, usize, f64)> {
    let content = fs::read_to_string(path).unwrap();
    let mut rows = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        rows.push((
            fields[0].to_string(),
            fields[1].to_string(),
            fields[2].parse().unwrap(),
            fields[3].parse().unwrap(),
        ));
    }
    rows
}

#[test]
fn command_communities_basic() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let prefix = temp.path().join("comm");

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(&prefix)
        .arg("--rnd-seed")
        .arg("11")
        .assert()
        .success();

    let outfile = temp.path().join("comm_abund.txt");
    assert!(outfile.exists());

    let content = fs::read_to_string(&outfile)?;
    assert!(content.starts_with("Community\tTaxon\tRank\tPerc_rel_abund\n"));

    let rows = parse_abund(&outfile);
    // one community holding the whole 2-taxon pool
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].2, 1);
    assert_eq!(rows[1].2, 2);
    assert!(rows[0].3 >= rows[1].3);

    let sum: f64 = rows.iter().map(|r| r.3).sum();
    assert!((sum - 100.0).abs() < 1e-6);

    Ok(())
}

#[test]
fn command_communities_deterministic() -> anyhow::Result<()> {
    let temp = TempDir::new()?;

    for prefix in ["a", "b"] {
        let mut cmd = Command::cargo_bin("mgsim")?;
        cmd.arg("communities")
            .arg("tests/data/genome_list.tsv")
            .arg(temp.path().join(prefix))
            .arg("--rnd-seed")
            .arg("42")
            .assert()
            .success();
    }

    let a = fs::read_to_string(temp.path().join("a_abund.txt"))?;
    let b = fs::read_to_string(temp.path().join("b_abund.txt"))?;
    assert_eq!(a, b);

    Ok(())
}

#[test]
fn command_communities_fully_shared() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let prefix = temp.path().join("comm");

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(&prefix)
        .arg("--n-comm")
        .arg("3")
        .arg("--rnd-seed")
        .arg("7")
        .assert()
        .success();

    let rows = parse_abund(&temp.path().join("comm_abund.txt"));
    assert_eq!(rows.len(), 6);

    // default --shared-perc 100 --perm-perc 0: identical rank orders
    let mut by_comm: HashMap<String, Vec<String>> = HashMap::new();
    for (community, taxon, _, _) in rows {
        by_comm.entry(community).or_default().push(taxon);
    }
    assert_eq!(by_comm.len(), 3);
    assert_eq!(by_comm["1"], by_comm["2"]);
    assert_eq!(by_comm["2"], by_comm["3"]);

    Ok(())
}

#[test]
fn command_communities_richness_fraction() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let prefix = temp.path().join("comm");

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(&prefix)
        .arg("--richness")
        .arg("0.5")
        .arg("--rnd-seed")
        .arg("5")
        .assert()
        .success();

    let rows = parse_abund(&temp.path().join("comm_abund.txt"));
    assert_eq!(rows.len(), 1);
    assert!((rows[0].3 - 100.0).abs() < 1e-6);

    Ok(())
}

#[test]
fn command_communities_unknown_dist() -> anyhow::Result<()> {
    let temp = TempDir::new()?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(temp.path().join("comm"))
        .arg("--abund-dist")
        .arg("zipf,1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown abundance distribution"));

    Ok(())
}

#[test]
fn command_communities_richness_exceeds_pool() -> anyhow::Result<()> {
    let temp = TempDir::new()?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(temp.path().join("comm"))
        .arg("--richness")
        .arg("10")
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds the taxon pool"));

    Ok(())
}

#[test]
fn command_communities_bad_shared_perc() -> anyhow::Result<()> {
    let temp = TempDir::new()?;

    let mut cmd = Command::cargo_bin("mgsim")?;
    cmd.arg("communities")
        .arg("tests/data/genome_list.tsv")
        .arg(temp.path().join("comm"))
        .arg("--shared-perc")
        .arg("150")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--shared-perc"));

    Ok(())
}
