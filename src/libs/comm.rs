use std::collections::HashSet;

use anyhow::bail;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Distribution;

/// Rank-abundance distribution, parsed from `name[,param...]`
///
/// Accepted forms:
/// * `lognormal,<mu>,<sigma>`
/// * `exponential,<lambda>`
/// * `geometric,<p>`
/// * `uniform,<low>,<high>`
#[derive(Debug, Clone, PartialEq)]
pub enum AbundDist {
    LogNormal { mu: f64, sigma: f64 },
    Exponential { lambda: f64 },
    Geometric { p: f64 },
    Uniform { low: f64, high: f64 },
}

impl std::str::FromStr for AbundDist {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let fields: Vec<&str> = s.split(',').map(|f| f.trim()).collect();
        let params: anyhow::Result<Vec<f64>> = fields[1..]
            .iter()
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid distribution parameter: {}", f))
            })
            .collect();
        let params = params?;

        let dist = match (fields[0].to_ascii_lowercase().as_str(), params.as_slice()) {
            ("lognormal", [mu, sigma]) => {
                if *sigma <= 0.0 {
                    bail!("lognormal sigma must be > 0: {}", sigma);
                }
                Self::LogNormal {
                    mu: *mu,
                    sigma: *sigma,
                }
            }
            ("exponential", [lambda]) | ("exp", [lambda]) => {
                if *lambda <= 0.0 {
                    bail!("exponential lambda must be > 0: {}", lambda);
                }
                Self::Exponential { lambda: *lambda }
            }
            ("geometric", [p]) | ("geom", [p]) => {
                if *p <= 0.0 || *p > 1.0 {
                    bail!("geometric p must be in (0,1]: {}", p);
                }
                Self::Geometric { p: *p }
            }
            ("uniform", [low, high]) => {
                if *low < 0.0 || low >= high {
                    bail!("uniform requires 0 <= low < high: {},{}", low, high);
                }
                Self::Uniform {
                    low: *low,
                    high: *high,
                }
            }
            _ => bail!(
                "Unknown abundance distribution: {}. Accepted: lognormal,<mu>,<sigma>; \
                 exponential,<lambda>; geometric,<p>; uniform,<low>,<high>",
                s
            ),
        };

        Ok(dist)
    }
}

impl AbundDist {
    /// `n` independent draws; all values finite and > 0
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> anyhow::Result<Vec<f64>> {
        let values = match self {
            Self::LogNormal { mu, sigma } => {
                let dist = rand_distr::LogNormal::new(*mu, *sigma)
                    .map_err(|e| anyhow::anyhow!("lognormal: {}", e))?;
                (0..n).map(|_| dist.sample(rng)).collect()
            }
            Self::Exponential { lambda } => {
                let dist = rand_distr::Exp::new(*lambda)
                    .map_err(|e| anyhow::anyhow!("exponential: {}", e))?;
                (0..n).map(|_| dist.sample(rng)).collect()
            }
            Self::Geometric { p } => {
                let dist = rand_distr::Geometric::new(*p)
                    .map_err(|e| anyhow::anyhow!("geometric: {}", e))?;
                // shift so the smallest draw still carries weight
                (0..n).map(|_| (dist.sample(rng) + 1) as f64).collect()
            }
            Self::Uniform { low, high } => {
                let dist = rand_distr::Uniform::new(*low, *high);
                (0..n).map(|_| dist.sample(rng)).collect()
            }
        };

        Ok(values)
    }
}

/// Sorts draws descending and normalizes them to percent relative abundances
pub fn rank_abundances(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| b.total_cmp(a));
    let sum: f64 = values.iter().sum();
    values.iter().map(|v| v / sum * 100.0).collect()
}

#[derive(Debug, Clone)]
pub struct CommunityParams {
    pub n_comm: usize,
    pub richness: f64,
    pub shared_perc: f64,
    pub perm_perc: f64,
}

impl CommunityParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_comm == 0 {
            bail!("--n-comm must be >= 1");
        }
        if self.richness <= 0.0 {
            bail!("--richness must be > 0: {}", self.richness);
        }
        if !(0.0..=100.0).contains(&self.shared_perc) {
            bail!("--shared-perc must be between 0 and 100: {}", self.shared_perc);
        }
        if !(0.0..=100.0).contains(&self.perm_perc) {
            bail!("--perm-perc must be between 0 and 100: {}", self.perm_perc);
        }
        Ok(())
    }
}

/// Values <= 1 are a fraction of the taxon pool; larger values are a count
pub fn effective_richness(richness: f64, pool: usize) -> anyhow::Result<usize> {
    let n = if richness <= 1.0 {
        ((richness * pool as f64).round() as usize).max(1)
    } else {
        richness.round() as usize
    };
    if n > pool {
        bail!(
            "Requested richness ({}) exceeds the taxon pool ({})",
            n,
            pool
        );
    }
    Ok(n)
}

/// Per-community ordered taxon lists (rank 1 first)
///
/// All communities draw from one global base ranking, so with
/// `shared_perc = 100` and `perm_perc = 0` they are identical.
pub fn assemble<R: Rng>(
    taxa: &[String],
    params: &CommunityParams,
    rng: &mut R,
) -> anyhow::Result<Vec<Vec<String>>> {
    params.validate()?;
    let richness = effective_richness(params.richness, taxa.len())?;

    let mut base: Vec<String> = taxa.to_vec();
    base.shuffle(rng);

    let n_shared = ((richness as f64 * params.shared_perc / 100.0).round() as usize).min(richness);
    let n_unique = richness - n_shared;

    let shared: HashSet<String> = base
        .choose_multiple(rng, n_shared)
        .cloned()
        .collect();
    let unshared_pool: Vec<String> = base
        .iter()
        .filter(|t| !shared.contains(*t))
        .cloned()
        .collect();
    if unshared_pool.len() < n_unique {
        bail!(
            "Not enough unshared taxa ({}) to fill {} community-specific slots",
            unshared_pool.len(),
            n_unique
        );
    }

    let n_permuted = (params.perm_perc / 100.0 * richness as f64).round() as usize;

    let mut communities = Vec::with_capacity(params.n_comm);
    for _ in 0..params.n_comm {
        let members: HashSet<String> = shared
            .iter()
            .cloned()
            .chain(unshared_pool.choose_multiple(rng, n_unique).cloned())
            .collect();

        // base ranking restricted to this community's members
        let mut order: Vec<String> = base.iter().filter(|t| members.contains(*t)).cloned().collect();

        if n_permuted >= 2 {
            let slots = rand::seq::index::sample(rng, richness, n_permuted).into_vec();
            let mut picked: Vec<String> = slots.iter().map(|&i| order[i].clone()).collect();
            picked.shuffle(rng);
            for (slot, taxon) in slots.into_iter().zip(picked) {
                order[slot] = taxon;
            }
        }

        communities.push(order);
    }

    Ok(communities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn taxa(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("taxon_{}", i)).collect()
    }

    #[test]
    fn test_dist_parse() {
        assert_eq!(
            "lognormal,0,2".parse::<AbundDist>().unwrap(),
            AbundDist::LogNormal { mu: 0.0, sigma: 2.0 }
        );
        assert_eq!(
            "geometric,0.5".parse::<AbundDist>().unwrap(),
            AbundDist::Geometric { p: 0.5 }
        );
        assert!("lognormal,0".parse::<AbundDist>().is_err());
        assert!("lognormal,0,-1".parse::<AbundDist>().is_err());
        assert!("zipf,1".parse::<AbundDist>().is_err());
    }

    #[test]
    fn test_sample_positive() {
        let mut rng = StdRng::seed_from_u64(7);
        for dist in [
            "lognormal,0,2",
            "exponential,0.5",
            "geometric,0.3",
            "uniform,1,10",
        ] {
            let dist: AbundDist = dist.parse().unwrap();
            let values = dist.sample(100, &mut rng).unwrap();
            assert_eq!(values.len(), 100);
            assert!(values.iter().all(|v| v.is_finite() && *v > 0.0));
        }
    }

    #[test]
    fn test_rank_abundances() {
        let ranked = rank_abundances(vec![1.0, 4.0, 3.0, 2.0]);
        assert_relative_eq!(ranked.iter().sum::<f64>(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(ranked[0], 40.0, epsilon = 1e-9);
        assert!(ranked.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_effective_richness() {
        assert_eq!(effective_richness(1.0, 10).unwrap(), 10);
        assert_eq!(effective_richness(0.5, 10).unwrap(), 5);
        assert_eq!(effective_richness(0.01, 10).unwrap(), 1);
        assert_eq!(effective_richness(7.0, 10).unwrap(), 7);
        assert!(effective_richness(11.0, 10).is_err());
    }

    #[test]
    fn test_assemble_fully_shared() {
        let params = CommunityParams {
            n_comm: 3,
            richness: 1.0,
            shared_perc: 100.0,
            perm_perc: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let comms = assemble(&taxa(20), &params, &mut rng).unwrap();
        assert_eq!(comms.len(), 3);
        assert_eq!(comms[0].len(), 20);
        assert_eq!(comms[0], comms[1]);
        assert_eq!(comms[1], comms[2]);
    }

    #[test]
    fn test_assemble_permuted_keeps_members() {
        let params = CommunityParams {
            n_comm: 2,
            richness: 1.0,
            shared_perc: 100.0,
            perm_perc: 50.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let comms = assemble(&taxa(20), &params, &mut rng).unwrap();

        let a: HashSet<_> = comms[0].iter().collect();
        let b: HashSet<_> = comms[1].iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_assemble_partially_shared() {
        let params = CommunityParams {
            n_comm: 2,
            richness: 5.0,
            shared_perc: 60.0,
            perm_perc: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let comms = assemble(&taxa(30), &params, &mut rng).unwrap();

        assert_eq!(comms[0].len(), 5);
        assert_eq!(comms[1].len(), 5);
        let a: HashSet<_> = comms[0].iter().collect();
        let b: HashSet<_> = comms[1].iter().collect();
        // 3 shared taxa are in every community
        assert!(a.intersection(&b).count() >= 3);
    }

    #[test]
    fn test_assemble_deterministic() {
        let params = CommunityParams {
            n_comm: 2,
            richness: 0.5,
            shared_perc: 50.0,
            perm_perc: 20.0,
        };
        let comms1 = assemble(&taxa(16), &params, &mut StdRng::seed_from_u64(42)).unwrap();
        let comms2 = assemble(&taxa(16), &params, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(comms1, comms2);
    }
}
