//! Rank-frequency sampling of targets following a *Zipf-Mandelbrot* distribution.
//!
//! The target set is ranked by position: the first target has rank 1, the second rank 2, and so
//! on. The weight of rank `r` is proportional to `(r + q)^(-s)`, where `q` shifts the ranks and
//! `s` controls how steeply popularity decays. With `q = 0` this is the classic Zipf law.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Distribution;
use rand_distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape parameters of a Zipf-Mandelbrot distribution.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ZipfParams {
    /// Rank offset, must be `>= 0`.
    pub q: f64,
    /// Decay exponent, must be `> 0`.
    pub s: f64,
}

impl Default for ZipfParams {
    fn default() -> Self {
        Self { q: 0.0, s: 1.0 }
    }
}

impl ZipfParams {
    /// Checks that the parameters describe a proper distribution.
    pub fn validate(&self) -> Result<()> {
        if !self.q.is_finite() || self.q < 0.0 {
            return Err(Error::InvalidDistribution(format!(
                "q must be finite and >= 0, got {}",
                self.q
            )));
        }
        if !self.s.is_finite() || self.s <= 0.0 {
            return Err(Error::InvalidDistribution(format!(
                "s must be finite and > 0, got {}",
                self.s
            )));
        }
        Ok(())
    }
}

/// Computes the normalized Zipf-Mandelbrot probability mass for ranks `1..=n`.
///
/// The result has length `n`, sums to 1 (within floating point tolerance), and is
/// non-increasing in rank.
pub fn weights(n: usize, q: f64, s: f64) -> Result<Vec<f64>> {
    if n == 0 {
        return Err(Error::InvalidDistribution(
            "at least one rank is required".into(),
        ));
    }
    ZipfParams { q, s }.validate()?;

    let raw: Vec<f64> = (1..=n).map(|rank| (rank as f64 + q).powf(-s)).collect();
    let sum: f64 = raw.iter().sum();
    if !sum.is_normal() {
        return Err(Error::InvalidDistribution(format!(
            "weights for n={n}, q={q}, s={s} cannot be normalized"
        )));
    }

    Ok(raw.into_iter().map(|weight| weight / sum).collect())
}

/// Draws one target from `targets`, treating `mass` as a categorical distribution.
///
/// The mass does not need to sum to exactly 1. The draw is scaled by its actual sum, so
/// normalization error never leads to a miss.
pub fn sample<'a, T, R>(targets: &'a [T], mass: &[f64], rng: &mut R) -> Result<&'a T>
where
    R: Rng + ?Sized,
{
    if targets.is_empty() {
        return Err(Error::EmptyTargets);
    }
    if targets.len() != mass.len() {
        return Err(Error::InvalidDistribution(format!(
            "{} targets but {} weights",
            targets.len(),
            mass.len()
        )));
    }
    if mass.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(Error::InvalidDistribution(
            "weights must be finite and non-negative".into(),
        ));
    }

    let total: f64 = mass.iter().sum();
    if total <= 0.0 {
        return Err(Error::InvalidDistribution(
            "weights must not all be zero".into(),
        ));
    }

    let mut point = rng.random::<f64>() * total;
    let mut last = None;
    for (target, &p) in targets.iter().zip(mass) {
        if p == 0.0 {
            continue;
        }
        if point < p {
            return Ok(target);
        }
        point -= p;
        last = Some(target);
    }

    // Only reachable through rounding at the upper end.
    last.ok_or_else(|| Error::InvalidDistribution("weights must not all be zero".into()))
}

/// A builder for creating a [`TargetSampler`].
#[derive(Debug)]
pub struct TargetSamplerBuilder<T> {
    targets: Vec<T>,
    zipf: ZipfParams,
    seed: u64,
}

impl<T> TargetSamplerBuilder<T> {
    /// Shape parameters of the popularity distribution.
    pub fn zipf(mut self, q: f64, s: f64) -> Self {
        self.zipf = ZipfParams { q, s };
        self
    }

    /// Seeds the random source, making the sequence of draws reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the sampler, validating the target set and distribution parameters.
    pub fn build(self) -> Result<TargetSampler<T>> {
        if self.targets.is_empty() {
            return Err(Error::EmptyTargets);
        }

        let mass = weights(self.targets.len(), self.zipf.q, self.zipf.s)?;
        let index = WeightedIndex::new(&mass)
            .map_err(|err| Error::InvalidDistribution(err.to_string()))?;

        Ok(TargetSampler {
            targets: self.targets,
            mass,
            index,
            rng: SmallRng::seed_from_u64(self.seed),
        })
    }
}

/// Draws targets with replacement according to their Zipf-Mandelbrot rank weight.
#[derive(Debug)]
pub struct TargetSampler<T> {
    targets: Vec<T>,
    mass: Vec<f64>,
    index: WeightedIndex<f64>,
    rng: SmallRng,
}

impl<T> TargetSampler<T> {
    /// Constructs a new builder over the given ranked targets.
    pub fn builder(targets: Vec<T>) -> TargetSamplerBuilder<T> {
        TargetSamplerBuilder {
            targets,
            zipf: ZipfParams::default(),
            seed: rand::random(),
        }
    }

    /// Draws the next target.
    pub fn next_target(&mut self) -> &T {
        let idx = self.index.sample(&mut self.rng);
        &self.targets[idx]
    }

    /// The ranked targets this sampler draws from.
    pub fn targets(&self) -> &[T] {
        &self.targets
    }

    /// The normalized probability of each target, in rank order.
    pub fn mass(&self) -> &[f64] {
        &self.mass
    }
}
