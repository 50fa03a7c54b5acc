//! Distance functions used to match points to centroids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KMeansError, Result};

/// Distance used to match points to centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    #[default]
    #[serde(alias = "l2")]
    Euclidean,
    /// Euclidean without the square root; same ordering, cheaper.
    SquaredEuclidean,
    /// Sum of absolute differences.
    #[serde(alias = "l1", alias = "cityblock")]
    Manhattan,
    /// Largest absolute difference along any dimension.
    Chebyshev,
    /// Sum of `|a - b| / (|a| + |b|)`, with `0 / 0` terms counted as zero.
    Canberra,
}

impl DistanceMetric {
    /// Distance between two equally long coordinate sequences.
    pub fn distance<A, B>(self, a: A, b: B) -> f64
    where
        A: IntoIterator<Item = f64>,
        B: IntoIterator<Item = f64>,
    {
        let pairs = a.into_iter().zip(b);
        match self {
            DistanceMetric::Euclidean => squared(pairs).sqrt(),
            DistanceMetric::SquaredEuclidean => squared(pairs),
            DistanceMetric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f64::max),
            DistanceMetric::Canberra => pairs
                .map(|(x, y)| {
                    let denom = x.abs() + y.abs();
                    if denom == 0.0 {
                        0.0
                    } else {
                        (x - y).abs() / denom
                    }
                })
                .sum(),
        }
    }
}

fn squared(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    pairs
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Plain squared Euclidean distance, used for inertia and seeding weights.
pub(crate) fn squared_distance<A, B>(a: A, b: B) -> f64
where
    A: IntoIterator<Item = f64>,
    B: IntoIterator<Item = f64>,
{
    squared(a.into_iter().zip(b))
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::SquaredEuclidean => "squared-euclidean",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Chebyshev => "chebyshev",
            DistanceMetric::Canberra => "canberra",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceMetric {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "squared-euclidean" | "sqeuclidean" | "ssd" => Ok(Self::SquaredEuclidean),
            "manhattan" | "l1" | "cityblock" | "sad" => Ok(Self::Manhattan),
            "chebyshev" | "linf" => Ok(Self::Chebyshev),
            "canberra" => Ok(Self::Canberra),
            other => Err(KMeansError::InvalidConfig(format!(
                "'{other}' is not a valid distance metric"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(metric: DistanceMetric, a: &[f64], b: &[f64]) -> f64 {
        metric.distance(a.iter().copied(), b.iter().copied())
    }

    #[test]
    fn metrics_match_hand_computed_values() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 3.0, 4.0];
        assert!((dist(DistanceMetric::Euclidean, &a, &b) - 3f64.sqrt()).abs() < 1e-12);
        assert_eq!(dist(DistanceMetric::SquaredEuclidean, &a, &b), 3.0);
        assert_eq!(dist(DistanceMetric::Manhattan, &a, &b), 3.0);
        assert_eq!(dist(DistanceMetric::Chebyshev, &[0.0, 0.0], &[3.0, -4.0]), 4.0);
        let canberra = dist(DistanceMetric::Canberra, &[0.0, 1.0], &[0.0, 3.0]);
        assert!((canberra - 0.5).abs() < 1e-12);
    }

    #[test]
    fn metric_names_round_trip() {
        for metric in [
            DistanceMetric::Euclidean,
            DistanceMetric::SquaredEuclidean,
            DistanceMetric::Manhattan,
            DistanceMetric::Chebyshev,
            DistanceMetric::Canberra,
        ] {
            assert_eq!(metric.to_string().parse::<DistanceMetric>().unwrap(), metric);
        }
        assert!("cosine".parse::<DistanceMetric>().is_err());
    }
}
