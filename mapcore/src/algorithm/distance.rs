use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use crate::error::MapError;

/// Dissimilarity used to build the neighbor graph of an embedding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
    Correlation,
}

impl Metric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            Metric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Correlation => correlation_distance(a, b),
        }
    }
}

/// `1 - pearson(a, b)`; two flat vectors are identical, one flat vector is unrelated.
fn correlation_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let mean_a = a.iter().mean();
    let mean_b = b.iter().mean();

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        dot += dx * dy;
        norm_a += dx * dx;
        norm_b += dy * dy;
    }

    if norm_a == 0.0 && norm_b == 0.0 {
        0.0
    } else if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b).sqrt()
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Manhattan => write!(f, "manhattan"),
            Metric::Correlation => write!(f, "correlation"),
        }
    }
}

impl FromStr for Metric {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" => Ok(Metric::Euclidean),
            "manhattan" => Ok(Metric::Manhattan),
            "correlation" => Ok(Metric::Correlation),
            other => Err(MapError::InvalidParameter {
                name: "metric",
                reason: format!("unknown metric '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((Metric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-12);
        assert!((Metric::Manhattan.distance(&a, &b) - 7.0).abs() < 1e-12);

        let up = [1.0, 2.0, 3.0];
        let scaled = [2.0, 4.0, 6.0];
        let down = [3.0, 2.0, 1.0];
        assert!(Metric::Correlation.distance(&up, &scaled).abs() < 1e-12);
        assert!((Metric::Correlation.distance(&up, &down) - 2.0).abs() < 1e-12);
        assert_eq!(Metric::Correlation.distance(&[1.0, 1.0], &up[..2]), 1.0);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("Manhattan".parse::<Metric>().unwrap(), Metric::Manhattan);
        assert!("cosine".parse::<Metric>().is_err());
        assert_eq!(Metric::Correlation.to_string(), "correlation");
    }
}
