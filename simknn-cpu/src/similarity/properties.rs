//! Similarity over node property values.
//!
//! Each property contributes a similarity in `[0, 1]` computed by a metric
//! suited to its value type. With several properties the similarity of a node
//! pair is the mean over all properties, where a property that is missing for
//! either node contributes `0`. With a single property a missing value yields
//! the `NaN` sentinel.

use super::SimilarityFunction;
use crate::knn::NodeId;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use simknn_common::ConfigError;

/// Per-node property values, indexed by internal node id.
///
/// Missing scalar values are represented by `NaN`, missing array values by an
/// empty array.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeProperties {
    Double(Vec<f64>),
    Long(Vec<i64>),
    FloatArray(Vec<Vec<f32>>),
    DoubleArray(Vec<Vec<f64>>),
    LongArray(Vec<Vec<i64>>),
}

impl NodeProperties {
    pub fn len(&self) -> usize {
        match self {
            NodeProperties::Double(values) => values.len(),
            NodeProperties::Long(values) => values.len(),
            NodeProperties::FloatArray(values) => values.len(),
            NodeProperties::DoubleArray(values) => values.len(),
            NodeProperties::LongArray(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn default_metric(&self) -> SimilarityMetric {
        match self {
            NodeProperties::Double(_) | NodeProperties::Long(_) => SimilarityMetric::Default,
            NodeProperties::FloatArray(_) | NodeProperties::DoubleArray(_) => {
                SimilarityMetric::Cosine
            }
            NodeProperties::LongArray(_) => SimilarityMetric::Jaccard,
        }
    }

    fn supports(&self, metric: SimilarityMetric) -> bool {
        use SimilarityMetric::*;
        match self {
            NodeProperties::Double(_) | NodeProperties::Long(_) => metric == Default,
            NodeProperties::FloatArray(_) | NodeProperties::DoubleArray(_) => {
                matches!(metric, Default | Cosine | Euclidean | Pearson)
            }
            NodeProperties::LongArray(_) => matches!(metric, Default | Jaccard | Overlap),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SimilarityMetric {
    /// `1 / (1 + |a - b|)` for scalars, cosine for float arrays, Jaccard for
    /// integer arrays
    Default,
    Cosine,
    Euclidean,
    Pearson,
    Jaccard,
    Overlap,
}

/// Similarity function combining one or more node properties.
#[derive(Clone, Debug, Default)]
pub struct PropertySimilarity {
    properties: Vec<(NodeProperties, SimilarityMetric)>,
}

impl PropertySimilarity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property compared with its default metric.
    pub fn with_property(self, properties: NodeProperties) -> Self {
        let metric = properties.default_metric();
        self.push(properties, metric)
    }

    /// Add a property compared with an explicit metric, rejecting metrics
    /// that do not apply to the value type.
    pub fn with_property_and_metric(
        self,
        properties: NodeProperties,
        metric: SimilarityMetric,
    ) -> Result<Self, ConfigError> {
        if !properties.supports(metric) {
            return Err(ConfigError::invalid(
                "metric",
                format!("{metric:?}"),
                "a metric supported by the property type",
            ));
        }
        let metric = match metric {
            SimilarityMetric::Default => properties.default_metric(),
            other => other,
        };
        Ok(self.push(properties, metric))
    }

    fn push(mut self, properties: NodeProperties, metric: SimilarityMetric) -> Self {
        // Set-based metrics work on sorted, duplicate-free arrays.
        let properties = match properties {
            NodeProperties::LongArray(mut values) => {
                for value in values.iter_mut() {
                    value.sort_unstable();
                    value.dedup();
                }
                NodeProperties::LongArray(values)
            }
            other => other,
        };
        self.properties.push((properties, metric));
        self
    }

    /// Number of nodes covered by every property.
    pub fn node_count(&self) -> usize {
        self.properties
            .iter()
            .map(|(properties, _)| properties.len())
            .min()
            .unwrap_or(0)
    }
}

impl SimilarityFunction for PropertySimilarity {
    fn similarity(&self, first: NodeId, second: NodeId) -> f64 {
        match self.properties.as_slice() {
            [] => f64::NAN,
            [(properties, metric)] => property_similarity(properties, *metric, first, second),
            all => {
                let total: f64 = all
                    .iter()
                    .map(|(properties, metric)| {
                        let similarity = property_similarity(properties, *metric, first, second);
                        if similarity.is_nan() {
                            0.0
                        } else {
                            similarity
                        }
                    })
                    .sum();
                total / all.len() as f64
            }
        }
    }
}

fn property_similarity(
    properties: &NodeProperties,
    metric: SimilarityMetric,
    first: NodeId,
    second: NodeId,
) -> f64 {
    let (first, second) = (first as usize, second as usize);
    match properties {
        NodeProperties::Double(values) => match (values.get(first), values.get(second)) {
            (Some(a), Some(b)) => scalar_similarity(*a, *b),
            _ => f64::NAN,
        },
        NodeProperties::Long(values) => match (values.get(first), values.get(second)) {
            (Some(a), Some(b)) => scalar_similarity(*a as f64, *b as f64),
            _ => f64::NAN,
        },
        NodeProperties::FloatArray(values) => match (values.get(first), values.get(second)) {
            (Some(a), Some(b)) => vector_similarity(metric, a, b),
            _ => f64::NAN,
        },
        NodeProperties::DoubleArray(values) => match (values.get(first), values.get(second)) {
            (Some(a), Some(b)) => vector_similarity(metric, a, b),
            _ => f64::NAN,
        },
        NodeProperties::LongArray(values) => match (values.get(first), values.get(second)) {
            (Some(a), Some(b)) => set_similarity(metric, a, b),
            _ => f64::NAN,
        },
    }
}

fn scalar_similarity(a: f64, b: f64) -> f64 {
    1.0 / (1.0 + (a - b).abs())
}

fn vector_similarity<T: Copy + Into<f64>>(metric: SimilarityMetric, a: &[T], b: &[T]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::NAN;
    }
    match metric {
        SimilarityMetric::Euclidean => {
            let squared: f64 = a
                .iter()
                .zip(b)
                .map(|(&x, &y)| {
                    let d = x.into() - y.into();
                    d * d
                })
                .sum();
            1.0 / (1.0 + squared.sqrt())
        }
        SimilarityMetric::Pearson => {
            let n = a.len() as f64;
            let mean_a = a.iter().map(|&x| x.into()).sum::<f64>() / n;
            let mean_b = b.iter().map(|&y| y.into()).sum::<f64>() / n;
            let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
            for (&x, &y) in a.iter().zip(b) {
                let (dx, dy) = (x.into() - mean_a, y.into() - mean_b);
                cov += dx * dy;
                var_a += dx * dx;
                var_b += dy * dy;
            }
            let r = cov / (var_a.sqrt() * var_b.sqrt());
            (1.0 + r) / 2.0
        }
        _ => {
            let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
            for (&x, &y) in a.iter().zip(b) {
                let (x, y): (f64, f64) = (x.into(), y.into());
                dot += x * y;
                norm_a += x * x;
                norm_b += y * y;
            }
            let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
            (1.0 + cosine) / 2.0
        }
    }
}

/// `a` and `b` are sorted and duplicate free.
fn set_similarity(metric: SimilarityMetric, a: &[i64], b: &[i64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::NAN;
    }
    let (mut i, mut j, mut intersection) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                intersection += 1;
                i += 1;
                j += 1;
            }
        }
    }
    match metric {
        SimilarityMetric::Overlap => intersection as f64 / a.len().min(b.len()) as f64,
        _ => {
            let union = a.len() + b.len() - intersection;
            intersection as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_scalar_similarity() {
        let similarity = PropertySimilarity::new().with_property(NodeProperties::Double(vec![
            1.2, 1.1, 42.0,
        ]));
        assert!((similarity.similarity(0, 1) - 1.0 / 1.1).abs() < EPS);
        assert!((similarity.similarity(1, 0) - 1.0 / 1.1).abs() < EPS);
        assert!((similarity.similarity(0, 2) - 1.0 / 41.8).abs() < EPS);
    }

    #[test]
    fn test_multiple_properties_average() {
        let similarity = PropertySimilarity::new()
            .with_property(NodeProperties::Double(vec![1.2, 1.1, 42.0]))
            .with_property(NodeProperties::Double(vec![1.0, 5.0, 10.0]));

        let expected_ab = 0.5 * (1.0 / 1.1) + 0.5 * (1.0 / 5.0);
        let expected_bc = 0.5 * (1.0 / 41.9) + 0.5 * (1.0 / 6.0);
        assert!((similarity.similarity(0, 1) - expected_ab).abs() < EPS);
        assert!((similarity.similarity(1, 2) - expected_bc).abs() < EPS);
    }

    #[test]
    fn test_missing_values() {
        let single = PropertySimilarity::new()
            .with_property(NodeProperties::Double(vec![f64::NAN, 42.0, 42.0]));
        assert!(single.similarity(0, 1).is_nan());
        assert_eq!(single.similarity(1, 2), 1.0);
        // out of range ids never panic
        assert!(single.similarity(1, 17).is_nan());

        let combined = PropertySimilarity::new()
            .with_property(NodeProperties::Double(vec![1.0, f64::NAN, f64::NAN]))
            .with_property(NodeProperties::Double(vec![5.0, 5.0, f64::NAN]));
        assert!((combined.similarity(0, 1) - 0.5).abs() < EPS);
        assert_eq!(combined.similarity(0, 2), 0.0);

        let arrays = PropertySimilarity::new()
            .with_property(NodeProperties::FloatArray(vec![vec![], vec![1.0, 0.0]]));
        assert!(arrays.similarity(0, 1).is_nan());
    }

    #[test]
    fn test_vector_metrics() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 0.0], vec![-1.0, 0.0]];
        let cosine = PropertySimilarity::new().with_property(NodeProperties::DoubleArray(vectors.clone()));
        assert!((cosine.similarity(0, 2) - 1.0).abs() < EPS);
        assert!((cosine.similarity(0, 1) - 0.5).abs() < EPS);
        assert!(cosine.similarity(0, 3).abs() < EPS);

        let euclidean = PropertySimilarity::new()
            .with_property_and_metric(NodeProperties::DoubleArray(vectors), SimilarityMetric::Euclidean)
            .unwrap();
        assert!((euclidean.similarity(0, 2) - 0.5).abs() < EPS);

        let pearson = PropertySimilarity::new()
            .with_property_and_metric(
                NodeProperties::FloatArray(vec![vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0], vec![3.0, 2.0, 1.0]]),
                SimilarityMetric::Pearson,
            )
            .unwrap();
        assert!((pearson.similarity(0, 1) - 1.0).abs() < 1e-6);
        assert!(pearson.similarity(0, 2).abs() < 1e-6);
    }

    #[test]
    fn test_set_metrics() {
        let sets = vec![vec![3, 1, 2, 2], vec![2, 3, 4], vec![]];
        let jaccard = PropertySimilarity::new().with_property(NodeProperties::LongArray(sets.clone()));
        assert!((jaccard.similarity(0, 1) - 0.5).abs() < EPS);
        assert!(jaccard.similarity(0, 2).is_nan());

        let overlap = PropertySimilarity::new()
            .with_property_and_metric(NodeProperties::LongArray(sets), SimilarityMetric::Overlap)
            .unwrap();
        assert!((overlap.similarity(0, 1) - 2.0 / 3.0).abs() < EPS);
    }

    #[rstest]
    #[case(SimilarityMetric::Cosine)]
    #[case(SimilarityMetric::Euclidean)]
    #[case(SimilarityMetric::Pearson)]
    fn test_identical_vectors_score_one(#[case] metric: SimilarityMetric) {
        let vectors = vec![vec![0.3, -2.0, 7.5], vec![0.3, -2.0, 7.5], vec![-9.0, 4.0, 0.1]];
        let similarity = PropertySimilarity::new()
            .with_property_and_metric(NodeProperties::DoubleArray(vectors), metric)
            .unwrap();
        assert!((similarity.similarity(0, 1) - 1.0).abs() < 1e-9);
        let other = similarity.similarity(0, 2);
        assert!((0.0..=1.0).contains(&other), "{metric:?} gave {other}");
    }

    #[test]
    fn test_rejects_unsupported_metric() {
        let result = PropertySimilarity::new()
            .with_property_and_metric(NodeProperties::Double(vec![1.0]), SimilarityMetric::Jaccard);
        assert!(result.is_err());
        let result = PropertySimilarity::new()
            .with_property_and_metric(NodeProperties::LongArray(vec![vec![1]]), SimilarityMetric::Cosine);
        assert!(result.is_err());
    }
}
