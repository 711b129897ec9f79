use crate::descriptors::Descriptor;
use crate::KeyPoint;
use float_ord::FloatOrd;
use log::*;

/// A candidate match is kept only when its nearest distance is strictly
/// below this fraction of the second-nearest: near-ties are ambiguous.
pub const DISTINCTIVENESS_RATIO: f64 = 0.8;

/// Descriptor distance functions selectable at match time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    SumOfSquares,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Euclidean => DistanceMetric::SumOfSquares.distance(a, b).sqrt(),
            DistanceMetric::Manhattan => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .sum(),
            DistanceMetric::SumOfSquares => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum(),
        }
    }
}

/// A pair of corresponding keypoints from two images.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Match {
    pub first: KeyPoint,
    pub second: KeyPoint,
    pub distance: f64,
}

/// The `count` candidates nearest to `query`, ascending by distance.
/// Returns `(candidate index, distance)` pairs.
pub fn find_closest(
    query: &Descriptor,
    candidates: &[Descriptor],
    metric: DistanceMetric,
    count: usize,
) -> Vec<(usize, f64)> {
    let mut distances: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| (index, metric.distance(&query.values, &candidate.values)))
        .collect();
    distances.sort_by_key(|&(_, distance)| FloatOrd(distance));
    distances.truncate(count);
    distances
}

/// Match descriptors of `first` against `second` with the
/// nearest/second-nearest distinctiveness test.
///
/// With fewer than two candidates the ratio is undefined and no match is
/// produced.
pub fn matches(first: &[Descriptor], second: &[Descriptor], metric: DistanceMetric) -> Vec<Match> {
    if second.len() < 2 {
        return Vec::new();
    }
    let result: Vec<Match> = first
        .iter()
        .filter_map(|descriptor| {
            let nearest = find_closest(descriptor, second, metric, 2);
            let (best_index, best) = nearest[0];
            let (_, next_best) = nearest[1];
            (best / next_best < DISTINCTIVENESS_RATIO).then(|| Match {
                first: descriptor.keypoint,
                second: second[best_index].keypoint,
                distance: best,
            })
        })
        .collect();
    debug!(
        "matched {} of {} descriptors against {} candidates",
        result.len(),
        first.len(),
        second.len()
    );
    result
}
