use float_ord::FloatOrd;
use log::*;
use nalgebra::{Dynamic, Matrix3, OMatrix, Point2, Vector3, U9};
use rand::seq::SliceRandom;
use rand::Rng;

/// A correspondence between a source point and a target point. Whether
/// the coordinates are pixels or conditioned values depends on the
/// call site; [`HomographyConsensus`] accepts pixels and conditions them
/// itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch(pub Point2<f64>, pub Point2<f64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FourPointError {
    #[error("homography estimation needs at least 4 correspondences, got {found}")]
    InsufficientMatches { found: usize },
    #[error("the correspondence system is singular")]
    SingularSystem,
    #[error("no round produced a usable consensus")]
    NoConsensus,
}

/// Condition a pixel coordinate into `[-1, 1]` against its image extent.
pub fn to_normalized(coord: f64, extent: usize) -> f64 {
    2.0 * coord / extent as f64 - 1.0
}

/// Map a conditioned coordinate back to a pixel index (truncating, the
/// inverse of [`to_normalized`] up to integer quantization).
pub fn to_pixel(coord: f64, extent: usize) -> i64 {
    ((coord * extent as f64 + extent as f64) / 2.0) as i64
}

/// A 3x3 projective transform over homogeneous plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// Apply the transform with perspective division.
    pub fn transform(&self, point: Point2<f64>) -> Point2<f64> {
        let v = self.0 * Vector3::new(point.x, point.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }
}

fn encode_projection_equation(matches: &[FeatureMatch]) -> OMatrix<f64, Dynamic, U9> {
    let mut out = OMatrix::<f64, Dynamic, U9>::zeros(2 * matches.len());
    for (i, FeatureMatch(a, b)) in matches.iter().enumerate() {
        let r = 2 * i;
        out[(r, 0)] = a.x;
        out[(r, 1)] = a.y;
        out[(r, 2)] = 1.0;
        out[(r, 6)] = -a.x * b.x;
        out[(r, 7)] = -a.y * b.x;
        out[(r, 8)] = -b.x;
        out[(r + 1, 3)] = a.x;
        out[(r + 1, 4)] = a.y;
        out[(r + 1, 5)] = 1.0;
        out[(r + 1, 6)] = -a.x * b.y;
        out[(r + 1, 7)] = -a.y * b.y;
        out[(r + 1, 8)] = -b.y;
    }
    out
}

/// Solves the direct linear transform for a homography from four or more
/// correspondences, in the manner of Hartley and Zisserman.
///
/// The `2n x 9` coefficient matrix is folded into the symmetric `MᵗM`,
/// whose eigenvector of smallest eigenvalue is the flattened homography;
/// it is normalized so the bottom-right entry is one. Inputs should be
/// conditioned into `[-1, 1]` first.
#[derive(Copy, Clone, Debug)]
pub struct FourPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl FourPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<Homography>
    where
        I: IntoIterator<Item = FeatureMatch>,
    {
        let matches: Vec<FeatureMatch> = data.into_iter().collect();
        if matches.len() < 4 {
            return None;
        }
        let projection_constraint = encode_projection_equation(&matches);
        let mtm = projection_constraint.transpose() * &projection_constraint;
        let eigens = mtm.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let h = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &value)| FloatOrd(value))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        if h[8] == 0.0 {
            return None;
        }
        let h = h / h[8];
        Some(Homography(Matrix3::new(
            h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8],
        )))
    }
}

impl Default for FourPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

/// The accepted model: the forward homography (source to target in
/// conditioned coordinates), the reverse fit, and the indices of the
/// matches that voted for it.
#[derive(Debug, Clone)]
pub struct ConsensusFit {
    pub homography: Homography,
    pub inverse: Homography,
    pub inliers: Vec<usize>,
}

/// Fixed-budget random sample consensus over pixel-space correspondences.
///
/// Each round shuffles the correspondence indices, fits a homography to
/// the first four, and counts the matches whose reprojection lands within
/// `inlier_epsilon` pixels (per-axis max, measured after denormalizing
/// both points). The largest set seen wins, and the final model - plus
/// its inverse, refit with the point roles swapped - is solved over that
/// whole set.
pub struct HomographyConsensus<R> {
    pub rounds: usize,
    pub inlier_epsilon: f64,
    source_extent: (usize, usize),
    target_extent: (usize, usize),
    solver: FourPoint,
    rng: R,
}

impl<R: Rng> HomographyConsensus<R> {
    pub fn new(source_extent: (usize, usize), target_extent: (usize, usize), rng: R) -> Self {
        Self {
            rounds: 1000,
            inlier_epsilon: 10.0,
            source_extent,
            target_extent,
            solver: FourPoint::new(),
            rng,
        }
    }

    fn conditioned(&self, m: &FeatureMatch) -> FeatureMatch {
        let (sw, sh) = self.source_extent;
        let (tw, th) = self.target_extent;
        FeatureMatch(
            Point2::new(to_normalized(m.0.x, sw), to_normalized(m.0.y, sh)),
            Point2::new(to_normalized(m.1.x, tw), to_normalized(m.1.y, th)),
        )
    }

    fn is_inlier(&self, homography: &Homography, m: &FeatureMatch) -> bool {
        let (tw, th) = self.target_extent;
        let projected = homography.transform(m.0);
        let dx = (to_pixel(m.1.x, tw) - to_pixel(projected.x, tw)).abs();
        let dy = (to_pixel(m.1.y, th) - to_pixel(projected.y, th)).abs();
        (dx.max(dy) as f64) < self.inlier_epsilon
    }

    pub fn model_inliers(
        &mut self,
        matches: &[FeatureMatch],
    ) -> Result<ConsensusFit, FourPointError> {
        if matches.len() < 4 {
            return Err(FourPointError::InsufficientMatches {
                found: matches.len(),
            });
        }
        let normalized: Vec<FeatureMatch> = matches.iter().map(|m| self.conditioned(m)).collect();
        let mut indices: Vec<usize> = (0..normalized.len()).collect();
        let mut best: Vec<usize> = Vec::new();
        for round in 0..self.rounds {
            indices.shuffle(&mut self.rng);
            let sample = indices[..4].iter().map(|&i| normalized[i]);
            let Some(homography) = self.solver.from_matches(sample) else {
                continue;
            };
            let inliers: Vec<usize> = (0..normalized.len())
                .filter(|&i| self.is_inlier(&homography, &normalized[i]))
                .collect();
            if inliers.len() > best.len() {
                trace!("round {round}: {} inliers", inliers.len());
                best = inliers;
            }
        }
        if best.len() < 4 {
            return Err(FourPointError::NoConsensus);
        }
        let homography = self
            .solver
            .from_matches(best.iter().map(|&i| normalized[i]))
            .ok_or(FourPointError::SingularSystem)?;
        let inverse = self
            .solver
            .from_matches(
                best.iter()
                    .map(|&i| FeatureMatch(normalized[i].1, normalized[i].0)),
            )
            .ok_or(FourPointError::SingularSystem)?;
        debug!(
            "consensus of {} inliers over {} matches",
            best.len(),
            matches.len()
        );
        Ok(ConsensusFit {
            homography,
            inverse,
            inliers: best,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_a_pure_translation() {
        let shift = Point2::new(0.25, -0.125);
        let points = [
            Point2::new(-0.5, -0.5),
            Point2::new(0.5, -0.25),
            Point2::new(0.375, 0.5),
            Point2::new(-0.25, 0.375),
            Point2::new(0.0, 0.125),
        ];
        let matches = points
            .iter()
            .map(|&a| FeatureMatch(a, Point2::new(a.x + shift.x, a.y + shift.y)));
        let homography = FourPoint::new().from_matches(matches).unwrap();
        for &a in &points {
            let b = homography.transform(a);
            assert!((b.x - (a.x + shift.x)).abs() < 1e-9);
            assert!((b.y - (a.y + shift.y)).abs() < 1e-9);
        }
    }

    #[test]
    fn recovers_a_known_projective_warp() {
        let truth = Homography(Matrix3::new(
            1.02, 0.03, 0.1, -0.02, 0.98, -0.05, 0.01, -0.015, 1.0,
        ));
        let points: Vec<Point2<f64>> = (0..8)
            .map(|i| {
                let t = i as f64 / 8.0 * std::f64::consts::TAU;
                Point2::new(0.7 * t.cos(), 0.7 * t.sin())
            })
            .collect();
        let matches = points.iter().map(|&a| FeatureMatch(a, truth.transform(a)));
        let homography = FourPoint::new().from_matches(matches).unwrap();
        for &a in &points {
            let expected = truth.transform(a);
            let actual = homography.transform(a);
            assert!((expected.x - actual.x).abs() < 1e-9);
            assert!((expected.y - actual.y).abs() < 1e-9);
        }
    }

    #[test]
    fn too_few_matches_is_not_estimable() {
        let matches = vec![
            FeatureMatch(Point2::new(0.0, 0.0), Point2::new(0.1, 0.0)),
            FeatureMatch(Point2::new(0.5, 0.0), Point2::new(0.6, 0.0)),
            FeatureMatch(Point2::new(0.0, 0.5), Point2::new(0.1, 0.5)),
        ];
        assert!(FourPoint::new().from_matches(matches.clone()).is_none());
        let mut consensus =
            HomographyConsensus::new((100, 100), (100, 100), rand::thread_rng());
        assert_eq!(
            consensus.model_inliers(&matches).unwrap_err(),
            FourPointError::InsufficientMatches { found: 3 }
        );
    }

    #[test]
    fn normalization_roundtrip() {
        for &(coord, extent) in &[(0.0, 640usize), (320.0, 640), (639.0, 640), (13.0, 512)] {
            let normalized = to_normalized(coord, extent);
            assert!((-1.0..=1.0).contains(&normalized));
            assert_eq!(to_pixel(normalized, extent), coord as i64);
        }
    }
}
