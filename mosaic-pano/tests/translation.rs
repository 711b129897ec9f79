//! End-to-end check over the corner pipeline: two renderings of the same
//! scene related by a pure translation, matched and fed to the consensus
//! estimator, must yield a homography whose translation component is
//! within a pixel of the truth.

use four_point::to_normalized;
use log::*;
use mosaic_features::{
    describe, matches, BorderPolicy, BorderedImage, CellAssignment, DistanceMetric,
    FeaturePoints, HarrisDetector, HarrisMethod,
};
use nalgebra::Point2;
use rand::SeedableRng;
use rand_pcg::Pcg64;

const SIZE: usize = 96;
const SHIFT: (f64, f64) = (7.0, 5.0);

/// Scene intensity at a point: a few rectangles of distinct brightness on
/// a dark background.
fn scene(x: f64, y: f64) -> f64 {
    const RECTS: [(f64, f64, f64, f64, f64); 4] = [
        (20.0, 18.0, 18.0, 14.0, 0.9),
        (52.0, 22.0, 20.0, 14.0, 0.55),
        (24.0, 54.0, 16.0, 20.0, 0.75),
        (56.0, 58.0, 22.0, 18.0, 0.35),
    ];
    let mut value = 0.1;
    for &(rx, ry, rw, rh, rv) in &RECTS {
        if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
            value = rv;
        }
    }
    value
}

fn render(offset_x: f64, offset_y: f64) -> BorderedImage {
    let data = (0..SIZE * SIZE)
        .map(|i| {
            let x = (i % SIZE) as f64;
            let y = (i / SIZE) as f64;
            scene(x + offset_x, y + offset_y)
        })
        .collect();
    BorderedImage::from_raw(SIZE, SIZE, data, BorderPolicy::Mirror).unwrap()
}

fn corner_descriptors(image: &BorderedImage) -> Vec<mosaic_features::Descriptor> {
    let detector = HarrisDetector::new(image, 5, 0.1, HarrisMethod::EigenValues).unwrap();
    let points: FeaturePoints = detector
        .calculate_local_maxima()
        .filter_by_adaptive_non_maximum_suppression(40);
    describe(image, &points, 16, 4, 10, CellAssignment::Bilinear, 36).unwrap()
}

#[test]
fn translated_pair_recovers_its_shift() {
    let _ = pretty_env_logger::try_init_timed();
    let image1 = render(0.0, 0.0);
    // a scene point (x, y) appears at (x - dx, y - dy) in image 2
    let image2 = render(SHIFT.0, SHIFT.1);

    let descriptors1 = corner_descriptors(&image1);
    let descriptors2 = corner_descriptors(&image2);
    info!(
        "described {} and {} corners",
        descriptors1.len(),
        descriptors2.len()
    );
    assert!(descriptors1.len() >= 4);

    let matched = matches(&descriptors1, &descriptors2, DistanceMetric::Euclidean);
    info!("{} matches", matched.len());
    assert!(matched.len() >= 4);

    let fit = mosaic_pano::estimate(&image1, &image2, &matched, Pcg64::from_seed([9; 32])).unwrap();
    assert!(fit.inliers.len() >= 4);

    // probe the recovered transform at the rectangle corners
    for &(x, y) in &[(20.0, 18.0), (72.0, 36.0), (40.0, 74.0), (78.0, 76.0)] {
        let source = Point2::new(to_normalized(x, SIZE), to_normalized(y, SIZE));
        let projected = fit.homography.transform(source);
        let px = (projected.x + 1.0) * SIZE as f64 / 2.0;
        let py = (projected.y + 1.0) * SIZE as f64 / 2.0;
        assert!(
            (px - (x - SHIFT.0)).abs() <= 1.0,
            "x translation off: {px} vs {}",
            x - SHIFT.0
        );
        assert!(
            (py - (y - SHIFT.1)).abs() <= 1.0,
            "y translation off: {py} vs {}",
            y - SHIFT.1
        );
    }
}

#[test]
fn stitching_produces_a_covering_canvas() {
    let _ = pretty_env_logger::try_init_timed();
    let image1 = render(0.0, 0.0);
    let image2 = render(SHIFT.0, SHIFT.1);
    let matched = matches(
        &corner_descriptors(&image1),
        &corner_descriptors(&image2),
        DistanceMetric::Euclidean,
    );
    let panorama =
        mosaic_pano::stitch(&image1, &image2, &matched, Pcg64::from_seed([3; 32])).unwrap();
    // the canvas must cover image 1 plus the shifted extent of image 2
    assert!(panorama.image.width() >= SIZE);
    assert!(panorama.image.height() >= SIZE);
    assert!(panorama.image.width() <= SIZE + SHIFT.0 as usize + 2);
    assert!(panorama.image.height() <= SIZE + SHIFT.1 as usize + 2);
    for y in 0..panorama.image.height() {
        for x in 0..panorama.image.width() {
            assert!(panorama.image.at(x, y).is_finite());
        }
    }
}
