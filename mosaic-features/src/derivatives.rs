use crate::image::{separable_filter, BorderedImage, Kernel};

const DERIVATIVE: [f64; 3] = [-1., 0., 1.];
const SMOOTHING: [f64; 3] = [1., 2., 1.];

/// Compute the Sobel derivative along x.
///
/// The implementation of this function is using a separable kernel, for
/// speed; the result is identical to convolving with the full 3x3 stencil.
pub fn sobel_horizontal(image: &BorderedImage) -> BorderedImage {
    separable_filter(image, &DERIVATIVE, &SMOOTHING)
}

/// Compute the Sobel derivative along y.
pub fn sobel_vertical(image: &BorderedImage) -> BorderedImage {
    separable_filter(image, &SMOOTHING, &DERIVATIVE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SobelAxis {
    X,
    Y,
}

/// The full 3x3 Sobel stencil, for callers that go through the generic 2D
/// convolution path.
#[derive(Debug, Clone, Copy)]
pub struct SobelKernel(pub SobelAxis);

impl Kernel for SobelKernel {
    fn size(&self) -> usize {
        3
    }

    fn value(&self, x: i64, y: i64) -> f64 {
        let (along, across) = match self.0 {
            SobelAxis::X => (x, y),
            SobelAxis::Y => (y, x),
        };
        DERIVATIVE[(along + 1) as usize] * SMOOTHING[(across + 1) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BorderPolicy;

    fn ramp_image() -> BorderedImage {
        let data = (0..35)
            .map(|i| {
                let x = (i % 7) as f64;
                let y = (i / 7) as f64;
                2.0 * x + 0.5 * y * y
            })
            .collect();
        BorderedImage::from_raw(7, 5, data, BorderPolicy::Clamp).unwrap()
    }

    #[test]
    fn separable_sobel_matches_full_stencil() {
        let image = ramp_image();
        for axis in [SobelAxis::X, SobelAxis::Y] {
            let full = image.apply_filter(&SobelKernel(axis));
            let separable = match axis {
                SobelAxis::X => sobel_horizontal(&image),
                SobelAxis::Y => sobel_vertical(&image),
            };
            for y in 0..image.height() {
                for x in 0..image.width() {
                    assert!((full.at(x, y) - separable.at(x, y)).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn sobel_responds_to_its_own_axis() {
        // a pure horizontal ramp has a flat y derivative in the interior
        let data: Vec<f64> = (0..25).map(|i| (i % 5) as f64).collect();
        let image = BorderedImage::from_raw(5, 5, data, BorderPolicy::Clamp).unwrap();
        let gx = sobel_horizontal(&image);
        let gy = sobel_vertical(&image);
        assert!(gx.at(2, 2).abs() > 1e-9);
        assert!(gy.at(2, 2).abs() < 1e-9);
    }
}
