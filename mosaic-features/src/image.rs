use crate::Error;
use derive_more::{Deref, DerefMut};
use image::{DynamicImage, ImageBuffer, Luma};
use log::*;
use ndarray::{azip, s, Array2, ArrayView2, ArrayViewMut2};
use nshare::{MutNdarray2, RefNdarray2};
use std::f64::consts::PI;
use wide::f64x4;

pub type GrayImageBuffer = ImageBuffer<Luma<f64>, Vec<f64>>;

/// How pixel reads outside `[0, width) x [0, height)` are resolved.
///
/// Every policy makes `BorderedImage::get` total over all integer
/// coordinates; none of them can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BorderPolicy {
    /// Reflect the coordinate back into range modulo the image extent.
    Mirror,
    /// Saturate the coordinate to the nearest edge.
    Clamp,
    /// Out-of-range reads produce `0.0`.
    Zero,
}

impl BorderPolicy {
    /// Map a possibly out-of-range coordinate onto a buffer index.
    /// `None` means the read resolves to zero.
    fn resolve(self, i: i64, extent: usize) -> Option<usize> {
        if extent == 0 {
            return None;
        }
        if (0..extent as i64).contains(&i) {
            return Some(i as usize);
        }
        match self {
            BorderPolicy::Mirror => Some(if i < 0 {
                (extent - 1) - (i.unsigned_abs() % extent as u64) as usize
            } else {
                (i as u64 % extent as u64) as usize
            }),
            BorderPolicy::Clamp => Some(if i < 0 { 0 } else { extent - 1 }),
            BorderPolicy::Zero => None,
        }
    }
}

/// Luma weights used when collapsing an RGB input to intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GrayscaleMethod {
    /// ITU-R BT.709 weights.
    Hdtv,
    /// ITU-R BT.601 weights.
    Pal,
}

impl GrayscaleMethod {
    fn weights(self) -> [f64; 3] {
        match self {
            GrayscaleMethod::Hdtv => [0.2126, 0.7152, 0.0722],
            GrayscaleMethod::Pal => [0.299, 0.587, 0.114],
        }
    }
}

/// An odd-sized 2D filter kernel centered at (0, 0).
pub trait Kernel {
    fn size(&self) -> usize;
    fn value(&self, x: i64, y: i64) -> f64;

    fn radius(&self) -> i64 {
        (self.size() as i64 - 1) / 2
    }
}

/// The image type used throughout this library: a contiguous f64 intensity
/// buffer paired with the border policy that resolves out-of-range reads.
///
/// Images are never mutated by the pipeline; every filter and resize
/// produces a new image carrying the same policy. We wrap the image crate's
/// buffer rather than use it directly so that every access site shares one
/// border-handling implementation, and so the separable filters can run
/// over the raw slice instead of going through per-pixel calls.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct BorderedImage {
    #[deref]
    #[deref_mut]
    buffer: GrayImageBuffer,
    border: BorderPolicy,
}

impl BorderedImage {
    pub fn new(width: usize, height: usize, border: BorderPolicy) -> Self {
        Self {
            buffer: ImageBuffer::from_pixel(width as u32, height as u32, Luma([0.0])),
            border,
        }
    }

    /// Wrap a row-major intensity buffer.
    pub fn from_raw(
        width: usize,
        height: usize,
        data: Vec<f64>,
        border: BorderPolicy,
    ) -> Result<Self, Error> {
        if data.len() != width * height {
            return Err(Error::BufferSize {
                width,
                height,
                actual: data.len(),
            });
        }
        Ok(Self {
            buffer: ImageBuffer::from_raw(width as u32, height as u32, data)
                .expect("buffer length was checked against the dimensions"),
            border,
        })
    }

    /// Convert a decoded image to unit-range intensities.
    pub fn from_dynamic(
        input: &DynamicImage,
        method: GrayscaleMethod,
        border: BorderPolicy,
    ) -> Self {
        let rgb = input.to_rgb8();
        info!("loaded a {} x {} image", rgb.width(), rgb.height());
        let [wr, wg, wb] = method.weights();
        Self {
            buffer: ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
                let p = rgb[(x, y)];
                Luma([(wr * f64::from(p[0]) + wg * f64::from(p[1]) + wb * f64::from(p[2])) / 255.0])
            }),
            border,
        }
    }

    pub fn from_array2(arr: Array2<f64>, border: BorderPolicy) -> Self {
        Self {
            buffer: ImageBuffer::from_raw(
                arr.dim().1 as u32,
                arr.dim().0 as u32,
                arr.into_raw_vec(),
            )
            .expect("raw vector didn't have enough pixels for the image"),
            border,
        }
    }

    pub fn ref_array2(&self) -> ArrayView2<f64> {
        self.buffer.ref_ndarray2()
    }

    pub fn mut_array2(&mut self) -> ArrayViewMut2<f64> {
        self.buffer.mut_ndarray2()
    }

    pub fn width(&self) -> usize {
        self.buffer.width() as usize
    }

    pub fn height(&self) -> usize {
        self.buffer.height() as usize
    }

    pub fn border(&self) -> BorderPolicy {
        self.border
    }

    /// In-range accessor.
    pub fn at(&self, x: usize, y: usize) -> f64 {
        self.buffer.get_pixel(x as u32, y as u32)[0]
    }

    pub fn put(&mut self, x: usize, y: usize, value: f64) {
        self.buffer.put_pixel(x as u32, y as u32, Luma([value]));
    }

    /// Total pixel accessor: any integer pair resolves through the border
    /// policy.
    pub fn get(&self, x: i64, y: i64) -> f64 {
        match (
            self.border.resolve(x, self.width()),
            self.border.resolve(y, self.height()),
        ) {
            (Some(x), Some(y)) => self.at(x, y),
            _ => 0.0,
        }
    }

    /// Halve the resolution by keeping only odd-indexed rows and columns.
    ///
    /// Samples are discarded, not averaged; downstream sigma bookkeeping
    /// assumes this exact decimation.
    pub fn half_size(&self) -> Self {
        let half = self.ref_array2().slice(s![1..;2, 1..;2]).to_owned();
        Self::from_array2(half, self.border)
    }

    /// Pixelwise `self - other`.
    pub fn subtract(&self, other: &Self) -> Result<Self, Error> {
        let mut out = self.zeros_matching(other)?;
        azip!((o in out.mut_array2(), &a in self.ref_array2(), &b in other.ref_array2()) {
            *o = a - b;
        });
        Ok(out)
    }

    /// Combine two same-size images pointwise.
    pub fn zip_map(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, Error> {
        let mut out = self.zeros_matching(other)?;
        azip!((o in out.mut_array2(), &a in self.ref_array2(), &b in other.ref_array2()) {
            *o = f(a, b);
        });
        Ok(out)
    }

    /// Pointwise `sqrt(a^2 + b^2)`, the gradient-magnitude combiner.
    pub fn hypot_with(&self, other: &Self) -> Result<Self, Error> {
        self.zip_map(other, |a, b| (a * a + b * b).sqrt())
    }

    /// Linearly rescale the value range to `[new_min, new_max]`.
    ///
    /// Display consumers use this before quantizing; the pipeline itself
    /// never depends on a particular intensity range. A constant image is
    /// returned unchanged.
    pub fn normalized(&self, new_min: f64, new_max: f64) -> Self {
        let mut old_min = f64::INFINITY;
        let mut old_max = f64::NEG_INFINITY;
        for &v in self.buffer.as_raw() {
            old_min = old_min.min(v);
            old_max = old_max.max(v);
        }
        if old_max <= old_min {
            return self.clone();
        }
        let scale = (new_max - new_min) / (old_max - old_min);
        let data = self
            .buffer
            .as_raw()
            .iter()
            .map(|&v| (v - old_min) * scale + new_min)
            .collect();
        Self::from_raw(self.width(), self.height(), data, self.border)
            .expect("rescaling preserves the pixel count")
    }

    /// Full 2D convolution: `out(i,j) = sum pixel(i-x, j-y) * kernel(x,y)`
    /// over the odd kernel support, reads resolved by the border policy.
    pub fn apply_filter(&self, kernel: &impl Kernel) -> Self {
        let r = kernel.radius();
        let mut out = Self::new(self.width(), self.height(), self.border);
        for j in 0..self.height() {
            for i in 0..self.width() {
                let mut sum = 0.0;
                for x in -r..=r {
                    for y in -r..=r {
                        sum += self.get(i as i64 - x, j as i64 - y) * kernel.value(x, y);
                    }
                }
                out.put(i, j, sum);
            }
        }
        out
    }

    fn zeros_matching(&self, other: &Self) -> Result<Self, Error> {
        if self.width() != other.width() || self.height() != other.height() {
            return Err(Error::DimensionMismatch {
                expected: (self.width(), self.height()),
                actual: (other.width(), other.height()),
            });
        }
        Ok(Self::new(self.width(), self.height(), self.border))
    }
}

/// Split a kernel into zero-padded SIMD lanes.
fn simd_kernel(kernel: &[f64]) -> Vec<f64x4> {
    kernel
        .chunks(4)
        .map(|chunk| {
            let data = [
                #[allow(clippy::get_first)]
                chunk.get(0).copied().unwrap_or(0.0),
                chunk.get(1).copied().unwrap_or(0.0),
                chunk.get(2).copied().unwrap_or(0.0),
                chunk.get(3).copied().unwrap_or(0.0),
            ];
            f64x4::new(data)
        })
        .collect()
}

fn simd_dot(window: &[f64], kernel_simd: &[f64x4]) -> f64 {
    window
        .chunks_exact(4)
        .map(|chunk| f64x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .zip(kernel_simd.iter())
        .fold(f64x4::splat(0.), |acc, (a, b)| a.mul_add(*b, acc))
        .reduce_add()
}

/// 1D convolution along rows. The scratch row is padded by evaluating the
/// image's border policy, so two 1D passes reproduce the full 2D
/// convolution for every policy (each policy acts on one axis at a time).
pub fn horizontal_filter(image: &BorderedImage, kernel: &[f64]) -> BorderedImage {
    let kernel_size = kernel.len();
    debug_assert!(kernel_size % 2 == 1);
    let kernel_half_size = kernel_size / 2;
    let width = image.width();
    let height = image.height();
    let border = image.border();
    let mut output = vec![0.0; width * height];
    // Convolution runs the kernel backwards over the sliding window.
    let kernel: Vec<f64> = kernel.iter().rev().copied().collect();
    let kernel_simd = simd_kernel(&kernel);
    let kernel_simd_size = 4 * (kernel_size + 3) / 4;
    let kernel_simd_extra_elements = kernel_simd_size - kernel_size;
    let row_in_it = image.as_raw().chunks_exact(width);
    let row_out_it = output.chunks_exact_mut(width);
    let mut scratch = vec![0f64; width + kernel_half_size * 2 + kernel_simd_extra_elements];
    for (row_in, row_out) in row_in_it.zip(row_out_it) {
        for k in 0..kernel_half_size {
            let left = k as i64 - kernel_half_size as i64;
            scratch[k] = border
                .resolve(left, width)
                .map(|x| row_in[x])
                .unwrap_or(0.0);
            let right = (width + k) as i64;
            scratch[kernel_half_size + width + k] = border
                .resolve(right, width)
                .map(|x| row_in[x])
                .unwrap_or(0.0);
        }
        scratch[kernel_half_size..kernel_half_size + width].copy_from_slice(row_in);
        scratch[2 * kernel_half_size + width..].fill(0.);
        scratch
            .windows(kernel_simd_size)
            .zip(row_out)
            .for_each(|(window, output)| *output = simd_dot(window, &kernel_simd));
    }
    BorderedImage::from_raw(width, height, output, border)
        .expect("output buffer matches the input dimensions")
}

/// 1D convolution along columns. Columns are staged through a narrow
/// scratch block to keep the walk cache-friendly.
pub fn vertical_filter(image: &BorderedImage, kernel: &[f64]) -> BorderedImage {
    let kernel_size = kernel.len();
    debug_assert!(kernel_size % 2 == 1);
    let kernel_half_size = kernel_size / 2;
    let width = image.width();
    let height = image.height();
    let border = image.border();
    let mut output = vec![0.0; width * height];
    let kernel: Vec<f64> = kernel.iter().rev().copied().collect();
    let kernel_simd = simd_kernel(&kernel);
    let kernel_simd_size = 4 * (kernel_size + 3) / 4;
    let kernel_simd_extra_elements = kernel_simd_size - kernel_size;
    const SCRATCH_WIDTH: usize = 16;
    let scratch_height = height + kernel_half_size * 2 + kernel_simd_extra_elements;
    let mut scratch = vec![0f64; SCRATCH_WIDTH * scratch_height];
    let raw = image.as_raw();
    for x_s in (0..width).step_by(SCRATCH_WIDTH) {
        let x_e = (x_s + SCRATCH_WIDTH).min(width);
        for x in x_s..x_e {
            let scratch_col_start = (x - x_s) * scratch_height;
            for k in 0..kernel_half_size {
                let above = k as i64 - kernel_half_size as i64;
                scratch[scratch_col_start + k] = border
                    .resolve(above, height)
                    .map(|y| raw[y * width + x])
                    .unwrap_or(0.0);
                let below = (height + k) as i64;
                scratch[scratch_col_start + kernel_half_size + height + k] = border
                    .resolve(below, height)
                    .map(|y| raw[y * width + x])
                    .unwrap_or(0.0);
            }
            for i in 0..kernel_simd_extra_elements {
                scratch[scratch_col_start + 2 * kernel_half_size + height + i] = 0.;
            }
        }
        for y in 0..height {
            let image_row_start = y * width;
            for x in x_s..x_e {
                scratch[(x - x_s) * scratch_height + y + kernel_half_size] =
                    raw[image_row_start + x];
            }
        }
        let col_count = x_e - x_s;
        scratch
            .chunks(scratch_height)
            .take(col_count)
            .enumerate()
            .for_each(|(dx, col)| {
                let x = x_s + dx;
                col.windows(kernel_simd_size)
                    .enumerate()
                    .for_each(|(y, window)| {
                        output[y * width + x] = simd_dot(window, &kernel_simd);
                    });
            });
    }
    BorderedImage::from_raw(width, height, output, border)
        .expect("output buffer matches the input dimensions")
}

pub fn separable_filter(
    image: &BorderedImage,
    h_kernel: &[f64],
    v_kernel: &[f64],
) -> BorderedImage {
    let h = horizontal_filter(image, h_kernel);
    vertical_filter(&h, v_kernel)
}

/// Gaussian kernel with the size/sigma coupling used across the pipeline.
///
/// Values are the analytic Gaussian, not renormalized to unit sum; the
/// scale bookkeeping elsewhere assumes this.
#[derive(Debug, Clone, Copy)]
pub struct GaussianKernel {
    sigma: f64,
    size: usize,
}

impl GaussianKernel {
    /// `size = floor(3 sigma) * 2 + 1`.
    pub fn from_sigma(sigma: f64) -> Self {
        assert!(sigma > 0.0, "sigma must be > 0.0");
        let half_size = (sigma * 3.0).floor() as usize;
        Self {
            sigma,
            size: half_size * 2 + 1,
        }
    }

    /// `sigma = (size - 1) / 6`; the size must be odd and at least 3.
    pub fn from_size(size: usize) -> Result<Self, Error> {
        if size % 2 == 0 || size < 3 {
            return Err(Error::InvalidKernelSize { size });
        }
        Ok(Self {
            sigma: (size - 1) as f64 / 6.0,
            size,
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// The 1D factor whose outer product with itself reproduces
    /// [`Kernel::value`] exactly; this is what makes the separable passes
    /// match the full 2D convolution.
    pub fn kernel_1d(&self) -> Vec<f64> {
        let r = self.radius();
        (-r..=r)
            .map(|x| {
                let x = x as f64;
                (-x * x / (2.0 * self.sigma * self.sigma)).exp() / ((2.0 * PI).sqrt() * self.sigma)
            })
            .collect()
    }
}

impl Kernel for GaussianKernel {
    fn size(&self) -> usize {
        self.size
    }

    fn value(&self, x: i64, y: i64) -> f64 {
        let (x, y) = (x as f64, y as f64);
        let top = (-(x * x + y * y) / (2.0 * self.sigma * self.sigma)).exp();
        top / (2.0 * PI * self.sigma * self.sigma)
    }
}

/// Gaussian blur through the separable path.
pub fn gaussian_blur(image: &BorderedImage, sigma: f64) -> BorderedImage {
    let kernel = GaussianKernel::from_sigma(sigma).kernel_1d();
    separable_filter(image, &kernel, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(width: usize, height: usize, border: BorderPolicy) -> BorderedImage {
        let data = (0..width * height)
            .map(|i| {
                let x = (i % width) as f64;
                let y = (i / width) as f64;
                (0.3 * x).sin() * (0.7 * y).cos() + 0.05 * x
            })
            .collect();
        BorderedImage::from_raw(width, height, data, border).unwrap()
    }

    #[test]
    fn gaussian_kernel_correct() {
        // test against known values of the analytic 1D Gaussian
        let kernel = GaussianKernel::from_sigma(1.0);
        assert_eq!(kernel.size(), 7);
        let known_correct_kernel = vec![
            0.0044318484,
            0.0539909665,
            0.2419707245,
            0.3989422804,
            0.2419707245,
            0.0539909665,
            0.0044318484,
        ];
        for (i, j) in kernel.kernel_1d().iter().zip(known_correct_kernel.iter()) {
            assert!((i - j).abs() < 1e-9);
        }
    }

    #[test]
    fn gaussian_outer_product_matches_2d_value() {
        let kernel = GaussianKernel::from_sigma(1.4);
        let one_d = kernel.kernel_1d();
        let r = kernel.radius();
        for x in -r..=r {
            for y in -r..=r {
                let product = one_d[(x + r) as usize] * one_d[(y + r) as usize];
                assert!((product - kernel.value(x, y)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn even_kernel_size_rejected() {
        assert!(GaussianKernel::from_size(8).is_err());
        assert!(GaussianKernel::from_size(1).is_err());
        assert!(GaussianKernel::from_size(7).is_ok());
    }

    #[test]
    fn separable_matches_full_convolution() {
        for border in [BorderPolicy::Mirror, BorderPolicy::Clamp, BorderPolicy::Zero] {
            let image = test_image(13, 9, border);
            let kernel = GaussianKernel::from_sigma(1.2);
            let full = image.apply_filter(&kernel);
            let one_d = kernel.kernel_1d();
            let separable = separable_filter(&image, &one_d, &one_d);
            for y in 0..image.height() {
                for x in 0..image.width() {
                    assert!(
                        (full.at(x, y) - separable.at(x, y)).abs() < 1e-9,
                        "mismatch at ({}, {}) under {:?}",
                        x,
                        y,
                        border
                    );
                }
            }
        }
    }

    #[test]
    fn get_is_total_for_every_policy() {
        for border in [BorderPolicy::Mirror, BorderPolicy::Clamp, BorderPolicy::Zero] {
            let image = test_image(5, 4, border);
            for &x in &[i64::MIN, -17, -1, 0, 4, 5, 1000, i64::MAX] {
                for &y in &[i64::MIN, -9, -1, 0, 3, 4, 1000, i64::MAX] {
                    assert!(image.get(x, y).is_finite());
                }
            }
        }
    }

    #[test]
    fn mirror_policy_formula() {
        let image =
            BorderedImage::from_raw(4, 1, vec![10.0, 11.0, 12.0, 13.0], BorderPolicy::Mirror)
                .unwrap();
        // i < 0 reflects to (width - 1) - (|i| mod width)
        assert_eq!(image.get(-1, 0), 12.0);
        assert_eq!(image.get(-4, 0), 13.0);
        // i >= width wraps to i mod width
        assert_eq!(image.get(4, 0), 10.0);
        assert_eq!(image.get(6, 0), 12.0);
    }

    #[test]
    fn clamp_and_zero_policies() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let clamped = BorderedImage::from_raw(2, 2, data.clone(), BorderPolicy::Clamp).unwrap();
        assert_eq!(clamped.get(-5, 0), 1.0);
        assert_eq!(clamped.get(9, 1), 4.0);
        let zeroed = BorderedImage::from_raw(2, 2, data, BorderPolicy::Zero).unwrap();
        assert_eq!(zeroed.get(-1, 0), 0.0);
        assert_eq!(zeroed.get(0, 2), 0.0);
        assert_eq!(zeroed.get(1, 1), 4.0);
    }

    #[test]
    fn half_size_keeps_odd_indices() {
        let data: Vec<f64> = (0..20).map(f64::from).collect();
        let image = BorderedImage::from_raw(5, 4, data, BorderPolicy::Clamp).unwrap();
        let half = image.half_size();
        assert_eq!((half.width(), half.height()), (2, 2));
        assert_eq!(half.at(0, 0), image.at(1, 1));
        assert_eq!(half.at(1, 0), image.at(3, 1));
        assert_eq!(half.at(0, 1), image.at(1, 3));
        assert_eq!(half.at(1, 1), image.at(3, 3));
    }

    #[test]
    fn subtract_requires_equal_dimensions() {
        let a = BorderedImage::new(3, 3, BorderPolicy::Zero);
        let b = BorderedImage::new(3, 2, BorderPolicy::Zero);
        assert!(a.subtract(&b).is_err());
    }

    #[test]
    fn normalized_rescales_range() {
        let image =
            BorderedImage::from_raw(2, 2, vec![1.0, 2.0, 3.0, 5.0], BorderPolicy::Zero).unwrap();
        let scaled = image.normalized(0.0, 1.0);
        assert!((scaled.at(0, 0) - 0.0).abs() < 1e-12);
        assert!((scaled.at(1, 1) - 1.0).abs() < 1e-12);
        assert!((scaled.at(1, 0) - 0.25).abs() < 1e-12);
    }
}
