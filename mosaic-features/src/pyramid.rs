use crate::image::{gaussian_blur, BorderedImage};
use crate::{Error, Extractor};
use log::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// One blur level of an octave.
#[derive(Debug, Clone)]
pub struct OctaveElement {
    pub image: BorderedImage,
    /// Blur relative to the start of the octave; resets when the pyramid
    /// shrinks.
    pub local_sigma: f64,
    /// Absolute blur accounting for the octave's downsampling, comparable
    /// across the whole pyramid.
    pub global_sigma: f64,
}

/// A run of progressively blurred images at one spatial resolution.
///
/// The nominal levels cover one doubling of sigma; the overhead tail past
/// them exists only so extrema can be tested near the top of the range,
/// and is never used to seed the next octave.
#[derive(Debug, Clone)]
pub struct Octave {
    elements: Vec<OctaveElement>,
    overhead: usize,
}

impl Octave {
    pub fn new(elements: Vec<OctaveElement>, overhead: usize) -> Self {
        assert!(
            elements.len() > overhead,
            "an octave needs at least one nominal element"
        );
        Self { elements, overhead }
    }

    /// Number of nominal levels (`shrinks_per_octave + 1` for Gaussian
    /// octaves, `shrinks_per_octave` for difference octaves).
    pub fn len(&self) -> usize {
        self.elements.len() - self.overhead
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overhead(&self) -> usize {
        self.overhead
    }

    /// Nominal plus overhead levels.
    pub fn total_len(&self) -> usize {
        self.elements.len()
    }

    /// Index into the nominal levels.
    pub fn element(&self, index: usize) -> &OctaveElement {
        assert!(index < self.len(), "index {index} is not a nominal level");
        &self.elements[index]
    }

    /// Index into the full chain, overhead included.
    pub fn through_all(&self, index: usize) -> &OctaveElement {
        &self.elements[index]
    }

    pub fn first(&self) -> &OctaveElement {
        &self.elements[0]
    }

    pub fn last_nominal(&self) -> &OctaveElement {
        &self.elements[self.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &OctaveElement> {
        self.elements.iter()
    }
}

/// The incremental blur that takes an image from `source` to `target`
/// sigma: independent Gaussian blurs compose through
/// `sqrt(target^2 - source^2)`.
///
/// A target at or below the source would silently corrupt the scale
/// bookkeeping, so it fails instead of clamping.
pub fn delta_sigma(source: f64, target: f64) -> Result<f64, Error> {
    if target <= source {
        return Err(Error::SigmaNotIncreasing { source_sigma: source, target });
    }
    Ok((target * target - source * source).sqrt())
}

impl Extractor {
    /// Build the Gaussian scale-space pyramid.
    ///
    /// The input is pre-blurred once from `image_sigma` to `base_sigma`;
    /// every further level is blurred directly from its octave's first
    /// image so blur error never compounds across levels. Octave `o+1` is
    /// seeded by decimating the last nominal level of octave `o`.
    pub fn generate_octaves(&self, image: &BorderedImage) -> Result<Vec<Octave>, Error> {
        self.validate()?;
        let k = 2f64.powf(1.0 / self.shrinks_per_octave as f64);
        let pre_blur = delta_sigma(self.image_sigma, self.base_sigma)?;
        let mut seed = gaussian_blur(image, pre_blur);
        let mut octaves = Vec::with_capacity(self.octave_count);
        for octave_index in 0..self.octave_count {
            debug!(
                "generating octave {} at {}x{}",
                octave_index,
                seed.width(),
                seed.height()
            );
            let octave = self.generate_one_octave(octave_index, k, seed)?;
            seed = octave.last_nominal().image.half_size();
            octaves.push(octave);
        }
        Ok(octaves)
    }

    fn generate_one_octave(
        &self,
        octave_index: usize,
        k: f64,
        seed: BorderedImage,
    ) -> Result<Octave, Error> {
        let global_scale = 2f64.powi(octave_index as i32);
        let total_levels = self.shrinks_per_octave + self.overhead_size;
        let level = |m: usize| -> Result<OctaveElement, Error> {
            let sigma = self.base_sigma * k.powi(m as i32);
            let delta = delta_sigma(self.base_sigma, sigma)?;
            Ok(OctaveElement {
                image: gaussian_blur(&seed, delta),
                local_sigma: sigma,
                global_sigma: sigma * global_scale,
            })
        };
        // Levels depend only on the seed, never on each other.
        #[cfg(not(feature = "rayon"))]
        let rest = (1..=total_levels)
            .map(level)
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(feature = "rayon")]
        let rest = (1..=total_levels)
            .into_par_iter()
            .map(level)
            .collect::<Result<Vec<_>, _>>()?;
        let mut elements = vec![OctaveElement {
            local_sigma: self.base_sigma,
            global_sigma: self.base_sigma * global_scale,
            image: seed,
        }];
        elements.extend(rest);
        Ok(Octave::new(elements, self.overhead_size))
    }
}

/// Derive the difference (Laplacian approximation) octaves: every adjacent
/// pair of levels, overhead included, becomes `next - previous` stamped
/// with the sigmas of the pair's first element.
pub fn to_differences(octaves: &[Octave]) -> Result<Vec<Octave>, Error> {
    octaves
        .iter()
        .map(|octave| {
            let elements = (0..octave.total_len() - 1)
                .map(|index| {
                    let prev = octave.through_all(index);
                    let next = octave.through_all(index + 1);
                    Ok(OctaveElement {
                        image: next.image.subtract(&prev.image)?,
                        local_sigma: prev.local_sigma,
                        global_sigma: prev.global_sigma,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Octave::new(elements, octave.overhead()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BorderPolicy;

    fn test_image(width: usize, height: usize) -> BorderedImage {
        let data = (0..width * height)
            .map(|i| {
                let x = (i % width) as f64;
                let y = (i / width) as f64;
                0.5 + 0.4 * (0.2 * x).sin() * (0.15 * y).cos()
            })
            .collect();
        BorderedImage::from_raw(width, height, data, BorderPolicy::Mirror).unwrap()
    }

    fn extractor() -> Extractor {
        Extractor {
            octave_count: 3,
            shrinks_per_octave: 4,
            overhead_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn octave_counts_and_sizes() {
        let config = extractor();
        let octaves = config.generate_octaves(&test_image(64, 48)).unwrap();
        assert_eq!(octaves.len(), 3);
        for octave in &octaves {
            assert_eq!(octave.len(), config.shrinks_per_octave + 1);
            assert_eq!(
                octave.total_len(),
                config.shrinks_per_octave + config.overhead_size + 1
            );
        }
        assert_eq!(octaves[0].first().image.width(), 64);
        assert_eq!(octaves[1].first().image.width(), 32);
        assert_eq!(octaves[2].first().image.width(), 16);
    }

    #[test]
    fn global_sigma_is_monotonic() {
        let config = extractor();
        let octaves = config.generate_octaves(&test_image(64, 48)).unwrap();
        for octave in &octaves {
            for index in 1..octave.total_len() {
                assert!(
                    octave.through_all(index).global_sigma
                        > octave.through_all(index - 1).global_sigma
                );
            }
        }
        // an octave picks up exactly where the previous nominal run ended
        for pair in octaves.windows(2) {
            let seam = pair[0].last_nominal().global_sigma;
            assert!((pair[1].first().global_sigma - seam).abs() < 1e-12);
        }
    }

    #[test]
    fn local_sigma_doubles_over_nominal_levels() {
        let config = extractor();
        let octaves = config.generate_octaves(&test_image(64, 48)).unwrap();
        for octave in &octaves {
            let first = octave.first().local_sigma;
            let last = octave.last_nominal().local_sigma;
            assert!((last / first - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn delta_sigma_rejects_non_increasing_targets() {
        assert!(delta_sigma(1.0, 1.0).is_err());
        assert!(delta_sigma(1.6, 0.5).is_err());
        let delta = delta_sigma(0.5, 1.6).unwrap();
        assert!((delta - (1.6f64 * 1.6 - 0.25).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn differences_shrink_by_one_and_keep_first_sigmas() {
        let config = extractor();
        let octaves = config.generate_octaves(&test_image(64, 48)).unwrap();
        let differences = to_differences(&octaves).unwrap();
        for (octave, difference) in octaves.iter().zip(differences.iter()) {
            assert_eq!(difference.total_len(), octave.total_len() - 1);
            assert_eq!(difference.len(), config.shrinks_per_octave);
            for index in 0..difference.total_len() {
                assert_eq!(
                    difference.through_all(index).local_sigma,
                    octave.through_all(index).local_sigma
                );
            }
            // spot-check the pixelwise subtraction
            let expected = octave.through_all(1).image.at(5, 5) - octave.through_all(0).image.at(5, 5);
            assert!((difference.through_all(0).image.at(5, 5) - expected).abs() < 1e-12);
        }
    }
}
