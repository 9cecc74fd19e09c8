//! Online SOM training.
//!
//! One randomly drawn sample per iteration, with an exponentially shrinking
//! neighbourhood and exponentially decaying learning rate:
//!
//! - `r(i)  = r0 * exp(-i / (iterations / ln r0))`, `r0 = max side / 2`
//! - `lr(i) = lr0 * exp(-i / iterations)`

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::SomConfig;
use crate::error::Result;
use crate::som::SomMap;

/// Coarse progress snapshot emitted every `progress_interval` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingProgress {
    pub iteration: usize,
    pub total: usize,
}

impl TrainingProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.iteration as f32 / self.total as f32
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub iterations: usize,
    pub samples: usize,
    /// Mean distance from each sample to its BMU after training.
    pub quantization_error: f64,
}

pub struct SomTrainer {
    iterations: usize,
    learning_rate: f64,
    progress_interval: usize,
    rng: ChaCha8Rng,
}

impl SomTrainer {
    pub fn new(iterations: usize, config: &SomConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            iterations,
            learning_rate: config.learning_rate,
            progress_interval: config.progress_interval.max(1),
            rng,
        }
    }

    /// Random-initialised map drawn from this trainer's generator.
    pub fn initial_map(&mut self, shape: crate::som::GridShape, dim: usize) -> SomMap {
        SomMap::random(shape, dim, &mut self.rng)
    }

    fn initial_radius(map: &SomMap) -> f64 {
        map.shape.max_side() as f64 / 2.0
    }

    fn time_constant(&self, radius0: f64) -> f64 {
        // ln(r0) <= 0 would make the radius grow; keep it constant instead
        if radius0 <= 1.0 {
            f64::INFINITY
        } else {
            self.iterations as f64 / radius0.ln()
        }
    }

    #[inline]
    pub fn radius(&self, radius0: f64, iteration: usize) -> f64 {
        radius0 * (-(iteration as f64) / self.time_constant(radius0)).exp()
    }

    #[inline]
    pub fn learning_rate(&self, iteration: usize) -> f64 {
        self.learning_rate * (-(iteration as f64) / self.iterations as f64).exp()
    }

    /// Trains `map` in place on `samples`.
    ///
    /// An empty sample set leaves the map untouched. `progress` is called
    /// every `progress_interval` iterations and once at the end.
    pub fn train<F>(&mut self, map: &mut SomMap, samples: &[Vec<f64>], mut progress: F) -> Result<TrainingReport>
    where
        F: FnMut(TrainingProgress),
    {
        for sample in samples {
            map.check_dim(sample)?;
        }

        if samples.is_empty() {
            debug!("No samples, map left at its initial weights");
            progress(TrainingProgress { iteration: 0, total: 0 });
            return Ok(TrainingReport {
                iterations: 0,
                samples: 0,
                quantization_error: 0.0,
            });
        }

        let radius0 = Self::initial_radius(map);
        let started = Instant::now();
        info!(
            "Training SOM: {} samples, {} units ({}x{}x{}), {} dim, {} iterations",
            samples.len(),
            map.len(),
            map.shape.width,
            map.shape.height,
            map.shape.depth,
            map.dim,
            self.iterations
        );

        for i in 0..self.iterations {
            let sample = &samples[self.rng.gen_range(0..samples.len())];
            let (bmu, _) = map
                .nearest_unit(sample)
                .ok_or(crate::error::SomError::EmptyMap)?;

            let radius = self.radius(radius0, i);
            let lr = self.learning_rate(i);
            map.update(sample, bmu, lr, radius);

            if i % self.progress_interval == 0 {
                progress(TrainingProgress { iteration: i, total: self.iterations });
            }
        }
        progress(TrainingProgress {
            iteration: self.iterations,
            total: self.iterations,
        });

        let quantization_error = quantization_error(map, samples);
        info!(
            "SOM trained in {:.2?}, quantization error {:.4}",
            started.elapsed(),
            quantization_error
        );

        Ok(TrainingReport {
            iterations: self.iterations,
            samples: samples.len(),
            quantization_error,
        })
    }
}

/// Mean Euclidean distance from each sample to its BMU.
pub fn quantization_error(map: &SomMap, samples: &[Vec<f64>]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: f64 = samples
        .iter()
        .filter_map(|s| map.nearest_unit(s))
        .map(|(_, d)| d.sqrt())
        .sum();
    total / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::som::GridShape;

    fn seeded(iterations: usize, seed: u64) -> SomTrainer {
        let config = SomConfig {
            seed: Some(seed),
            ..Default::default()
        };
        SomTrainer::new(iterations, &config)
    }

    fn two_clusters() -> Vec<Vec<f64>> {
        let mut samples = Vec::new();
        for i in 0..20 {
            let jitter = i as f64 * 0.001;
            samples.push(vec![0.05 + jitter, 0.05, 0.1]);
            samples.push(vec![0.95 - jitter, 0.9, 0.85]);
        }
        samples
    }

    #[test]
    fn test_zero_iterations_leave_weights_unchanged() {
        let mut trainer = seeded(0, 1);
        let mut map = trainer.initial_map(GridShape::flat(2, 2).unwrap(), 2);
        let before: Vec<Vec<f64>> = map.units.iter().map(|u| u.weights.clone()).collect();

        let samples = vec![vec![0.3, 0.6]];
        trainer.train(&mut map, &samples, |_| {}).unwrap();

        let after: Vec<Vec<f64>> = map.units.iter().map(|u| u.weights.clone()).collect();
        assert_eq!(before, after);

        // BMU is simply the nearest of the four initial weights
        let nearest = before
            .iter()
            .enumerate()
            .map(|(i, w)| (i, (w[0] - 0.3).powi(2) + (w[1] - 0.6).powi(2)))
            .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
            .0;
        assert_eq!(map.find_bmu(&[0.3, 0.6]).unwrap(), nearest);
    }

    #[test]
    fn test_empty_training_set_is_noop() {
        let mut trainer = seeded(100, 2);
        let mut map = trainer.initial_map(GridShape::flat(3, 3).unwrap(), 4);
        let before = map.units[4].weights.clone();

        let report = trainer.train(&mut map, &[], |_| {}).unwrap();
        assert_eq!(report.samples, 0);
        assert_eq!(map.units[4].weights, before);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut trainer = seeded(10, 3);
        let mut map = trainer.initial_map(GridShape::flat(2, 2).unwrap(), 3);
        let result = trainer.train(&mut map, &[vec![1.0, 2.0]], |_| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_weights_keep_dimension() {
        let samples = two_clusters();
        let mut trainer = seeded(200, 4);
        let mut map = trainer.initial_map(GridShape::flat(4, 4).unwrap(), 3);
        trainer.train(&mut map, &samples, |_| {}).unwrap();
        assert!(map.units.iter().all(|u| u.weights.len() == 3));
    }

    #[test]
    fn test_training_reduces_quantization_error() {
        let samples = two_clusters();
        let mut trainer = seeded(500, 5);
        let mut map = trainer.initial_map(GridShape::flat(4, 4).unwrap(), 3);
        let before = quantization_error(&map, &samples);

        let report = trainer.train(&mut map, &samples, |_| {}).unwrap();
        assert!(report.quantization_error < before);
    }

    #[test]
    fn test_clusters_land_on_different_units() {
        let samples = two_clusters();
        let mut trainer = seeded(500, 6);
        let mut map = trainer.initial_map(GridShape::flat(4, 4).unwrap(), 3);
        trainer.train(&mut map, &samples, |_| {}).unwrap();

        let low = map.bmu_coord(&samples[0]).unwrap();
        let high = map.bmu_coord(&samples[1]).unwrap();
        assert_ne!(low, high);
    }

    #[test]
    fn test_same_seed_same_map() {
        let samples = two_clusters();
        let run = || {
            let mut trainer = seeded(100, 9);
            let mut map = trainer.initial_map(GridShape::flat(3, 3).unwrap(), 3);
            trainer.train(&mut map, &samples, |_| {}).unwrap();
            map.units.iter().map(|u| u.weights.clone()).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_progress_cadence() {
        let samples = two_clusters();
        let mut trainer = seeded(100, 7);
        let mut map = trainer.initial_map(GridShape::flat(3, 3).unwrap(), 3);
        let mut seen = Vec::new();
        trainer
            .train(&mut map, &samples, |p| seen.push(p.iteration))
            .unwrap();

        assert_eq!(seen, vec![0, 20, 40, 60, 80, 100]);
    }

    #[test]
    fn test_schedules_decay() {
        let trainer = seeded(1000, 8);
        let r0 = 10.0;
        assert!((trainer.radius(r0, 0) - r0).abs() < 1e-12);
        // After all iterations the radius has shrunk to 1 cell
        assert!((trainer.radius(r0, 1000) - 1.0).abs() < 1e-9);
        assert!((trainer.learning_rate(0) - 0.5).abs() < 1e-12);
        assert!(trainer.learning_rate(500) < trainer.learning_rate(100));
    }
}
