use ndarray::prelude::*;

use super::LayerCache;

const EPSILON: f32 = 1e-5;

/// Normalizes every channel of every sample to zero mean and unit variance over its spatial
/// positions. It has no learnable parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceNorm {
    epsilon: f32,
}

impl Default for InstanceNorm {
    fn default() -> Self {
        Self { epsilon: EPSILON }
    }
}

impl InstanceNorm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&self, x: Array4<f32>, record: bool) -> (Array4<f32>, Option<LayerCache>) {
        let (n, h, w, c) = x.dim();
        let count = (h * w) as f32;

        let mean = spatial_sum(x.view()) / count;
        let centered = &x - &broadcastable(mean.view());
        let var = spatial_sum(centered.mapv(|v| v * v).view()) / count;
        let inv_std = var.mapv(|v| 1. / (v + self.epsilon).sqrt());

        let xhat = centered * &broadcastable(inv_std.view());
        debug_assert_eq!(xhat.dim(), (n, h, w, c));

        let cache = record.then(|| LayerCache::InstanceNorm {
            xhat: xhat.clone(),
            inv_std,
        });

        (xhat, cache)
    }

    pub fn backward(&self, xhat: Array4<f32>, inv_std: Array2<f32>, d: Array4<f32>) -> Array4<f32> {
        let (_, h, w, _) = d.dim();
        let count = (h * w) as f32;

        let sum_d = spatial_sum(d.view());
        let sum_d_xhat = spatial_sum((&d * &xhat).view());

        let mut dx = d * count;
        dx -= &broadcastable(sum_d.view());
        dx -= &(xhat * &broadcastable(sum_d_xhat.view()));
        dx *= &broadcastable((inv_std / count).view());
        dx
    }
}

/// Sums over height and width, giving `[n, c]`.
fn spatial_sum(x: ArrayView4<f32>) -> Array2<f32> {
    x.sum_axis(Axis(1)).sum_axis(Axis(1))
}

/// Reshapes `[n, c]` statistics into `[n, 1, 1, c]` so they broadcast over a batch.
fn broadcastable(stats: ArrayView2<f32>) -> ArrayView4<f32> {
    stats.insert_axis(Axis(1)).insert_axis(Axis(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Array4<f32> {
        Array4::from_shape_fn((2, 3, 3, 2), |(b, y, x, c)| {
            ((b * 13 + y * 5 + x * 3 + c * 7) % 9) as f32 * 0.3 - 1.0
        })
    }

    #[test]
    fn normalizes_each_channel_of_each_sample() {
        let (y, _) = InstanceNorm::new().forward(sample(), false);

        for b in 0..2 {
            for c in 0..2 {
                let channel = y.slice(s![b, .., .., c]);
                let mean = channel.mean().unwrap();
                let var = channel.mapv(|v| (v - mean).powi(2)).mean().unwrap();
                assert!(mean.abs() < 1e-5);
                assert!((var - 1.0).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let norm = InstanceNorm::new();
        let x = sample();
        let weights = Array4::from_shape_fn(x.dim(), |(b, y, x, c)| (b + 2 * y + x + c) as f32 * 0.1);
        let objective = |x: &Array4<f32>| (norm.forward(x.clone(), false).0 * &weights).sum();

        let (_, cache) = norm.forward(x.clone(), true);
        let Some(LayerCache::InstanceNorm { xhat, inv_std }) = cache else {
            panic!("expected an instance norm cache");
        };
        let dx = norm.backward(xhat, inv_std, weights.clone());

        let h = 1e-2;
        for idx in [[0, 0, 0, 0], [0, 1, 2, 1], [1, 2, 2, 0]] {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[idx] += h;
            minus[idx] -= h;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
            assert!((numeric - dx[idx]).abs() < 2e-2, "input {idx:?}");
        }
    }
}
