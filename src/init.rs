//! Parameter initialization schemes
//!
//! Burn ships no truncated normal initializer, and its own initializers draw
//! from the backend's global RNG. Weights are therefore sampled on the host
//! from a caller-supplied RNG and uploaded as tensors, which keeps seeded
//! construction reproducible.

use burn::module::Param;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Truncation bound, in standard deviations.
pub const TRUNCATION_BOUND: f64 = 2.0;

/// Number of candidates drawn per element by [`TruncationStrategy::Oversample`].
pub const OVERSAMPLE_DRAWS: usize = 4;

/// How out-of-range draws are handled when sampling a truncated normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TruncationStrategy {
    /// Draw a fixed number of candidates per element and keep the first one
    /// inside the bound. If none is, the candidate closest to the interval is
    /// clamped onto the bound.
    Oversample,
    /// Redraw until the sample falls inside the bound.
    Reject,
}

/// Sample `count` values from N(0, 1/fan) truncated at ±2 standard deviations.
pub fn truncated_normal<R: Rng + ?Sized>(
    count: usize,
    fan: usize,
    strategy: TruncationStrategy,
    rng: &mut R,
) -> Vec<f32> {
    let std = 1.0 / (fan.max(1) as f64).sqrt();

    (0..count)
        .map(|_| {
            let z = match strategy {
                TruncationStrategy::Oversample => oversampled_draw(rng),
                TruncationStrategy::Reject => loop {
                    let z: f64 = rng.sample(StandardNormal);
                    if z.abs() < TRUNCATION_BOUND {
                        break z;
                    }
                },
            };
            (z * std) as f32
        })
        .collect()
}

fn oversampled_draw<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    pick_oversampled((0..OVERSAMPLE_DRAWS).map(|_| rng.sample::<f64, _>(StandardNormal)))
}

/// First candidate inside the bound, else the nearest one clamped onto it.
///
/// Candidates are consumed lazily, so nothing past the accepted one is drawn.
fn pick_oversampled(candidates: impl IntoIterator<Item = f64>) -> f64 {
    let mut nearest = f64::INFINITY;
    for z in candidates {
        if z.abs() < TRUNCATION_BOUND {
            return z;
        }
        if z.abs() < nearest.abs() {
            nearest = z;
        }
    }
    nearest.clamp(-TRUNCATION_BOUND, TRUNCATION_BOUND)
}

/// Create a `[d_input, d_output]` weight tensor with truncated-normal entries.
pub fn truncated_normal_tensor<B: Backend, R: Rng + ?Sized>(
    shape: [usize; 2],
    fan: usize,
    strategy: TruncationStrategy,
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, 2> {
    let data = truncated_normal(shape[0] * shape[1], fan, strategy, rng);
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape(shape)
}

/// Linear layer with truncated-normal weights and a zero bias (if any).
pub fn trunc_normal_linear<B: Backend, R: Rng + ?Sized>(
    d_input: usize,
    d_output: usize,
    fan: usize,
    with_bias: bool,
    strategy: TruncationStrategy,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_bias(with_bias)
        .with_initializer(Initializer::Zeros)
        .init(device);
    linear.weight = Param::from_tensor(truncated_normal_tensor(
        [d_input, d_output],
        fan,
        strategy,
        rng,
        device,
    ));
    linear
}

/// Linear layer with Kaiming-uniform weights (gain √2) and a zero bias.
///
/// Weights are drawn from `U(-bound, bound)` with `bound = √2 · √(3 / d_input)`.
pub fn kaiming_uniform_linear<B: Backend, R: Rng + ?Sized>(
    d_input: usize,
    d_output: usize,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let bound = kaiming_uniform_bound(d_input) as f32;
    let data: Vec<f32> = (0..d_input * d_output)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();

    let mut linear = LinearConfig::new(d_input, d_output)
        .with_bias(true)
        .with_initializer(Initializer::Zeros)
        .init(device);
    linear.weight = Param::from_tensor(
        Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([d_input, d_output]),
    );
    linear
}

/// Upper bound of [`kaiming_uniform_linear`] weights for a given fan-in.
pub fn kaiming_uniform_bound(fan_in: usize) -> f64 {
    std::f64::consts::SQRT_2 * (3.0 / fan_in as f64).sqrt()
}
