use std::f32::consts::PI;

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use crate::{DanceCueError, Result};

/// Measured properties of a rendered click.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickProfile {
    /// Centre of the strongest spectral bin.
    pub peak_frequency_hz: f32,
    pub peak_amplitude: f32,
    pub duration_ms: f32,
}

/// Inspects a mono click buffer: dominant frequency through a Hann windowed
/// real FFT, absolute peak and length.
pub fn profile_click(samples: &[f32], sample_rate: u32) -> Result<ClickProfile> {
    if samples.len() < 2 {
        return Err(DanceCueError::InvalidInput(
            "click analysis requires at least two samples",
        ));
    }
    if sample_rate == 0 {
        return Err(DanceCueError::InvalidInput("sample rate must be positive"));
    }

    let len = samples.len();
    let mut planner = RealFftPlanner::<f32>::new();
    let plan = planner.plan_fft_forward(len);
    let mut input = plan.make_input_vec();
    let mut spectrum = plan.make_output_vec();
    let mut scratch = plan.make_scratch_vec();

    for (index, value) in samples.iter().enumerate() {
        input[index] = *value * hann_value(index, len);
    }
    plan.process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;

    // Bin 0 is DC and never a tone.
    let (peak_bin, _) = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .map(|(bin, value)| (bin, value.norm()))
        .fold((0, 0.0_f32), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });

    let bin_hz = sample_rate as f32 / len as f32;
    let peak_amplitude = samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()));

    Ok(ClickProfile {
        peak_frequency_hz: peak_bin as f32 * bin_hz,
        peak_amplitude,
        duration_ms: len as f32 * 1_000.0 / sample_rate as f32,
    })
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
