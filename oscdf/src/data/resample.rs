use osccore::{PeakError, Result};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

/// Number of samples `n` input samples span at the new rate.
pub fn resampled_length(n: usize, from_rate: f64, to_rate: f64) -> usize {
    (n as f64 * to_rate / from_rate).round() as usize
}

/// Fourier resampling of a real signal from `from_rate` to `to_rate` Hz.
///
/// The spectrum is truncated or zero padded to the new length. An even
/// length Nyquist bin is doubled when shrinking and halved when growing so
/// the output stays real and keeps the input's amplitude.
pub fn resample_fft(signal: &[f64], from_rate: f64, to_rate: f64) -> Result<Vec<f64>> {
    if !(from_rate > 0.0 && to_rate > 0.0) || !from_rate.is_finite() || !to_rate.is_finite() {
        return Err(PeakError::InvalidArgument(format!(
            "cannot resample from {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }
    let n = signal.len();
    if n == 0 || from_rate == to_rate {
        return Ok(signal.to_vec());
    }
    let m = resampled_length(n, from_rate, to_rate);
    if m == 0 {
        return Err(PeakError::Profiler(format!(
            "{} samples at {} Hz vanish at {} Hz",
            n, from_rate, to_rate
        )));
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut spectrum: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    // one-sided spectrum at the new length
    let shared = n.min(m);
    let half = shared / 2 + 1;
    let mut one_sided = vec![Complex64::new(0.0, 0.0); m / 2 + 1];
    one_sided[..half.min(m / 2 + 1)].copy_from_slice(&spectrum[..half.min(m / 2 + 1)]);
    if shared % 2 == 0 {
        let nyq = shared / 2;
        if m < n {
            one_sided[nyq] *= 2.0;
        } else if m > n {
            one_sided[nyq] *= 0.5;
        }
    }

    let mut full = vec![Complex64::new(0.0, 0.0); m];
    for (k, v) in one_sided.iter().enumerate() {
        full[k] = *v;
        if k > 0 && m - k != k {
            full[m - k] = v.conj();
        }
    }
    if m % 2 == 0 {
        full[m / 2] = Complex64::new(full[m / 2].re, 0.0);
    }
    planner.plan_fft_inverse(m).process(&mut full);

    // unnormalized inverse: 1/m, amplitude rescale: m/n
    let scale = 1.0 / n as f64;
    Ok(full.iter().map(|c| c.re * scale).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    #[test]
    fn test_identity_rate() {
        let s = sine(5.0, 100.0, 64);
        assert_eq!(resample_fft(&s, 100.0, 100.0).unwrap(), s);
    }

    #[test]
    fn test_downsample_keeps_periodic_sine() {
        // 10 Hz over exactly 4 s at both rates
        let s = sine(10.0, 1000.0, 4000);
        let r = resample_fft(&s, 1000.0, 256.0).unwrap();
        assert_eq!(r.len(), 1024);
        let expected = sine(10.0, 256.0, 1024);
        for (a, b) in r.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_upsample_length_and_mean() {
        let s = vec![1.0; 50];
        let r = resample_fft(&s, 100.0, 256.0).unwrap();
        assert_eq!(r.len(), 128);
        assert!(r.iter().all(|v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_rejects_bad_rate() {
        assert!(resample_fft(&[1.0, 2.0], 0.0, 256.0).is_err());
    }
}
