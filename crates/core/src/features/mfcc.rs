//! Mel-frequency cepstral coefficients, numerically aligned with librosa's
//! `feature.mfcc` defaults (centered STFT, Slaney mel scale, dB with an 80 dB
//! floor, orthonormal DCT-II).

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

const AMIN: f64 = 1e-10;

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MfccParams {
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub top_db: Option<f64>,
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Periodic Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Number of frames a centered STFT produces for `len` samples.
pub fn frame_count(len: usize, hop_length: usize) -> usize {
    1 + len / hop_length
}

/// Triangular Slaney-normalized filters, `[n_mels][n_fft / 2 + 1]`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let n_bins = n_fft / 2 + 1;
    let sr = f64::from(sample_rate);
    let fft_freqs: Vec<f64> = (0..n_bins).map(|k| k as f64 * sr / n_fft as f64).collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sr / 2.0);
    let points = n_mels + 2;
    let mel_f: Vec<f64> = (0..points)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (points - 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (mel_f[m], mel_f[m + 1], mel_f[m + 2]);
            let enorm = 2.0 / (upper - lower);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Power spectrogram, `[frames][n_fft / 2 + 1]`; frames are centered by zero padding.
pub fn power_spectrogram(samples: &[f32], n_fft: usize, hop_length: usize) -> Vec<Vec<f64>> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0f64; samples.len() + 2 * pad];
    for (dst, src) in padded[pad..].iter_mut().zip(samples) {
        *dst = f64::from(*src);
    }

    let window = hann_window(n_fft);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);
    let n_bins = n_fft / 2 + 1;
    let frames = frame_count(samples.len(), hop_length);

    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
    let mut out = Vec::with_capacity(frames);
    for t in 0..frames {
        let start = t * hop_length;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let x = padded.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex::new(x * window[i], 0.0);
        }
        fft.process(&mut buffer);
        out.push(buffer[..n_bins].iter().map(|c| c.norm_sqr()).collect());
    }
    out
}

/// `10 * log10(max(x, amin))`, clipped to `max - top_db` over the whole input.
pub fn power_to_db(mel: &mut [Vec<f64>], top_db: Option<f64>) {
    let mut peak = f64::NEG_INFINITY;
    for v in mel.iter_mut().flatten() {
        *v = 10.0 * v.max(AMIN).log10();
        peak = peak.max(*v);
    }
    if let Some(top_db) = top_db {
        let floor = peak - top_db;
        for v in mel.iter_mut().flatten() {
            *v = v.max(floor);
        }
    }
}

/// Orthonormal DCT-II matrix, `[n_out][n_in]`.
pub fn dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}

/// Mean MFCC per coefficient over all frames of `samples`.
pub fn mean_mfcc(samples: &[f32], sample_rate: u32, params: &MfccParams) -> Vec<f32> {
    let spectrogram = power_spectrogram(samples, params.n_fft, params.hop_length);
    let filters = mel_filterbank(sample_rate, params.n_fft, params.n_mels);

    let mut mel: Vec<Vec<f64>> = spectrogram
        .iter()
        .map(|frame| {
            filters
                .iter()
                .map(|filter| filter.iter().zip(frame).map(|(w, p)| w * p).sum())
                .collect()
        })
        .collect();
    power_to_db(&mut mel, params.top_db);

    let dct = dct_matrix(params.n_mfcc, params.n_mels);
    let mut sums = vec![0.0f64; params.n_mfcc];
    for frame in &mel {
        for (sum, row) in sums.iter_mut().zip(&dct) {
            *sum += row.iter().zip(frame).map(|(d, m)| d * m).sum::<f64>();
        }
    }

    let frames = mel.len().max(1) as f64;
    sums.into_iter().map(|s| (s / frames) as f32).collect()
}
