//! Fixtures shared by the inline test modules.

use std::f32::consts::PI;
use std::io::Cursor;
use std::net::SocketAddr;

pub fn sine(freq_hz: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
    let len = (sample_rate as f32 * secs).round() as usize;
    (0..len)
        .map(|i| 0.5 * (2.0 * PI * freq_hz * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Little-endian 16-bit mono WAV.
pub fn wav_bytes(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    write_wav(sample_rate, 1, samples.iter().copied())
}

pub fn wav_bytes_stereo(sample_rate: u32, left: &[f32], right: &[f32]) -> Vec<u8> {
    let interleaved = left.iter().zip(right).flat_map(|(l, r)| [*l, *r]);
    write_wav(sample_rate, 2, interleaved)
}

fn write_wav(sample_rate: u32, channels: u16, samples: impl Iterator<Item = f32>) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Serves `router` on an ephemeral localhost port for the lifetime of the test runtime.
pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_fixture_round_trips_through_hound() {
        let bytes = wav_bytes(16_000, &sine(440.0, 16_000, 0.25));
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 4_000);
    }
}
