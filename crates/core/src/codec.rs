//! Sample codecs for the wire encodings (PCM16 little-endian, G.711 μ-law)

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_NORMALIZE)
        .collect()
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| ((sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16).to_le_bytes())
        .collect()
}

pub fn mulaw_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .iter()
        .map(|&b| decode_mulaw(b) as f32 / PCM16_NORMALIZE)
        .collect()
}

pub fn f32_to_mulaw(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&sample| encode_mulaw((sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16))
        .collect()
}

/// Encode one linear sample as G.711 μ-law
pub fn encode_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };

    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode one G.711 μ-law byte to a linear sample
pub fn decode_mulaw(byte: u8) -> i16 {
    let b = !byte as i32;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = b & 0x0F;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_silence() {
        assert_eq!(encode_mulaw(0), 0xFF);
        assert_eq!(decode_mulaw(0xFF), 0);
    }

    #[test]
    fn test_mulaw_sign_and_clip() {
        assert!(decode_mulaw(encode_mulaw(1000)) > 0);
        assert!(decode_mulaw(encode_mulaw(-1000)) < 0);

        // Extremes clip instead of wrapping
        assert!(decode_mulaw(encode_mulaw(i16::MAX)) > 30000);
        assert!(decode_mulaw(encode_mulaw(i16::MIN)) < -30000);
    }

    #[test]
    fn test_pcm16_odd_trailing_byte_ignored() {
        let samples = pcm16_to_f32(&[0x00, 0x40, 0x7F]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.5).abs() < 1e-4);
    }
}
