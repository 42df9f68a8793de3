//! G.711 μ-law codec for the telephony bridge (§4.7), replacing Python's
//! `audioop.lin2ulaw`/`ulaw2lin` calls in `fastrtc/websocket.py`.

const BIAS: i16 = 0x84;
const CLIP: i16 = 32635;

/// Encode one linear PCM16 sample to a μ-law byte.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80u8 } else { 0 };
    let mut magnitude = if sample < 0 {
        sample.saturating_neg()
    } else {
        sample
    };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let exponent = exponent_lut(magnitude as u16);
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0f) as u8;
    let ulaw_byte = sign | (exponent << 4) | mantissa;
    !ulaw_byte
}

fn exponent_lut(magnitude: u16) -> u8 {
    const SEG_END: [u16; 8] = [0x3f, 0x7f, 0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff, 0x1fff];
    for (i, bound) in SEG_END.iter().enumerate() {
        if magnitude <= *bound {
            return i as u8;
        }
    }
    7
}

/// Decode one μ-law byte back to linear PCM16.
pub fn ulaw_to_linear(ulaw_byte: u8) -> i16 {
    let ulaw_byte = !ulaw_byte;
    let sign = ulaw_byte & 0x80;
    let exponent = (ulaw_byte >> 4) & 0x07;
    let mantissa = ulaw_byte & 0x0f;

    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent;
    sample -= BIAS;

    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Encode a buffer of PCM16 samples to μ-law bytes.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|s| linear_to_ulaw(*s)).collect()
}

/// Decode a buffer of μ-law bytes back to PCM16 samples.
pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|b| ulaw_to_linear(*b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_lossy_but_bounded() {
        for sample in [-32000i16, -1000, -1, 0, 1, 1000, 32000] {
            let encoded = linear_to_ulaw(sample);
            let decoded = ulaw_to_linear(encoded);
            let error = (decoded as i32 - sample as i32).abs();
            // mu-law quantization error grows with magnitude; bound loosely.
            assert!(error < 1100, "sample {sample} decoded to {decoded}, error {error}");
        }
    }

    #[test]
    fn silence_round_trips_near_exactly() {
        let encoded = linear_to_ulaw(0);
        let decoded = ulaw_to_linear(encoded);
        assert!(decoded.abs() <= 8);
    }

    #[test]
    fn encode_decode_buffers_preserve_length() {
        let samples: Vec<i16> = (-50..50).map(|v| v * 300).collect();
        let encoded = encode(&samples);
        let decoded = decode(&encoded);
        assert_eq!(encoded.len(), samples.len());
        assert_eq!(decoded.len(), samples.len());
    }

    #[test]
    fn sign_is_preserved() {
        assert!(ulaw_to_linear(linear_to_ulaw(5000)) > 0);
        assert!(ulaw_to_linear(linear_to_ulaw(-5000)) < 0);
    }
}
