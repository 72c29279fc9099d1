use super::{AudioDecoder, AudioEncoder, CodecFactory};
use crate::config::BridgeConfig;
use crate::error::AudioError;
use opus_rs::Application;

const OPUS_MAX_PACKET_BYTES: usize = 1_500;

/// Longest Opus packet duration (120 ms) at 48 kHz, per channel.
const MAX_DECODE_SAMPLES_PER_CHANNEL: usize = 5_760;

/// Builds Opus codec state from the bridge settings.
#[derive(Clone, Debug)]
pub struct OpusCodecFactory {
    sample_rate: u32,
    channels: u8,
    bitrate_bps: u32,
    complexity: u8,
    frame_samples: usize,
}

impl OpusCodecFactory {
    pub fn new(config: &BridgeConfig) -> Result<Self, AudioError> {
        if ![8_000, 12_000, 16_000, 24_000, 48_000].contains(&config.sample_rate) {
            return Err(AudioError::Init(format!(
                "unsupported sample rate {}",
                config.sample_rate
            )));
        }
        if config.channels == 0 || config.channels > 2 {
            return Err(AudioError::Init(format!(
                "unsupported channel count {}",
                config.channels
            )));
        }
        Ok(Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate_bps: config.opus_bitrate_bps,
            complexity: config.opus_complexity,
            frame_samples: config.egress_frame_samples,
        })
    }
}

impl CodecFactory for OpusCodecFactory {
    fn decoder(&self) -> Result<Box<dyn AudioDecoder>, AudioError> {
        Ok(Box::new(OpusDecoder::new(self.sample_rate, self.channels)?))
    }

    fn encoder(&self) -> Result<Box<dyn AudioEncoder>, AudioError> {
        Ok(Box::new(OpusEncoder::new(
            self.sample_rate,
            self.channels,
            self.bitrate_bps,
            self.complexity,
            self.frame_samples,
        )?))
    }
}

pub struct OpusDecoder {
    decoder: opus_rs::OpusDecoder,
    channels: usize,
    output: Vec<f32>,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self, AudioError> {
        let channels = channels as usize;
        let decoder = opus_rs::OpusDecoder::new(sample_rate as i32, channels)
            .map_err(|err| AudioError::Init(format!("create opus decoder failed: {err}")))?;
        Ok(Self {
            decoder,
            channels,
            output: vec![0.0; MAX_DECODE_SAMPLES_PER_CHANNEL * channels],
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, AudioError> {
        // The codec can panic on hostile input; contain it to this packet.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.decoder
                .decode(packet, MAX_DECODE_SAMPLES_PER_CHANNEL, &mut self.output)
        }));
        let samples = match result {
            Ok(Ok(per_channel)) => per_channel.saturating_mul(self.channels),
            Ok(Err(_)) => return Err(AudioError::Decode("opus decode error".into())),
            Err(_) => return Err(AudioError::Decode("opus decoder panicked".into())),
        };
        if samples == 0 || samples > self.output.len() {
            return Err(AudioError::Decode(format!("decoded {samples} samples")));
        }
        Ok(self.output[..samples]
            .iter()
            .map(|s| (*s * 32_767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect())
    }
}

pub struct OpusEncoder {
    encoder: opus_rs::OpusEncoder,
    channels: usize,
    input: Vec<f32>,
    packet: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(
        sample_rate: u32,
        channels: u8,
        bitrate_bps: u32,
        complexity: u8,
        frame_samples: usize,
    ) -> Result<Self, AudioError> {
        let channels = channels as usize;
        let application = if sample_rate <= 16_000 {
            Application::Voip
        } else {
            Application::Audio
        };
        let mut encoder = opus_rs::OpusEncoder::new(sample_rate as i32, channels, application)
            .map_err(|err| AudioError::Init(format!("create opus encoder failed: {err}")))?;
        encoder.bitrate_bps = bitrate_bps as i32;
        encoder.complexity = complexity as i32;
        encoder.use_cbr = false;
        Ok(Self {
            encoder,
            channels,
            input: vec![0.0; frame_samples],
            packet: vec![0; OPUS_MAX_PACKET_BYTES],
        })
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        if pcm.len() != self.input.len() {
            return Err(AudioError::Encode(format!(
                "expected {} samples, got {}",
                self.input.len(),
                pcm.len()
            )));
        }
        for (dst, src) in self.input.iter_mut().zip(pcm) {
            *dst = *src as f32 / 32_768.0;
        }
        let frame_size = self.input.len() / self.channels;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.encoder
                .encode(&self.input, frame_size, &mut self.packet)
        }));
        match result {
            Ok(Ok(len)) if len > 0 => Ok(self.packet[..len].to_vec()),
            Ok(Ok(_)) => Err(AudioError::Encode("empty opus packet".into())),
            Ok(Err(_)) => Err(AudioError::Encode("opus encode error".into())),
            Err(_) => Err(AudioError::Encode("opus encoder panicked".into())),
        }
    }
}
