//! Single-utterance audio capture for server-side recognition.

use crate::error::SpeechError;
use std::io::Cursor;
use std::time::Duration;

/// Sample rate expected by the short-audio recognition endpoint.
pub const RECOGNITION_SAMPLE_RATE: u32 = 16_000;

/// Mono 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl CapturedAudio {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encodes the audio as a RIFF/WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>, SpeechError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buffer = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut buffer), spec)
                .map_err(|e| SpeechError::Audio(format!("failed to start WAV encoding: {e}")))?;
            for sample in &self.samples {
                writer
                    .write_sample(*sample)
                    .map_err(|e| SpeechError::Audio(format!("failed to encode sample: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| SpeechError::Audio(format!("failed to finish WAV encoding: {e}")))?;
        }
        Ok(buffer)
    }
}

/// Captures one spoken utterance. Blocking.
pub trait AudioSource: Send + Sync {
    fn capture_utterance(&self) -> Result<CapturedAudio, SpeechError>;
}

/// Audio source for builds without microphone support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSource;

impl AudioSource for UnavailableSource {
    fn capture_utterance(&self) -> Result<CapturedAudio, SpeechError> {
        Err(SpeechError::Audio(
            "no audio input device is available to this server".to_string(),
        ))
    }
}

/// When to stop listening.
#[derive(Debug, Clone, Copy)]
pub struct UtteranceLimits {
    /// Give up if nobody starts speaking within this window.
    pub initial_silence: Duration,
    /// End the utterance after this much silence following speech.
    pub trailing_silence: Duration,
    /// Hard cap on the utterance length.
    pub max_duration: Duration,
    /// RMS level above which a chunk counts as speech.
    pub speech_threshold: f32,
}

impl Default for UtteranceLimits {
    fn default() -> Self {
        Self {
            initial_silence: Duration::from_secs(5),
            trailing_silence: Duration::from_millis(800),
            max_duration: Duration::from_secs(15),
            speech_threshold: 0.01,
        }
    }
}

/// Energy-based end-of-utterance detection over streamed chunks.
#[derive(Debug)]
pub struct UtteranceDetector {
    limits: UtteranceLimits,
    sample_rate: u32,
    heard_speech: bool,
    silent_samples: u64,
    total_samples: u64,
}

fn rms(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum: f32 = chunk.iter().map(|s| s * s).sum();
    (sum / chunk.len() as f32).sqrt()
}

fn samples_for(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * f64::from(sample_rate)) as u64
}

impl UtteranceDetector {
    pub fn new(limits: UtteranceLimits, sample_rate: u32) -> Self {
        Self {
            limits,
            sample_rate,
            heard_speech: false,
            silent_samples: 0,
            total_samples: 0,
        }
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Feeds a mono chunk. Returns `true` once the utterance is over.
    pub fn push(&mut self, chunk: &[f32]) -> bool {
        let len = chunk.len() as u64;
        self.total_samples += len;
        if rms(chunk) >= self.limits.speech_threshold {
            self.heard_speech = true;
            self.silent_samples = 0;
        } else {
            self.silent_samples += len;
        }

        if self.total_samples >= samples_for(self.limits.max_duration, self.sample_rate) {
            return true;
        }
        if self.heard_speech {
            self.silent_samples >= samples_for(self.limits.trailing_silence, self.sample_rate)
        } else {
            self.silent_samples >= samples_for(self.limits.initial_silence, self.sample_rate)
        }
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Converts float samples in [-1, 1] to 16-bit PCM, clamping out-of-range values.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect()
}

/// Captures from the host's default input device.
#[cfg(feature = "microphone")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneSource {
    limits: UtteranceLimits,
}

#[cfg(feature = "microphone")]
impl MicrophoneSource {
    pub fn new(limits: UtteranceLimits) -> Self {
        Self { limits }
    }
}

#[cfg(feature = "microphone")]
impl AudioSource for MicrophoneSource {
    fn capture_utterance(&self) -> Result<CapturedAudio, SpeechError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use std::sync::mpsc;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SpeechError::Audio("no default input device".into()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| SpeechError::Audio(format!("no default input config: {e}")))?;

        let native_rate = supported.sample_rate();
        let channels = supported.channels();
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(SpeechError::Audio(format!(
                "recognition requires f32 input (got {:?})",
                supported.sample_format()
            )));
        }
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Receiver gone means capture already finished.
                    let _ = tx.send(downmix(data, channels));
                },
                move |err| {
                    tracing::error!("recognition input stream error: {err}");
                },
                None,
            )
            .map_err(|e| SpeechError::Audio(format!("failed to build input stream: {e}")))?;
        stream
            .play()
            .map_err(|e| SpeechError::Audio(format!("failed to start input stream: {e}")))?;

        let mut detector = UtteranceDetector::new(self.limits, native_rate);
        let mut recorded = Vec::new();
        let deadline = std::time::Instant::now() + self.limits.max_duration;
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => {
                    let done = detector.push(&chunk);
                    recorded.extend(chunk);
                    if done {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(stream);

        tracing::debug!(
            samples = recorded.len(),
            native_rate,
            heard_speech = detector.heard_speech(),
            "captured utterance"
        );

        let resampled = resample(&recorded, native_rate, RECOGNITION_SAMPLE_RATE);
        Ok(CapturedAudio {
            samples: to_pcm16(&resampled),
            sample_rate: RECOGNITION_SAMPLE_RATE,
        })
    }
}
