use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SampleFormat, SizedSample, StreamConfig,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{Fetch, SampleSource};
use crate::{config::CaptureConfig, Result, StripError};

/// How many blocks of backlog are kept before the oldest samples are dropped.
const MAX_BACKLOG_BLOCKS: usize = 4;

/// Default input device, downmixed to mono.
///
/// The stream lives on the thread that opened it and stops when this value
/// is dropped.
pub struct CpalCapture {
    _stream: cpal::Stream,
    samples: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    timeout: Duration,
}

impl CpalCapture {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| StripError::audio("no input device available"))?;
        let supported = device
            .default_input_config()
            .map_err(|err| StripError::audio(format!("failed to query input config: {err}")))?;

        let requested = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let (sender, samples) = crossbeam_channel::unbounded();
        let format = supported.sample_format();

        let stream = match build_stream(&device, &requested, format, sender.clone()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, rate = config.sample_rate, "falling back to device sample rate");
                build_stream(&device, &supported.config(), format, sender)?
            }
        };
        stream
            .play()
            .map_err(|err| StripError::audio(format!("failed to start capture: {err}")))?;

        let name = device.name().unwrap_or_else(|_| "input".into());
        tracing::info!(device = %name, "capturing audio");
        Ok(Self {
            _stream: stream,
            samples,
            pending: Vec::new(),
            timeout: config.read_timeout(),
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    sender: Sender<Vec<f32>>,
) -> Result<cpal::Stream> {
    match format {
        SampleFormat::F32 => build_typed::<f32>(device, config, sender),
        SampleFormat::I16 => build_typed::<i16>(device, config, sender),
        SampleFormat::U16 => build_typed::<u16>(device, config, sender),
        other => Err(StripError::audio(format!("unsupported sample format {other}"))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sender: Sender<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = data
                    .chunks_exact(channels)
                    .map(|frame| {
                        frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / channels as f32
                    })
                    .collect();
                let _ = sender.send(mono);
            },
            |err| tracing::warn!(%err, "audio capture error"),
            None,
        )
        .map_err(|err| StripError::audio(format!("failed to open input stream: {err}")))
}

impl SampleSource for CpalCapture {
    fn read_block(&mut self, len: usize) -> Result<Fetch<Vec<f32>>> {
        while self.pending.len() < len {
            match self.samples.recv_timeout(self.timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(Fetch::Pending),
                Err(RecvTimeoutError::Disconnected) => return Ok(Fetch::Ended),
            }
        }

        let backlog = len * MAX_BACKLOG_BLOCKS;
        if self.pending.len() > backlog {
            let excess = self.pending.len() - backlog;
            self.pending.drain(..excess);
        }
        Ok(Fetch::Ready(self.pending.drain(..len).collect()))
    }
}
