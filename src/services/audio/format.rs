//! Audio sample formats and format negotiation.

/// Sample encoding of one channel of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit little endian
    S16LE,
    /// Signed 24-bit little endian, 4-byte container
    S24LE,
    /// Signed 32-bit little endian
    S32LE,
}

impl SampleFormat {
    /// Bytes occupied by one sample.
    pub fn sample_bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16LE => 2,
            SampleFormat::S24LE | SampleFormat::S32LE => 4,
        }
    }
}

/// An audio format: rate, channel count and sample encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    /// Frames per second.
    pub frame_rate: u32,
    /// Samples per frame.
    pub num_channels: usize,
    /// Sample encoding.
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Creates a format.
    pub fn new(frame_rate: u32, num_channels: usize, sample_format: SampleFormat) -> Self {
        Self {
            frame_rate,
            num_channels,
            sample_format,
        }
    }

    /// Bytes occupied by one frame.
    pub fn frame_bytes(&self) -> usize {
        self.num_channels * self.sample_format.sample_bytes()
    }
}

/// The rates, channel counts and sample encodings a backend can serve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedFormats {
    /// Supported frame rates.
    pub rates: Vec<u32>,
    /// Supported channel counts.
    pub channel_counts: Vec<usize>,
    /// Supported sample encodings.
    pub sample_formats: Vec<SampleFormat>,
}

impl SupportedFormats {
    /// Chooses the hardware format for a requested format.
    ///
    /// Each dimension uses the requested value when the backend supports
    /// it. A missing rate falls back to the closest supported rate; a
    /// missing channel count or encoding falls back to the backend's first
    /// choice. Conversion toward the caller's format happens in the
    /// per-stream mixer layer, so the external format stays at the request.
    pub fn negotiate(&self, requested: &AudioFormat) -> AudioFormat {
        let frame_rate = if self.rates.contains(&requested.frame_rate) {
            requested.frame_rate
        } else {
            self.closest_rate(requested.frame_rate)
        };

        let num_channels = if self.channel_counts.contains(&requested.num_channels) {
            requested.num_channels
        } else {
            self.channel_counts
                .first()
                .copied()
                .unwrap_or(requested.num_channels)
        };

        let sample_format = if self.sample_formats.contains(&requested.sample_format) {
            requested.sample_format
        } else {
            self.sample_formats
                .first()
                .copied()
                .unwrap_or(requested.sample_format)
        };

        AudioFormat {
            frame_rate,
            num_channels,
            sample_format,
        }
    }

    fn closest_rate(&self, requested: u32) -> u32 {
        self.rates
            .iter()
            .copied()
            .min_by_key(|r| r.abs_diff(requested))
            .unwrap_or(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported() -> SupportedFormats {
        SupportedFormats {
            rates: vec![44_100, 48_000, 96_000],
            channel_counts: vec![2, 6],
            sample_formats: vec![SampleFormat::S16LE, SampleFormat::S32LE],
        }
    }

    #[test]
    fn exact_match_kept() {
        let req = AudioFormat::new(48_000, 2, SampleFormat::S16LE);
        assert_eq!(supported().negotiate(&req), req);
    }

    #[test]
    fn unsupported_rate_falls_to_closest() {
        let req = AudioFormat::new(47_000, 2, SampleFormat::S16LE);
        let hw = supported().negotiate(&req);
        assert_eq!(hw.frame_rate, 48_000);
    }

    #[test]
    fn unsupported_channels_fall_to_backend_first() {
        let req = AudioFormat::new(48_000, 4, SampleFormat::S16LE);
        let hw = supported().negotiate(&req);
        assert_eq!(hw.num_channels, 2);
    }

    #[test]
    fn unsupported_encoding_falls_to_backend_first() {
        let req = AudioFormat::new(48_000, 2, SampleFormat::U8);
        let hw = supported().negotiate(&req);
        assert_eq!(hw.sample_format, SampleFormat::S16LE);
    }

    #[test]
    fn empty_lists_keep_request() {
        let req = AudioFormat::new(8_000, 1, SampleFormat::S16LE);
        assert_eq!(SupportedFormats::default().negotiate(&req), req);
    }

    #[test]
    fn frame_bytes() {
        assert_eq!(AudioFormat::new(48_000, 2, SampleFormat::S16LE).frame_bytes(), 4);
        assert_eq!(AudioFormat::new(48_000, 6, SampleFormat::S32LE).frame_bytes(), 24);
    }
}
