use log::{debug, warn};

use crate::error::{DecodeWarning, SampleError};

/// Field separator of the notification payload
pub const FIELD_DELIMITER: char = ',';

/// Minimum number of channels a sample needs before metrics can be derived
pub const REQUIRED_CHANNELS: usize = 4;

/// Channel values decoded from one notification, in payload order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSample {
    channels: Vec<f64>,
}

impl RawSample {
    pub fn new(channels: Vec<f64>) -> Self {
        RawSample { channels }
    }

    pub fn channels(&self) -> &[f64] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<f64> {
        self.channels.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Checks that the sample carries enough channels to derive metrics from.
    pub fn check_complete(&self) -> Result<(), SampleError> {
        match self.channels.len() {
            0 => Err(SampleError::Empty),
            n if n < REQUIRED_CHANNELS => Err(SampleError::Incomplete { channels: n }),
            _ => Ok(()),
        }
    }
}

/// Decode a notification payload, returning the skipped tokens alongside the sample.
///
/// The payload is ASCII text such as `"229.8, 0, 1520.5, 7.1"`. Each field is trimmed, empty
/// fields are ignored and fields that are not a finite decimal number become a
/// [`DecodeWarning`].
pub fn decode_with_warnings(payload: &[u8]) -> (RawSample, Vec<DecodeWarning>) {
    let text = String::from_utf8_lossy(payload);
    let mut channels = Vec::new();
    let mut warnings = Vec::new();

    for (index, token) in text.split(FIELD_DELIMITER).enumerate() {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        match token.parse::<f64>() {
            // NaN or inf would poison every average downstream
            Ok(value) if value.is_finite() => channels.push(value),
            _ => warnings.push(DecodeWarning::MalformedToken { index, token: token.to_string() }),
        }
    }

    (RawSample::new(channels), warnings)
}

/// Decode a notification payload. Never fails; malformed tokens are logged and skipped.
pub fn decode(payload: &[u8]) -> RawSample {
    let (sample, warnings) = decode_with_warnings(payload);

    for warning in &warnings {
        warn!("{}", warning);
    }
    debug!("Decoded {} channels from {} bytes", sample.len(), payload.len());

    sample
}
