use std::fmt;

/// The error returned when a read runs off the end of the buffer or the
/// decoded content is not representable (e.g. invalid UTF-8 in a string).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerdeErr {
    /// The buffer does not contain enough bits to complete the read
    EndOfBuffer,
    /// The bits were read but do not decode to a valid value
    InvalidValue,
}

impl fmt::Display for SerdeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerdeErr::EndOfBuffer => write!(f, "bit buffer exhausted mid-read"),
            SerdeErr::InvalidValue => write!(f, "bits do not decode to a valid value"),
        }
    }
}

impl std::error::Error for SerdeErr {}
