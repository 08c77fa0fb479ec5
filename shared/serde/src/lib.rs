//! # Netsync Serde
//! Bit-level serialization used by the snapshot and input codecs.

mod bit_reader;
mod bit_writer;
mod error;
mod serde;

pub use bit_reader::BitReader;
pub use bit_writer::{BitWrite, BitWriter};
pub use error::SerdeErr;
pub use serde::Serde;
