use crate::{BitReader, BitWrite, SerdeErr};

/// A type that can write itself into a bit stream and read itself back.
pub trait Serde: Sized {
    fn ser(&self, writer: &mut dyn BitWrite);
    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr>;
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bit()
    }
}

impl Serde for u8 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_byte(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_byte()
    }
}

macro_rules! impl_serde_uint {
    ($type:ty, $bytes:expr) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut dyn BitWrite) {
                for byte in self.to_le_bytes() {
                    writer.write_byte(byte);
                }
            }

            fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
                let mut bytes = [0u8; $bytes];
                for byte in bytes.iter_mut() {
                    *byte = reader.read_byte()?;
                }
                Ok(<$type>::from_le_bytes(bytes))
            }
        }
    };
}

impl_serde_uint!(u16, 2);
impl_serde_uint!(u32, 4);
impl_serde_uint!(u64, 8);

impl Serde for i64 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        (*self as u64).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(u64::de(reader)? as i64)
    }
}

impl Serde for f32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.to_bits().ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f32::from_bits(u32::de(reader)?))
    }
}

impl Serde for f64 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.to_bits().ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f64::from_bits(u64::de(reader)?))
    }
}

// Length-prefixed (u16) UTF-8. Object and variable names stay far below the
// 65535-byte ceiling.
impl Serde for String {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let bytes = self.as_bytes();
        debug_assert!(bytes.len() <= u16::MAX as usize);
        (bytes.len() as u16).ser(writer);
        for byte in bytes {
            writer.write_byte(*byte);
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = u16::de(reader)? as usize;
        let mut bytes = Vec::with_capacity(length);
        for _ in 0..length {
            bytes.push(reader.read_byte()?);
        }
        String::from_utf8(bytes).map_err(|_| SerdeErr::InvalidValue)
    }
}

impl Serde for Vec<u8> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        debug_assert!(self.len() <= u16::MAX as usize);
        (self.len() as u16).ser(writer);
        for byte in self {
            writer.write_byte(*byte);
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = u16::de(reader)? as usize;
        let mut bytes = Vec::with_capacity(length);
        for _ in 0..length {
            bytes.push(reader.read_byte()?);
        }
        Ok(bytes)
    }
}

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            Some(value) => {
                writer.write_bit(true);
                value.ser(writer);
            }
            None => writer.write_bit(false),
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        if reader.read_bit()? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }
}
