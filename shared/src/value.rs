use netsync_serde::{BitReader, BitWrite, Serde, SerdeErr};

/// The replicated value of one tracked variable. The engine never
/// interprets these beyond equality; simulation meaning belongs to the
/// host.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum VarValue {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;

impl VarValue {
    fn tag(&self) -> u8 {
        match self {
            VarValue::Nil => TAG_NIL,
            VarValue::Bool(_) => TAG_BOOL,
            VarValue::Int(_) => TAG_INT,
            VarValue::Float(_) => TAG_FLOAT,
            VarValue::Str(_) => TAG_STR,
            VarValue::Bytes(_) => TAG_BYTES,
        }
    }
}

impl Serde for VarValue {
    fn ser(&self, writer: &mut dyn BitWrite) {
        // 3-bit tag, then the payload.
        let tag = self.tag();
        for i in 0..3 {
            writer.write_bit(tag & (1 << i) != 0);
        }
        match self {
            VarValue::Nil => {}
            VarValue::Bool(b) => b.ser(writer),
            VarValue::Int(i) => i.ser(writer),
            VarValue::Float(f) => f.ser(writer),
            VarValue::Str(s) => s.ser(writer),
            VarValue::Bytes(b) => b.ser(writer),
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut tag = 0u8;
        for i in 0..3 {
            if reader.read_bit()? {
                tag |= 1 << i;
            }
        }
        match tag {
            TAG_NIL => Ok(VarValue::Nil),
            TAG_BOOL => Ok(VarValue::Bool(bool::de(reader)?)),
            TAG_INT => Ok(VarValue::Int(i64::de(reader)?)),
            TAG_FLOAT => Ok(VarValue::Float(f64::de(reader)?)),
            TAG_STR => Ok(VarValue::Str(String::de(reader)?)),
            TAG_BYTES => Ok(VarValue::Bytes(Vec::<u8>::de(reader)?)),
            _ => Err(SerdeErr::InvalidValue),
        }
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Float(value)
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Str(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_serde::BitWriter;

    fn round_trip(value: VarValue) -> VarValue {
        let mut writer = BitWriter::new();
        value.ser(&mut writer);
        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        VarValue::de(&mut reader).unwrap()
    }

    #[test]
    fn all_variants_round_trip() {
        assert_eq!(round_trip(VarValue::Nil), VarValue::Nil);
        assert_eq!(round_trip(VarValue::Bool(true)), VarValue::Bool(true));
        assert_eq!(round_trip(VarValue::Int(-9000)), VarValue::Int(-9000));
        assert_eq!(round_trip(VarValue::Float(0.25)), VarValue::Float(0.25));
        assert_eq!(
            round_trip(VarValue::Str("door_open".into())),
            VarValue::Str("door_open".into())
        );
        assert_eq!(
            round_trip(VarValue::Bytes(vec![1, 2, 3])),
            VarValue::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn invalid_tag_is_rejected() {
        // Tag 7 (0b111) is unassigned.
        let bytes = [0b0000_0111u8];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(VarValue::de(&mut reader), Err(SerdeErr::InvalidValue));
    }
}
