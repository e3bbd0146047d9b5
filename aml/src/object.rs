use crate::{context::ObjRef, AmlError};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use core::{cmp::Ordering, fmt, fmt::Write};

/// A data object produced or consumed by AML. Objects that are part of the namespace's structure (devices,
/// methods, scopes) are represented by entities instead, and are only ever referred to by [`ObjRef`].
#[derive(Clone, PartialEq, Debug)]
pub enum AmlValue {
    Uninitialized,
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<AmlValue>),
    Reference(ObjRef),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectType {
    Uninitialized,
    Integer,
    String,
    Buffer,
    Package,
    Reference,
    Device,
    Method,
    PowerResource,
    Processor,
    ThermalZone,
    Debug,
}

impl ObjectType {
    /// Integers, strings and buffers, which can be implicitly converted between each other and compared.
    pub fn is_data(self) -> bool {
        matches!(self, ObjectType::Integer | ObjectType::String | ObjectType::Buffer)
    }
}

/// The width of AML integers. This is controlled by the revision of the DSDT: tables with a revision lower
/// than 2 use 32-bit integers, and the results of all integer operations are truncated to fit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntegerWidth {
    Bits32,
    Bits64,
}

impl IntegerWidth {
    pub fn from_revision(revision: u8) -> IntegerWidth {
        if revision >= 2 {
            IntegerWidth::Bits64
        } else {
            IntegerWidth::Bits32
        }
    }

    pub fn bits(self) -> usize {
        match self {
            IntegerWidth::Bits32 => 32,
            IntegerWidth::Bits64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() / 8
    }

    /// The value of `Ones` at this width, which is also used as the logical `True`.
    pub fn ones(self) -> u64 {
        match self {
            IntegerWidth::Bits32 => u32::MAX as u64,
            IntegerWidth::Bits64 => u64::MAX,
        }
    }

    pub fn mask(self, value: u64) -> u64 {
        value & self.ones()
    }
}

impl AmlValue {
    pub fn typ(&self) -> ObjectType {
        match self {
            AmlValue::Uninitialized => ObjectType::Uninitialized,
            AmlValue::Integer(_) => ObjectType::Integer,
            AmlValue::String(_) => ObjectType::String,
            AmlValue::Buffer(_) => ObjectType::Buffer,
            AmlValue::Package(_) => ObjectType::Package,
            AmlValue::Reference(_) => ObjectType::Reference,
        }
    }

    pub fn as_integer(&self) -> Result<u64, AmlError> {
        if let AmlValue::Integer(value) = self {
            Ok(*value)
        } else {
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: self.typ() })
        }
    }

    /// Implicitly convert this value to an integer of the given width. Strings are interpreted as hexadecimal,
    /// and buffers as little-endian.
    pub fn to_integer(&self, width: IntegerWidth) -> Result<u64, AmlError> {
        match self {
            AmlValue::Integer(value) => Ok(width.mask(*value)),
            AmlValue::Buffer(bytes) => {
                let length = usize::min(bytes.len(), width.bytes());
                let mut padded = [0u8; 8];
                padded[..length].copy_from_slice(&bytes[..length]);
                Ok(LittleEndian::read_u64(&padded))
            }
            AmlValue::String(string) => parse_hex(string, width),
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: ObjectType::Integer }),
        }
    }

    pub fn to_buffer(&self, width: IntegerWidth) -> Result<Vec<u8>, AmlError> {
        match self {
            AmlValue::Buffer(bytes) => Ok(bytes.clone()),
            AmlValue::Integer(value) => {
                let mut bytes = [0u8; 8];
                LittleEndian::write_u64(&mut bytes, *value);
                Ok(bytes[..width.bytes()].to_vec())
            }
            AmlValue::String(string) if string.is_empty() => Err(AmlError::ConversionFromEmptyString),
            AmlValue::String(string) => {
                // The null terminator is part of the converted buffer
                let mut bytes = string.as_bytes().to_vec();
                bytes.push(0);
                Ok(bytes)
            }
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: ObjectType::Buffer }),
        }
    }

    pub fn to_aml_string(&self, width: IntegerWidth) -> Result<String, AmlError> {
        match self {
            AmlValue::String(string) => Ok(string.clone()),
            AmlValue::Integer(value) => Ok(format!("{:0digits$X}", width.mask(*value), digits = width.bits() / 4)),
            AmlValue::Buffer(bytes) => {
                let mut string = String::with_capacity(bytes.len() * 3);
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        string.push(' ');
                    }
                    write!(string, "{byte:02X}").map_err(|_| AmlError::IncompatibleConversion {
                        from: ObjectType::Buffer,
                        to: ObjectType::String,
                    })?;
                }
                Ok(string)
            }
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: ObjectType::String }),
        }
    }

    /// Convert this value to `target`, following the implicit conversion rules of §19.3.5 of the ACPI
    /// specification. Converting from an empty string is always an error, even to `ObjectType::String`.
    pub fn convert(&self, target: ObjectType, width: IntegerWidth) -> Result<AmlValue, AmlError> {
        if matches!(self, AmlValue::String(string) if string.is_empty()) {
            return Err(AmlError::ConversionFromEmptyString);
        }

        if self.typ() == target {
            return Ok(self.clone());
        }

        match target {
            ObjectType::Integer => self.to_integer(width).map(AmlValue::Integer),
            ObjectType::String => self.to_aml_string(width).map(AmlValue::String),
            ObjectType::Buffer => self.to_buffer(width).map(AmlValue::Buffer),
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: target }),
        }
    }

    /// Compare two values. The type of `self` decides how the comparison is made, and `other` is implicitly
    /// converted to it. Only integers, strings and buffers can be compared.
    pub fn compare(&self, other: &AmlValue, width: IntegerWidth) -> Result<Ordering, AmlError> {
        let typ = self.typ();
        for operand in [typ, other.typ()] {
            if !operand.is_data() {
                return Err(AmlError::InvalidComparisonType(operand));
            }
        }

        let converted;
        let other = if other.typ() == typ {
            other
        } else {
            converted = other.convert(typ, width)?;
            &converted
        };

        match (self, other) {
            (AmlValue::Integer(a), AmlValue::Integer(b)) => Ok(width.mask(*a).cmp(&width.mask(*b))),
            (AmlValue::String(a), AmlValue::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (AmlValue::Buffer(a), AmlValue::Buffer(b)) => Ok(a.as_slice().cmp(b.as_slice())),
            _ => Err(AmlError::InvalidComparisonType(other.typ())),
        }
    }

    /// The result of `ToHexString`. Unlike the implicit conversion, integers are prefixed with `0x` and buffers
    /// are comma-separated.
    pub fn to_hex_string(&self, width: IntegerWidth) -> Result<String, AmlError> {
        match self {
            AmlValue::String(string) if string.is_empty() => Err(AmlError::ConversionFromEmptyString),
            AmlValue::String(string) => Ok(string.clone()),
            AmlValue::Integer(value) => Ok(format!("0x{:X}", width.mask(*value))),
            AmlValue::Buffer(bytes) => {
                Ok(bytes.iter().map(|byte| format!("0x{byte:02X}")).collect::<Vec<_>>().join(","))
            }
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: ObjectType::String }),
        }
    }

    pub fn to_decimal_string(&self, width: IntegerWidth) -> Result<String, AmlError> {
        match self {
            AmlValue::String(string) if string.is_empty() => Err(AmlError::ConversionFromEmptyString),
            AmlValue::String(string) => Ok(string.clone()),
            AmlValue::Integer(value) => Ok(width.mask(*value).to_string()),
            AmlValue::Buffer(bytes) => Ok(bytes.iter().map(|byte| byte.to_string()).collect::<Vec<_>>().join(",")),
            _ => Err(AmlError::IncompatibleConversion { from: self.typ(), to: ObjectType::String }),
        }
    }
}

/// Parse the hexadecimal prefix of `string`, with an optional `0x`. Parsing stops at the first character that
/// isn't a hex digit, or once enough digits to fill an integer of the given width have been read.
fn parse_hex(string: &str, width: IntegerWidth) -> Result<u64, AmlError> {
    if string.is_empty() {
        return Err(AmlError::ConversionFromEmptyString);
    }

    let digits = string.strip_prefix("0x").or_else(|| string.strip_prefix("0X")).unwrap_or(string);
    Ok(digits
        .chars()
        .map_while(|c| c.to_digit(16))
        .take(width.bits() / 4)
        .fold(0u64, |value, digit| (value << 4) | digit as u64))
}

/// Parse a string as `ToInteger` does: hexadecimal if it has a `0x` prefix, decimal otherwise.
pub(crate) fn parse_explicit(string: &str, width: IntegerWidth) -> Result<u64, AmlError> {
    if string.is_empty() {
        return Err(AmlError::ConversionFromEmptyString);
    }

    if string.starts_with("0x") || string.starts_with("0X") {
        return parse_hex(string, width);
    }

    let value = string
        .chars()
        .map_while(|c| c.to_digit(10))
        .fold(0u64, |value, digit| value.wrapping_mul(10).wrapping_add(digit as u64));
    Ok(width.mask(value))
}

impl fmt::Display for AmlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmlValue::Uninitialized => write!(f, "[Uninitialized]"),
            AmlValue::Integer(value) => write!(f, "Integer({value:#x})"),
            AmlValue::String(value) => write!(f, "String({value:?})"),
            AmlValue::Buffer(bytes) => write!(f, "Buffer({bytes:x?})"),
            AmlValue::Package(elements) => {
                write!(f, "Package {{ ")?;
                for (i, element) in elements.iter().enumerate() {
                    if i == elements.len() - 1 {
                        write!(f, "{element}")?;
                    } else {
                        write!(f, "{element}, ")?;
                    }
                }
                write!(f, " }}")
            }
            AmlValue::Reference(target) => write!(f, "Reference({target:?})"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MethodFlags(pub u8);

impl MethodFlags {
    pub fn new(arg_count: u8, serialize: bool, sync_level: u8) -> MethodFlags {
        let mut flags = 0;
        flags.set_bits(0..3, arg_count);
        flags.set_bit(3, serialize);
        flags.set_bits(4..8, sync_level);
        MethodFlags(flags)
    }

    pub fn arg_count(&self) -> usize {
        self.0.get_bits(0..3) as usize
    }

    pub fn serialize(&self) -> bool {
        self.0.get_bit(3)
    }

    pub fn sync_level(&self) -> u8 {
        self.0.get_bits(4..8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const W32: IntegerWidth = IntegerWidth::Bits32;
    const W64: IntegerWidth = IntegerWidth::Bits64;

    fn string(s: &str) -> AmlValue {
        AmlValue::String(s.to_string())
    }

    #[test]
    fn integer_width() {
        assert_eq!(IntegerWidth::from_revision(0), W32);
        assert_eq!(IntegerWidth::from_revision(1), W32);
        assert_eq!(IntegerWidth::from_revision(2), W64);
        assert_eq!(W32.ones(), 0xffff_ffff);
        assert_eq!(W32.mask(0x1_2345_6789), 0x2345_6789);
        assert_eq!(W64.mask(0x1_2345_6789), 0x1_2345_6789);
    }

    #[test]
    fn method_flags() {
        let flags = MethodFlags::new(3, true, 0xf);
        assert_eq!(flags.arg_count(), 3);
        assert!(flags.serialize());
        assert_eq!(flags.sync_level(), 0xf);
        assert_eq!(MethodFlags(0x02).arg_count(), 2);
    }

    #[test]
    fn empty_string_never_converts() {
        for target in [ObjectType::Integer, ObjectType::String, ObjectType::Buffer, ObjectType::Package] {
            assert_eq!(string("").convert(target, W64), Err(AmlError::ConversionFromEmptyString));
        }
    }

    #[test]
    fn same_type_is_identity() {
        assert_eq!(AmlValue::Integer(0x1_0000_0000).convert(ObjectType::Integer, W32), Ok(AmlValue::Integer(0x1_0000_0000)));
        assert_eq!(string("foo").convert(ObjectType::String, W64), Ok(string("foo")));
        assert_eq!(AmlValue::Buffer(vec![]).convert(ObjectType::Buffer, W64), Ok(AmlValue::Buffer(vec![])));
    }

    #[test]
    fn string_to_integer() {
        assert_eq!(string("ff").convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0xff)));
        assert_eq!(string("0x1234abcd").convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0x1234_abcd)));
        assert_eq!(string("12zz").convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0x12)));
        assert_eq!(string("zz").convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0)));
        assert_eq!(string("123456789").convert(ObjectType::Integer, W32), Ok(AmlValue::Integer(0x1234_5678)));
    }

    #[test]
    fn integer_to_buffer_and_string() {
        assert_eq!(
            AmlValue::Integer(0x0102_0304).convert(ObjectType::Buffer, W32),
            Ok(AmlValue::Buffer(vec![0x04, 0x03, 0x02, 0x01]))
        );
        assert_eq!(
            AmlValue::Integer(0x0102_0304).convert(ObjectType::Buffer, W64),
            Ok(AmlValue::Buffer(vec![0x04, 0x03, 0x02, 0x01, 0, 0, 0, 0]))
        );
        assert_eq!(AmlValue::Integer(0xbeef).convert(ObjectType::String, W32), Ok(string("0000BEEF")));
        assert_eq!(AmlValue::Integer(0xbeef).convert(ObjectType::String, W64), Ok(string("000000000000BEEF")));
    }

    #[test]
    fn buffer_conversions() {
        let buffer = AmlValue::Buffer(vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(buffer.convert(ObjectType::Integer, W32), Ok(AmlValue::Integer(0x0403_0201)));
        assert_eq!(buffer.convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0x05_0403_0201)));
        assert_eq!(AmlValue::Buffer(vec![]).convert(ObjectType::Integer, W64), Ok(AmlValue::Integer(0)));
        assert_eq!(buffer.convert(ObjectType::String, W64), Ok(string("01 02 03 04 05")));
        assert_eq!(string("AB").convert(ObjectType::Buffer, W64), Ok(AmlValue::Buffer(vec![b'A', b'B', 0])));
    }

    #[test]
    fn incompatible_conversions() {
        assert_eq!(
            AmlValue::Package(vec![]).convert(ObjectType::Integer, W64),
            Err(AmlError::IncompatibleConversion { from: ObjectType::Package, to: ObjectType::Integer })
        );
        assert_eq!(
            AmlValue::Integer(4).convert(ObjectType::Package, W64),
            Err(AmlError::IncompatibleConversion { from: ObjectType::Integer, to: ObjectType::Package })
        );
    }

    #[test]
    fn comparisons() {
        assert_eq!(AmlValue::Integer(1).compare(&AmlValue::Integer(2), W64), Ok(Ordering::Less));
        assert_eq!(AmlValue::Integer(0x10).compare(&string("10"), W64), Ok(Ordering::Equal));
        assert_eq!(string("abc").compare(&string("abd"), W64), Ok(Ordering::Less));
        assert_eq!(string("").compare(&string(""), W64), Ok(Ordering::Equal));
        assert_eq!(
            AmlValue::Buffer(vec![0x34, 0x12, 0, 0]).compare(&AmlValue::Integer(0x1234), W32),
            Ok(Ordering::Equal)
        );
        assert_eq!(
            AmlValue::Package(vec![]).compare(&AmlValue::Integer(0), W64),
            Err(AmlError::InvalidComparisonType(ObjectType::Package))
        );
        assert_eq!(AmlValue::Integer(0).compare(&string(""), W64), Err(AmlError::ConversionFromEmptyString));
        assert_eq!(
            AmlValue::Integer(0).compare(&AmlValue::Package(vec![]), W64),
            Err(AmlError::InvalidComparisonType(ObjectType::Package))
        );
    }

    #[test]
    fn explicit_strings() {
        assert_eq!(parse_explicit("1234", W64), Ok(1234));
        assert_eq!(parse_explicit("0x1234", W64), Ok(0x1234));
        assert_eq!(AmlValue::Integer(0xab).to_hex_string(W64), Ok("0xAB".to_string()));
        assert_eq!(AmlValue::Buffer(vec![1, 0xab]).to_hex_string(W64), Ok("0x01,0xAB".to_string()));
        assert_eq!(AmlValue::Buffer(vec![1, 0xab]).to_decimal_string(W64), Ok("1,171".to_string()));
        assert_eq!(AmlValue::Integer(42).to_decimal_string(W64), Ok("42".to_string()));
    }
}
