use crate::AmlError;
use byteorder::{ByteOrder, LittleEndian};
use core::{fmt, str};
use log::warn;

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Signature([u8; 4]);

impl Signature {
    pub const DSDT: Signature = Signature(*b"DSDT");
    pub const SSDT: Signature = Signature(*b"SSDT");

    pub const fn new(signature: [u8; 4]) -> Signature {
        Signature(signature)
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.as_str())
    }
}

/// All SDTs share the same header, and are `length` bytes long. The signature tells us which SDT
/// this is.
#[derive(Clone, Copy, Debug)]
pub struct SdtHeader {
    pub signature: Signature,
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

impl SdtHeader {
    pub const LENGTH: usize = 36;

    /// Decode the header at the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<SdtHeader, AmlError> {
        if bytes.len() < Self::LENGTH {
            return Err(AmlError::InvalidTableHeader);
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&bytes[0..4]);
        let mut oem_id = [0u8; 6];
        oem_id.copy_from_slice(&bytes[10..16]);
        let mut oem_table_id = [0u8; 8];
        oem_table_id.copy_from_slice(&bytes[16..24]);

        Ok(SdtHeader {
            signature: Signature(signature),
            length: LittleEndian::read_u32(&bytes[4..8]),
            revision: bytes[8],
            checksum: bytes[9],
            oem_id,
            oem_table_id,
            oem_revision: LittleEndian::read_u32(&bytes[24..28]),
            creator_id: LittleEndian::read_u32(&bytes[28..32]),
            creator_revision: LittleEndian::read_u32(&bytes[32..36]),
        })
    }
}

/// A table containing AML: its header, and the bytecode that follows it.
#[derive(Clone, Copy, Debug)]
pub struct AmlTable<'a> {
    pub header: SdtHeader,
    pub stream: &'a [u8],
}

impl<'a> AmlTable<'a> {
    /// Split a raw table into its header and AML stream. The length in the header must cover at least the
    /// header itself, and no more than the bytes provided. Firmware ships tables with bad checksums often
    /// enough that a mismatch is only reported.
    pub fn new(bytes: &'a [u8]) -> Result<AmlTable<'a>, AmlError> {
        let header = SdtHeader::from_bytes(bytes)?;
        let length = header.length as usize;
        if length < SdtHeader::LENGTH || length > bytes.len() {
            return Err(AmlError::InvalidTableHeader);
        }

        let sum = bytes[..length].iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
        if sum != 0 {
            warn!("Table {} has an invalid checksum", header.signature);
        }

        Ok(AmlTable { header, stream: &bytes[SdtHeader::LENGTH..length] })
    }
}

/// Provides the raw bytes of the ACPI tables the interpreter loads, including their headers.
pub trait TableResolver: Send {
    fn lookup_table(&self, signature: Signature) -> Option<&[u8]>;
}
