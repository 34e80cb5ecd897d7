//! # OOB Metadata Record
//!
//! Every page the translation layer programs carries an 8-byte record at the
//! start of the page's 64-byte spare region. The record is what makes the
//! medium self-describing: mount rebuilds the whole logical-to-physical map
//! by reading nothing but these tags.
//!
//! ## Layout (8 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field    Description
//! ------  ----  -------  -------------------------------------
//! 0       4     magic    0xDEADBEEF identifies an FTL page
//! 4       4     lba      Logical address the payload belongs to
//! ```
//!
//! The remaining 56 spare bytes stay 0xFF. A page whose magic does not match
//! is not an error: it is how an unwritten (still-erased) page looks, and
//! the mount scan uses exactly that distinction to find the append frontier.
//!
//! Serialization is explicit through zerocopy little-endian fields; the host
//! struct layout is never written to the medium.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::Lba;

/// Tag identifying pages authored by the translation layer.
pub const FTL_MAGIC: u32 = 0xDEAD_BEEF;

/// Serialized size of the record inside the OOB region.
pub const META_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageMeta {
    magic: U32,
    lba: U32,
}

const _: () = assert!(std::mem::size_of::<PageMeta>() == META_SIZE);

impl PageMeta {
    pub fn new(lba: Lba) -> Self {
        Self {
            magic: U32::new(FTL_MAGIC),
            lba: U32::new(lba),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= META_SIZE,
            "buffer too small for PageMeta: {} < {}",
            bytes.len(),
            META_SIZE
        );

        Self::ref_from_bytes(&bytes[..META_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageMeta: {:?}", e))
    }

    /// True when the magic marks this page as FTL-authored.
    pub fn is_tagged(&self) -> bool {
        self.magic.get() == FTL_MAGIC
    }

    pub fn lba(&self) -> Lba {
        self.lba.get()
    }
}
