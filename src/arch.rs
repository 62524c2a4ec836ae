//! Architecture abstraction.
//!
//! This module defines the `Architecture` trait, which encapsulates all
//! architecture-specific patch arithmetic. The core linker stays generic;
//! the backend decides how a reference's address type maps onto instruction
//! bits.

use anyhow::Result;

use crate::atom::AddressType;

pub mod arm;

/// A trait representing a target architecture.
pub trait Architecture {
    /// Applies a relocation to a procedure's code.
    ///
    /// # Arguments
    /// * `address_type` - The relocation encoding recorded on the reference.
    /// * `offset` - The offset within `code` where the patch is applied.
    /// * `p` - The absolute address of the patch site.
    /// * `s` - The absolute address of the target.
    /// * `code` - The mutable code block being patched.
    fn apply_relocation(
        &self,
        address_type: AddressType,
        offset: u32,
        p: u32,
        s: u32,
        code: &mut [u8],
    ) -> Result<()>;
}
