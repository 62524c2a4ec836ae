//! Binary object-file reader.
//!
//! Deserializes the atom container format:
//! 1. Header: magic `"atom"`, a version number, the optional load origin.
//! 2. Atom records until the end of the stream.
//!
//! Every multi-byte integer is little-endian. Validation is exact: each
//! truncation point reports the field that was being read, and reference
//! records are checked for overlapping patch intervals as they are parsed.

use anyhow::{anyhow, bail, Result};
use std::io::Read;

use crate::atom::{AddressType, Atom, AtomBody, AtomId, AtomKind, ObjectFile, RefTarget, Reference};

pub const MAGIC: &[u8; 4] = b"atom";
pub const VERSION: u16 = 1;

/// Read an object file from a stream.
///
/// The stream is consumed to its end; atoms repeat until the bytes run out.
pub fn read<R: Read>(reader: &mut R) -> Result<ObjectFile> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|err| anyhow!("Failed to read the object file stream: {err}"))?;
    parse(&data)
}

/// Parse an object file from an in-memory byte slice.
pub fn parse(data: &[u8]) -> Result<ObjectFile> {
    let mut cursor = Cursor { data, pos: 0 };

    let magic = cursor.take(4, "the magic number")?;
    if magic != MAGIC {
        bail!("Invalid magic number.");
    }
    let version = cursor.read_u16("the 16 bit version number")?;
    if version != VERSION {
        bail!("Unsupported object file version 0x{version:04X}.");
    }

    let origin_set = cursor.read_bool("'origin set' bool")?;
    let origin = cursor.read_u32("the 32 bit number for the origin")?;
    cursor.take(4, "the reserved block")?;

    let mut file = ObjectFile {
        atoms: Vec::new(),
        origin: origin_set.then_some(origin),
    };
    while !cursor.at_end() {
        let atom = read_atom(&mut cursor, &file.atoms)?;
        file.atoms.push(atom);
    }
    Ok(file)
}

fn read_atom(cursor: &mut Cursor<'_>, atoms: &[Atom]) -> Result<Atom> {
    let type_byte = cursor.read_u8("the atom type byte")?;
    let kind = AtomKind::from_type_byte(type_byte)
        .ok_or_else(|| anyhow!("Invalid atom type 0x{type_byte:02X}."))?;
    let is_defined = cursor.read_bool("'is defined' bool")?;
    let is_global = cursor.read_bool("'is global' bool")?;
    let name = cursor.read_cstr("a name terminated by a zero byte")?;

    let body = match kind {
        AtomKind::Procedure => read_procedure_body(cursor, atoms, &name)?,
        AtomKind::NullTerminatedString => AtomBody::NullTerminatedString {
            content: cursor.read_cstr("a string terminated by a zero byte")?,
        },
        AtomKind::Data => {
            let size = cursor.read_u32("the 32 bit number for data size")?;
            AtomBody::Data {
                content: cursor.take_block(size as usize, "data")?.to_vec(),
            }
        }
    };

    Ok(Atom { name, is_defined, is_global, body })
}

fn read_procedure_body(cursor: &mut Cursor<'_>, atoms: &[Atom], name: &str) -> Result<AtomBody> {
    let is_main = cursor.read_bool("'is main' bool")?;
    let code_size = cursor.read_u32("the 32 bit number for code size")?;
    let code = cursor.take_block(code_size as usize, "code")?.to_vec();

    let ref_count = cursor.read_u16("the 16 bit number for the reference count")?;
    let mut references: Vec<Reference> = Vec::with_capacity(ref_count as usize);
    for _ in 0..ref_count {
        let reference = read_reference(cursor, atoms)?;
        for existing in &references {
            if reference.overlaps(existing) {
                bail!(
                    "{}'s reference to '{}' has an overlapping address with the reference to '{}' at 0x{:02X}.",
                    name,
                    target_name(&reference, atoms, name),
                    target_name(existing, atoms, name),
                    existing.address,
                );
            }
        }
        references.push(reference);
    }

    Ok(AtomBody::Procedure { is_main, code, references })
}

fn read_reference(cursor: &mut Cursor<'_>, atoms: &[Atom]) -> Result<Reference> {
    let is_global = cursor.read_bool("'is global' bool")?;
    let type_byte = cursor.read_u8("the address type byte")?;
    let address_type = AddressType::from_type_byte(type_byte)
        .ok_or_else(|| anyhow!("Invalid address type 0x{type_byte:02X}."))?;
    let address = cursor.read_u32("the 32 bit number for the reference address")?;

    let target = if is_global {
        let index = cursor.read_u32("the 32 bit number for the target atom index")?;
        // The index must point at an atom that has already been read; this
        // is what lets it be resolved into a handle right here.
        if index as usize >= atoms.len() {
            bail!("Invalid atom index 0x{index:X}.");
        }
        RefTarget::Global { atom: AtomId(index as usize) }
    } else {
        let offset = cursor.read_u32("the 32 bit number for the reference target")?;
        RefTarget::Local { offset }
    };

    Ok(Reference { address, address_type, target })
}

/// Name to report for a reference in diagnostics: the referenced atom for a
/// global reference, the owning procedure itself for a local one.
fn target_name<'a>(reference: &Reference, atoms: &'a [Atom], owner: &'a str) -> &'a str {
    match reference.target {
        RefTarget::Global { atom } => &atoms[atom.0].name,
        RefTarget::Local { .. } => owner,
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, count: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < count {
            bail!("Unexpected end of object file. Expected {what}.");
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    /// Like [`take`], but for sized code/data blocks, whose error reports
    /// how many bytes were actually left.
    fn take_block(&mut self, count: usize, label: &str) -> Result<&'a [u8]> {
        if self.remaining() < count {
            bail!(
                "Unexpected end of object file. Expected a {label} block of 0x{count:02X} bytes but 0x{:02X} was read.",
                self.remaining(),
            );
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn read_bool(&mut self, what: &str) -> Result<bool> {
        Ok(self.read_u8(what)? != 0)
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_cstr(&mut self, what: &str) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == 0 {
                let bytes = &self.data[start..self.pos];
                self.pos += 1;
                return String::from_utf8(bytes.to_vec())
                    .map_err(|_| anyhow!("Invalid characters in a string."));
            }
            self.pos += 1;
        }
        bail!("Unexpected end of object file. Expected {what}.");
    }
}
