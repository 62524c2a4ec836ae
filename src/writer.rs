//! Binary object-file writer.
//!
//! Serializes an [`ObjectFile`] to the exact layout the reader consumes;
//! writing and re-reading reproduces an equal object file. Global-reference
//! indices are re-derived from the current atom order, which is all the
//! format retains of atom identity.

use anyhow::{bail, Result};
use std::io::Write;

use crate::atom::{Atom, AtomBody, ObjectFile, RefTarget, Reference};
use crate::reader::{MAGIC, VERSION};

/// Write an object file to a sink.
pub fn write<W: Write>(file: &ObjectFile, sink: &mut W) -> Result<()> {
    let mut buffer = Vec::new();

    buffer.extend_from_slice(MAGIC);
    buffer.extend_from_slice(&VERSION.to_le_bytes());
    buffer.push(file.origin.is_some() as u8);
    buffer.extend_from_slice(&file.origin.unwrap_or(0).to_le_bytes());
    buffer.extend_from_slice(&[0; 4]);

    for atom in &file.atoms {
        write_atom(&mut buffer, atom, file)?;
    }

    sink.write_all(&buffer)?;
    Ok(())
}

fn write_atom(buffer: &mut Vec<u8>, atom: &Atom, file: &ObjectFile) -> Result<()> {
    buffer.push(atom.kind().type_byte());
    buffer.push(atom.is_defined as u8);
    buffer.push(atom.is_global as u8);
    write_cstr(buffer, &atom.name)?;

    match &atom.body {
        AtomBody::Procedure { is_main, code, references } => {
            buffer.push(*is_main as u8);
            buffer.extend_from_slice(&(code.len() as u32).to_le_bytes());
            buffer.extend_from_slice(code);
            buffer.extend_from_slice(&(references.len() as u16).to_le_bytes());
            for reference in references {
                write_reference(buffer, reference, file)?;
            }
        }
        AtomBody::Data { content } => {
            buffer.extend_from_slice(&(content.len() as u32).to_le_bytes());
            buffer.extend_from_slice(content);
        }
        AtomBody::NullTerminatedString { content } => {
            write_cstr(buffer, content)?;
        }
    }
    Ok(())
}

fn write_reference(buffer: &mut Vec<u8>, reference: &Reference, file: &ObjectFile) -> Result<()> {
    match reference.target {
        RefTarget::Local { offset } => {
            buffer.push(0);
            buffer.push(reference.address_type.type_byte());
            buffer.extend_from_slice(&reference.address.to_le_bytes());
            buffer.extend_from_slice(&offset.to_le_bytes());
        }
        RefTarget::Global { atom } => {
            if atom.0 >= file.atoms.len() {
                bail!("Invalid atom index 0x{:X}.", atom.0);
            }
            buffer.push(1);
            buffer.push(reference.address_type.type_byte());
            buffer.extend_from_slice(&reference.address.to_le_bytes());
            buffer.extend_from_slice(&(atom.0 as u32).to_le_bytes());
        }
    }
    Ok(())
}

fn write_cstr(buffer: &mut Vec<u8>, text: &str) -> Result<()> {
    // The format has no escaping; an embedded NUL would corrupt the record.
    if text.as_bytes().contains(&0) {
        bail!("A string must not contain a zero byte.");
    }
    buffer.extend_from_slice(text.as_bytes());
    buffer.push(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AddressType, AtomId};
    use crate::reader;

    fn atom(name: &str, is_defined: bool, is_global: bool, body: AtomBody) -> Atom {
        Atom { name: name.to_string(), is_defined, is_global, body }
    }

    fn round_trip(file: &ObjectFile) -> ObjectFile {
        let mut bytes = Vec::new();
        write(file, &mut bytes).unwrap();
        reader::parse(&bytes).unwrap()
    }

    #[test]
    fn round_trips_empty_file() {
        let file = ObjectFile::new();
        assert_eq!(round_trip(&file), file);

        let with_origin = ObjectFile { atoms: Vec::new(), origin: Some(0x8000) };
        assert_eq!(round_trip(&with_origin), with_origin);
    }

    #[test]
    fn round_trips_every_atom_kind() {
        let mut file = ObjectFile::new();
        let table = file.push(atom(
            "table",
            true,
            false,
            AtomBody::Data { content: vec![1, 2, 3, 4] },
        ));
        file.push(atom(
            "greeting",
            true,
            true,
            AtomBody::NullTerminatedString { content: "hello".to_string() },
        ));
        file.push(atom("puts", false, true, AtomBody::Procedure {
            is_main: false,
            code: Vec::new(),
            references: Vec::new(),
        }));
        file.push(atom("main", true, true, AtomBody::Procedure {
            is_main: true,
            code: vec![0xE5, 0x91, 0x00, 0x00, 0xEB, 0x00, 0x00, 0x00],
            references: vec![
                Reference {
                    address: 0,
                    address_type: AddressType::ArmOffset12,
                    target: RefTarget::Global { atom: table },
                },
                Reference {
                    address: 4,
                    address_type: AddressType::ArmTargetAddress,
                    target: RefTarget::Local { offset: 0 },
                },
            ],
        }));

        assert_eq!(round_trip(&file), file);
    }

    #[test]
    fn unset_origin_writes_a_zero_word() {
        let mut bytes = Vec::new();
        write(&ObjectFile::new(), &mut bytes).unwrap();
        assert_eq!(&bytes[6..11], &[0, 0, 0, 0, 0]);
        assert_eq!(bytes.len(), 15);
    }

    #[test]
    fn rejects_dangling_reference_index() {
        let mut file = ObjectFile::new();
        file.push(atom("main", true, true, AtomBody::Procedure {
            is_main: true,
            code: vec![0; 4],
            references: vec![Reference {
                address: 0,
                address_type: AddressType::ArmTargetAddress,
                target: RefTarget::Global { atom: AtomId(7) },
            }],
        }));
        let mut bytes = Vec::new();
        let err = write(&file, &mut bytes).unwrap_err();
        assert_eq!(err.to_string(), "Invalid atom index 0x7.");
    }

    #[test]
    fn rejects_embedded_nul_in_names() {
        let mut file = ObjectFile::new();
        file.push(atom("bad\0name", true, true, AtomBody::Data { content: Vec::new() }));
        let mut bytes = Vec::new();
        let err = write(&file, &mut bytes).unwrap_err();
        assert_eq!(err.to_string(), "A string must not contain a zero byte.");
    }
}
