//! The atom data model.
//!
//! An object file is an ordered sequence of atoms: named, typed program
//! fragments (procedures, data blocks, NUL-terminated strings). Procedures
//! carry references, the patch records that the linker resolves into real
//! addresses once the final layout is known.

/// A stable handle to an atom within its owning [`ObjectFile`].
///
/// Handles are plain positions in the atom sequence. The reader resolves
/// the raw indices found on disk into handles while parsing, so indices
/// never outlive deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(pub usize);

/// A relocatable object file: an ordered atom sequence plus an optional
/// load origin.
///
/// `origin: None` models "origin not set"; the serialized format carries an
/// explicit flag byte for this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFile {
    pub atoms: Vec<Atom>,
    pub origin: Option<u32>,
}

impl ObjectFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an atom and returns its handle.
    pub fn push(&mut self, atom: Atom) -> AtomId {
        let id = AtomId(self.atoms.len());
        self.atoms.push(atom);
        id
    }
}

/// A named, typed unit of code or data.
///
/// `is_defined` distinguishes an atom with a body from an external
/// declaration; `is_global` controls whether other object files may
/// reference it. Names only matter before linking — the final binary
/// retains no trace of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub name: String,
    pub is_defined: bool,
    pub is_global: bool,
    pub body: AtomBody,
}

impl Atom {
    /// Size in bytes this atom occupies in the linked image.
    pub fn size(&self) -> u32 {
        match &self.body {
            AtomBody::Procedure { code, .. } => code.len() as u32,
            AtomBody::Data { content } => content.len() as u32,
            // The terminating NUL is part of the image.
            AtomBody::NullTerminatedString { content } => content.len() as u32 + 1,
        }
    }

    pub fn kind(&self) -> AtomKind {
        match self.body {
            AtomBody::Procedure { .. } => AtomKind::Procedure,
            AtomBody::NullTerminatedString { .. } => AtomKind::NullTerminatedString,
            AtomBody::Data { .. } => AtomKind::Data,
        }
    }
}

/// The variant payload of an [`Atom`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomBody {
    Procedure {
        /// At most one procedure across a whole link may set this.
        is_main: bool,
        code: Vec<u8>,
        references: Vec<Reference>,
    },
    Data {
        content: Vec<u8>,
    },
    NullTerminatedString {
        content: String,
    },
}

/// Atom variant discriminant, matching the on-disk type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    Procedure,
    NullTerminatedString,
    Data,
}

impl AtomKind {
    pub fn type_byte(self) -> u8 {
        match self {
            AtomKind::Procedure => 0,
            AtomKind::NullTerminatedString => 1,
            AtomKind::Data => 2,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(AtomKind::Procedure),
            1 => Some(AtomKind::NullTerminatedString),
            2 => Some(AtomKind::Data),
            _ => None,
        }
    }
}

/// A patch record owned by a procedure.
///
/// `address` is the byte offset into the owning procedure's code where the
/// patch is applied; the relocation encoding is selected by `address_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub address: u32,
    pub address_type: AddressType,
    pub target: RefTarget,
}

impl Reference {
    /// Whether the patched intervals `[address, address + width)` of two
    /// references intersect. Widened arithmetic; addresses come straight
    /// off the wire.
    pub fn overlaps(&self, other: &Reference) -> bool {
        let a = self.address as u64;
        let b = other.address as u64;
        a < b + other.address_type.width() as u64 && b < a + self.address_type.width() as u64
    }
}

/// Where a reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// An offset into the owning procedure's own code.
    Local { offset: u32 },
    /// Another atom, by handle.
    Global { atom: AtomId },
}

/// The relocation encoding applied at a reference's patch site.
///
/// Both encodings patch one 32-bit instruction word, stored big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// ARM load/store immediate: 12-bit magnitude plus an Up bit.
    ArmOffset12,
    /// ARM branch-with-link: signed 24-bit word offset, pipeline-biased.
    ArmTargetAddress,
}

impl AddressType {
    /// Width in bytes of the patched field.
    pub fn width(self) -> u32 {
        match self {
            AddressType::ArmOffset12 | AddressType::ArmTargetAddress => 4,
        }
    }

    pub fn type_byte(self) -> u8 {
        match self {
            AddressType::ArmOffset12 => 0,
            AddressType::ArmTargetAddress => 1,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(AddressType::ArmOffset12),
            1 => Some(AddressType::ArmTargetAddress),
            _ => None,
        }
    }
}
