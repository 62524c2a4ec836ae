//! Core linker logic.
//!
//! This module contains the `Linker` struct which orchestrates the linking
//! process in two phases:
//! 1. Merge & resolve: concatenate the atoms of all input files, reconcile
//!    their origins, collapse same-named atoms onto one canonical atom per
//!    name, and rebind global references onto the canonical atoms while
//!    enforcing visibility.
//! 2. Link to binary: locate the main procedure, prune atoms unreachable
//!    from it, assign addresses, patch relocations through the
//!    architecture backend, and emit the raw image.
//!
//! Phase 1 alone produces a merged object file that can be persisted with
//! the writer and linked again later.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::io::Write;

use crate::arch::arm::Arm;
use crate::arch::Architecture;
use crate::atom::{Atom, AtomBody, AtomId, ObjectFile, RefTarget};

/// Merges object files and links them into a flat binary.
///
/// A `Linker` accumulates input files via [`add_object`](Self::add_object)
/// and is consumed by [`link`](Self::link) or
/// [`link_binary`](Self::link_binary). Each link job is a fresh value;
/// nothing is shared between jobs.
pub struct Linker<A: Architecture> {
    arch: A,
    atoms: Vec<Atom>,
    /// Originating input file of each atom, for visibility checks.
    source_file: Vec<usize>,
    origin: Option<u32>,
    file_count: usize,
}

impl Default for Linker<Arm> {
    fn default() -> Self {
        Linker::new(Arm)
    }
}

impl<A: Architecture> Linker<A> {
    pub fn new(arch: A) -> Self {
        Self {
            arch,
            atoms: Vec::new(),
            source_file: Vec::new(),
            origin: None,
            file_count: 0,
        }
    }

    /// Adds an input file's atoms to the link.
    ///
    /// Reconciles the file's origin with the ones seen so far and rebases
    /// its atom handles into the accumulated sequence.
    pub fn add_object(&mut self, file: ObjectFile) -> Result<()> {
        if let Some(origin) = file.origin {
            match self.origin {
                Some(existing) if existing != origin => bail!("Inconsistent origin."),
                _ => self.origin = Some(origin),
            }
        }

        let base = self.atoms.len();
        let file_index = self.file_count;
        self.file_count += 1;

        tracing::debug!("adding {} atoms from input {}", file.atoms.len(), file_index);
        for mut atom in file.atoms {
            if let AtomBody::Procedure { references, .. } = &mut atom.body {
                for reference in references {
                    if let RefTarget::Global { atom } = &mut reference.target {
                        *atom = AtomId(atom.0 + base);
                    }
                }
            }
            self.atoms.push(atom);
            self.source_file.push(file_index);
        }
        Ok(())
    }

    /// Merge and resolve only, producing the combined object file.
    pub fn link(self) -> Result<ObjectFile> {
        merge(self.atoms, &self.source_file, self.origin)
    }

    /// Full link: merge, prune, assign addresses, patch, and stream the
    /// flat binary into `sink`.
    pub fn link_binary<W: Write>(self, sink: &mut W) -> Result<()> {
        let merged = merge(self.atoms, &self.source_file, self.origin)?;
        write_binary(&self.arch, &merged, sink)
    }
}

/// Merge and resolve a sequence of object files with the ARM backend.
pub fn link(files: impl IntoIterator<Item = ObjectFile>) -> Result<ObjectFile> {
    let mut linker = Linker::default();
    for file in files {
        linker.add_object(file)?;
    }
    linker.link()
}

/// Link a sequence of object files into a flat ARM binary.
pub fn link_binary<W: Write>(
    files: impl IntoIterator<Item = ObjectFile>,
    sink: &mut W,
) -> Result<()> {
    let mut linker = Linker::default();
    for file in files {
        linker.add_object(file)?;
    }
    linker.link_binary(sink)
}

/// Phase 1: collapse the concatenated atoms onto one canonical atom per
/// name and rebind global references.
fn merge(atoms: Vec<Atom>, source_file: &[usize], origin: Option<u32>) -> Result<ObjectFile> {
    // Group atom indices by name, in first-occurrence order.
    let mut group_of: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, atom) in atoms.iter().enumerate() {
        match group_of.get(&atom.name) {
            Some(&group) => groups[group].push(index),
            None => {
                group_of.insert(atom.name.clone(), groups.len());
                groups.push(vec![index]);
            }
        }
    }
    tracing::debug!("merging {} atoms into {} names", atoms.len(), groups.len());

    // Pick the canonical atom of every group: the defined member, or the
    // first member when the name is never defined.
    let mut canonical: Vec<usize> = Vec::with_capacity(groups.len());
    for members in &groups {
        let first = members[0];
        let mut defined = None;
        for &index in members {
            if atoms[index].is_defined {
                if defined.is_some() {
                    bail!("There are multiple atoms with called '{}'.", atoms[index].name);
                }
                defined = Some(index);
            }
        }
        for &index in members {
            if atoms[index].kind() != atoms[first].kind() {
                bail!(
                    "'{}' and '{}' is not of the same type.",
                    atoms[first].name,
                    atoms[index].name,
                );
            }
        }
        canonical.push(defined.unwrap_or(first));
    }

    // The merged sequence is the canonical atoms in concatenation order;
    // collapsed duplicates simply drop out.
    let mut group_index = vec![0usize; atoms.len()];
    for (group, members) in groups.iter().enumerate() {
        for &index in members {
            group_index[index] = group;
        }
    }
    let mut kept = canonical.clone();
    kept.sort_unstable();
    let mut position = vec![0usize; atoms.len()];
    for (pos, &index) in kept.iter().enumerate() {
        position[index] = pos;
    }
    // Merged position any old reference target resolves to.
    let merged_pos = |index: usize| position[canonical[group_index[index]]];

    // Visibility: a kept procedure may only reference non-global atoms
    // from its own source file.
    for &keep in &kept {
        let AtomBody::Procedure { references, .. } = &atoms[keep].body else {
            continue;
        };
        for reference in references {
            let RefTarget::Global { atom } = reference.target else {
                continue;
            };
            let target = canonical[group_index[atom.0]];
            if !atoms[target].is_global && source_file[target] != source_file[keep] {
                bail!(
                    "'{}' is referencing '{}' which is local to another object file.",
                    atoms[keep].name,
                    atoms[target].name,
                );
            }
        }
    }

    // Move the canonical atoms into the merged sequence and point their
    // references at merged positions.
    let mut slots: Vec<Option<Atom>> = atoms.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(kept.len());
    for &keep in &kept {
        let mut atom = slots[keep].take().expect("canonical atoms are unique");
        if let AtomBody::Procedure { references, .. } = &mut atom.body {
            for reference in references {
                if let RefTarget::Global { atom } = &mut reference.target {
                    *atom = AtomId(merged_pos(atom.0));
                }
            }
        }
        merged.push(atom);
    }

    Ok(ObjectFile { atoms: merged, origin })
}

/// Phase 2: prune, lay out, patch, and emit the merged atoms as a raw
/// binary image.
fn write_binary<A: Architecture, W: Write>(
    arch: &A,
    file: &ObjectFile,
    sink: &mut W,
) -> Result<()> {
    let mut main = None;
    for (index, atom) in file.atoms.iter().enumerate() {
        if let AtomBody::Procedure { is_main: true, .. } = atom.body {
            if main.replace(index).is_some() {
                bail!("Multiple main procedures.");
            }
        }
    }
    let Some(main) = main else {
        bail!("There is no main procedure.");
    };

    // Transitive closure of reference targets, starting at main.
    let mut reachable = vec![false; file.atoms.len()];
    reachable[main] = true;
    let mut pending = vec![main];
    while let Some(index) = pending.pop() {
        let AtomBody::Procedure { references, .. } = &file.atoms[index].body else {
            continue;
        };
        for reference in references {
            if let RefTarget::Global { atom } = reference.target {
                if !reachable[atom.0] {
                    reachable[atom.0] = true;
                    pending.push(atom.0);
                }
            }
        }
    }
    let kept: Vec<usize> = (0..file.atoms.len()).filter(|&i| reachable[i]).collect();
    tracing::debug!(
        "keeping {} of {} atoms after reachability pruning",
        kept.len(),
        file.atoms.len(),
    );

    let undefined: Vec<&str> = kept
        .iter()
        .filter(|&&index| !file.atoms[index].is_defined)
        .map(|&index| file.atoms[index].name.as_str())
        .collect();
    if !undefined.is_empty() {
        let mut message = String::from("Undefined atoms:");
        for name in undefined {
            message.push_str("\n\t");
            message.push_str(name);
        }
        return Err(anyhow!(message));
    }

    // Back-to-back addresses starting at the origin.
    let mut address = vec![0u32; file.atoms.len()];
    let mut cursor = file.origin.unwrap_or(0);
    for &index in &kept {
        address[index] = cursor;
        cursor += file.atoms[index].size();
    }

    for &index in &kept {
        match &file.atoms[index].body {
            AtomBody::Procedure { code, references, .. } => {
                let mut code = code.clone();
                for reference in references {
                    let p = address[index] + reference.address;
                    let s = match reference.target {
                        RefTarget::Global { atom } => address[atom.0],
                        RefTarget::Local { offset } => address[index] + offset,
                    };
                    arch.apply_relocation(reference.address_type, reference.address, p, s, &mut code)?;
                }
                sink.write_all(&code)?;
            }
            AtomBody::Data { content } => sink.write_all(content)?,
            AtomBody::NullTerminatedString { content } => {
                sink.write_all(content.as_bytes())?;
                sink.write_all(&[0])?;
            }
        }
    }
    Ok(())
}
