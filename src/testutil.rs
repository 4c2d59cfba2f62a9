// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synthetic ELF fixtures for tests of this crate and its consumers.

[SharedObjectBuilder] emits minimal but structurally valid ELF64
little-endian shared objects: dynamic symbol table, dynamic section, and
GNU symbol versioning tables. Enough for the parser and the dependency
analysis to operate on without shipping binary fixtures.
*/

use {
    byteorder::{LittleEndian, WriteBytesExt},
    object::elf,
    std::{collections::HashMap, path::Path},
};

#[derive(Clone)]
struct TestSymbol {
    name: String,
    binding: u8,
    defined: bool,
    hidden: bool,
    version: Option<String>,
    version_file: Option<String>,
}

/// Builder for synthetic shared objects.
pub struct SharedObjectBuilder {
    soname: Option<String>,
    needed: Vec<String>,
    rpath: Option<String>,
    runpath: Option<String>,
    symbols: Vec<TestSymbol>,
}

impl SharedObjectBuilder {
    /// A shared object advertising `soname`.
    pub fn new(soname: &str) -> Self {
        Self {
            soname: Some(soname.to_string()),
            needed: Vec::new(),
            rpath: None,
            runpath: None,
            symbols: Vec::new(),
        }
    }

    /// A file without a `DT_SONAME`, as produced for executables.
    pub fn executable() -> Self {
        Self {
            soname: None,
            needed: Vec::new(),
            rpath: None,
            runpath: None,
            symbols: Vec::new(),
        }
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_string());
        self
    }

    pub fn rpath(mut self, value: &str) -> Self {
        self.rpath = Some(value.to_string());
        self
    }

    pub fn runpath(mut self, value: &str) -> Self {
        self.runpath = Some(value.to_string());
        self
    }

    fn symbol(mut self, symbol: TestSymbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn define(self, name: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_GLOBAL,
            defined: true,
            hidden: false,
            version: None,
            version_file: None,
        })
    }

    pub fn define_weak(self, name: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_WEAK,
            defined: true,
            hidden: false,
            version: None,
            version_file: None,
        })
    }

    pub fn define_versioned(self, name: &str, version: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_GLOBAL,
            defined: true,
            hidden: false,
            version: Some(version.to_string()),
            version_file: None,
        })
    }

    pub fn define_hidden_versioned(self, name: &str, version: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_GLOBAL,
            defined: true,
            hidden: true,
            version: Some(version.to_string()),
            version_file: None,
        })
    }

    pub fn import(self, name: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_GLOBAL,
            defined: false,
            hidden: false,
            version: None,
            version_file: None,
        })
    }

    pub fn import_weak(self, name: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_WEAK,
            defined: false,
            hidden: false,
            version: None,
            version_file: None,
        })
    }

    /// An undefined symbol requiring `version` from `file`, recorded in
    /// `.gnu.version_r`.
    pub fn import_versioned(self, name: &str, version: &str, file: &str) -> Self {
        self.symbol(TestSymbol {
            name: name.to_string(),
            binding: elf::STB_GLOBAL,
            defined: false,
            hidden: false,
            version: Some(version.to_string()),
            version_file: Some(file.to_string()),
        })
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }

    pub fn build(&self) -> Vec<u8> {
        let mut dynstr = vec![0u8];
        let mut dynstr_offsets = HashMap::new();

        // Version index namespace: 0 and 1 are reserved, verdefs first,
        // then verneed entries.
        let mut next_index: u16 = 2;

        let mut verdefs: Vec<(String, u16)> = Vec::new();
        for sym in self.symbols.iter().filter(|s| s.defined) {
            if let Some(version) = &sym.version {
                if !verdefs.iter().any(|(name, _)| name == version) {
                    verdefs.push((version.clone(), next_index));
                    next_index += 1;
                }
            }
        }

        let mut verneeds: Vec<(String, Vec<(String, u16)>)> = Vec::new();
        for sym in self.symbols.iter().filter(|s| !s.defined) {
            if let (Some(version), Some(file)) = (&sym.version, &sym.version_file) {
                if !verneeds.iter().any(|(f, _)| f == file) {
                    verneeds.push((file.clone(), Vec::new()));
                }
                let group = verneeds
                    .iter_mut()
                    .find(|(f, _)| f == file)
                    .expect("group was just ensured");
                if !group.1.iter().any(|(name, _)| name == version) {
                    group.1.push((version.clone(), next_index));
                    next_index += 1;
                }
            }
        }

        let version_index_of = |sym: &TestSymbol| -> u16 {
            let index = if sym.defined {
                match &sym.version {
                    Some(version) => {
                        verdefs
                            .iter()
                            .find(|(name, _)| name == version)
                            .expect("defined versions are pre-allocated")
                            .1
                    }
                    None => elf::VER_NDX_GLOBAL,
                }
            } else {
                match (&sym.version, &sym.version_file) {
                    (Some(version), Some(file)) => {
                        verneeds
                            .iter()
                            .find(|(f, _)| f == file)
                            .and_then(|(_, group)| {
                                group.iter().find(|(name, _)| name == version)
                            })
                            .expect("required versions are pre-allocated")
                            .1
                    }
                    _ => elf::VER_NDX_GLOBAL,
                }
            };

            if sym.hidden {
                index | elf::VERSYM_HIDDEN
            } else {
                index
            }
        };

        // .dynsym and the parallel .gnu.version array. Index 0 is the
        // reserved undefined entry.
        let mut dynsym = vec![0u8; 24];
        let mut versym = Vec::new();
        versym.write_u16::<LittleEndian>(0).unwrap();

        for (i, sym) in self.symbols.iter().enumerate() {
            let name_offset = intern(&mut dynstr, &mut dynstr_offsets, &sym.name);

            dynsym.write_u32::<LittleEndian>(name_offset).unwrap();
            dynsym.write_u8((sym.binding << 4) | elf::STT_FUNC).unwrap();
            dynsym.write_u8(elf::STV_DEFAULT).unwrap();
            dynsym
                .write_u16::<LittleEndian>(if sym.defined { 1 } else { elf::SHN_UNDEF })
                .unwrap();
            dynsym
                .write_u64::<LittleEndian>(if sym.defined {
                    0x1000 + (i as u64) * 16
                } else {
                    0
                })
                .unwrap();
            dynsym.write_u64::<LittleEndian>(0).unwrap();

            versym
                .write_u16::<LittleEndian>(version_index_of(sym))
                .unwrap();
        }

        // .gnu.version_r
        let mut verneed_data = Vec::new();
        for (group_index, (file, versions)) in verneeds.iter().enumerate() {
            let file_offset = intern(&mut dynstr, &mut dynstr_offsets, file);
            let last_group = group_index == verneeds.len() - 1;

            verneed_data.write_u16::<LittleEndian>(1).unwrap();
            verneed_data
                .write_u16::<LittleEndian>(versions.len() as u16)
                .unwrap();
            verneed_data.write_u32::<LittleEndian>(file_offset).unwrap();
            verneed_data.write_u32::<LittleEndian>(16).unwrap();
            verneed_data
                .write_u32::<LittleEndian>(if last_group {
                    0
                } else {
                    16 + 16 * versions.len() as u32
                })
                .unwrap();

            for (aux_index, (version, index)) in versions.iter().enumerate() {
                let name_offset = intern(&mut dynstr, &mut dynstr_offsets, version);
                let last = aux_index == versions.len() - 1;

                verneed_data
                    .write_u32::<LittleEndian>(elf_hash(version))
                    .unwrap();
                verneed_data.write_u16::<LittleEndian>(0).unwrap();
                verneed_data.write_u16::<LittleEndian>(*index).unwrap();
                verneed_data.write_u32::<LittleEndian>(name_offset).unwrap();
                verneed_data
                    .write_u32::<LittleEndian>(if last { 0 } else { 16 })
                    .unwrap();
            }
        }

        // .gnu.version_d, one Verdaux per Verdef.
        let mut verdef_data = Vec::new();
        for (def_index, (version, index)) in verdefs.iter().enumerate() {
            let name_offset = intern(&mut dynstr, &mut dynstr_offsets, version);
            let last = def_index == verdefs.len() - 1;

            verdef_data.write_u16::<LittleEndian>(1).unwrap();
            verdef_data.write_u16::<LittleEndian>(0).unwrap();
            verdef_data.write_u16::<LittleEndian>(*index).unwrap();
            verdef_data.write_u16::<LittleEndian>(1).unwrap();
            verdef_data
                .write_u32::<LittleEndian>(elf_hash(version))
                .unwrap();
            verdef_data.write_u32::<LittleEndian>(20).unwrap();
            verdef_data
                .write_u32::<LittleEndian>(if last { 0 } else { 28 })
                .unwrap();
            verdef_data.write_u32::<LittleEndian>(name_offset).unwrap();
            verdef_data.write_u32::<LittleEndian>(0).unwrap();
        }

        // .dynamic, DT_NEEDED order preserved.
        let mut dynamic_entries: Vec<(u64, u64)> = Vec::new();
        for name in &self.needed {
            let offset = intern(&mut dynstr, &mut dynstr_offsets, name);
            dynamic_entries.push((elf::DT_NEEDED as u64, offset as u64));
        }
        if let Some(soname) = &self.soname {
            let offset = intern(&mut dynstr, &mut dynstr_offsets, soname);
            dynamic_entries.push((elf::DT_SONAME as u64, offset as u64));
        }
        if let Some(rpath) = &self.rpath {
            let offset = intern(&mut dynstr, &mut dynstr_offsets, rpath);
            dynamic_entries.push((elf::DT_RPATH as u64, offset as u64));
        }
        if let Some(runpath) = &self.runpath {
            let offset = intern(&mut dynstr, &mut dynstr_offsets, runpath);
            dynamic_entries.push((elf::DT_RUNPATH as u64, offset as u64));
        }
        dynamic_entries.push((elf::DT_NULL as u64, 0));

        let mut dynamic_data = Vec::new();
        for (tag, value) in &dynamic_entries {
            dynamic_data.write_u64::<LittleEndian>(*tag).unwrap();
            dynamic_data.write_u64::<LittleEndian>(*value).unwrap();
        }

        // .shstrtab
        let section_names = [
            ".dynsym",
            ".dynstr",
            ".gnu.version",
            ".gnu.version_r",
            ".gnu.version_d",
            ".dynamic",
            ".shstrtab",
        ];
        let mut shstrtab = vec![0u8];
        let mut shstr_offsets = Vec::new();
        for name in section_names {
            shstr_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }

        // Lay out bodies after the 64 byte file header.
        let mut offset = 64usize;
        let dynsym_offset = place(&mut offset, dynsym.len(), 8);
        let dynstr_offset = place(&mut offset, dynstr.len(), 1);
        let versym_offset = place(&mut offset, versym.len(), 2);
        let verneed_offset = place(&mut offset, verneed_data.len(), 8);
        let verdef_offset = place(&mut offset, verdef_data.len(), 8);
        let dynamic_offset = place(&mut offset, dynamic_data.len(), 8);
        let shstrtab_offset = place(&mut offset, shstrtab.len(), 1);
        let shoff = (offset + 7) & !7;

        let mut data = Vec::with_capacity(shoff + 8 * 64);

        // ELF header.
        data.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        data.extend_from_slice(&[0u8; 8]);
        data.write_u16::<LittleEndian>(elf::ET_DYN).unwrap();
        data.write_u16::<LittleEndian>(elf::EM_X86_64).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u64::<LittleEndian>(0).unwrap();
        data.write_u64::<LittleEndian>(0).unwrap();
        data.write_u64::<LittleEndian>(shoff as u64).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        data.write_u16::<LittleEndian>(64).unwrap();
        data.write_u16::<LittleEndian>(56).unwrap();
        data.write_u16::<LittleEndian>(0).unwrap();
        data.write_u16::<LittleEndian>(64).unwrap();
        data.write_u16::<LittleEndian>(8).unwrap();
        data.write_u16::<LittleEndian>(7).unwrap();

        append_at(&mut data, dynsym_offset, &dynsym);
        append_at(&mut data, dynstr_offset, &dynstr);
        append_at(&mut data, versym_offset, &versym);
        append_at(&mut data, verneed_offset, &verneed_data);
        append_at(&mut data, verdef_offset, &verdef_data);
        append_at(&mut data, dynamic_offset, &dynamic_data);
        append_at(&mut data, shstrtab_offset, &shstrtab);
        data.resize(shoff, 0);

        // Section headers.
        let alloc = elf::SHF_ALLOC as u64;
        write_section_header(&mut data, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        write_section_header(
            &mut data,
            shstr_offsets[0],
            elf::SHT_DYNSYM,
            alloc,
            dynsym_offset,
            dynsym.len(),
            2,
            1,
            8,
            24,
        );
        write_section_header(
            &mut data,
            shstr_offsets[1],
            elf::SHT_STRTAB,
            alloc,
            dynstr_offset,
            dynstr.len(),
            0,
            0,
            1,
            0,
        );
        write_section_header(
            &mut data,
            shstr_offsets[2],
            elf::SHT_GNU_VERSYM,
            alloc,
            versym_offset,
            versym.len(),
            1,
            0,
            2,
            2,
        );
        write_section_header(
            &mut data,
            shstr_offsets[3],
            elf::SHT_GNU_VERNEED,
            alloc,
            verneed_offset,
            verneed_data.len(),
            2,
            verneeds.len() as u32,
            8,
            0,
        );
        write_section_header(
            &mut data,
            shstr_offsets[4],
            elf::SHT_GNU_VERDEF,
            alloc,
            verdef_offset,
            verdef_data.len(),
            2,
            verdefs.len() as u32,
            8,
            0,
        );
        write_section_header(
            &mut data,
            shstr_offsets[5],
            elf::SHT_DYNAMIC,
            alloc,
            dynamic_offset,
            dynamic_data.len(),
            2,
            0,
            8,
            16,
        );
        write_section_header(
            &mut data,
            shstr_offsets[6],
            elf::SHT_STRTAB,
            0,
            shstrtab_offset,
            shstrtab.len(),
            0,
            0,
            1,
            0,
        );

        data
    }
}

fn intern(table: &mut Vec<u8>, offsets: &mut HashMap<String, u32>, value: &str) -> u32 {
    if let Some(&offset) = offsets.get(value) {
        return offset;
    }

    let offset = table.len() as u32;
    table.extend_from_slice(value.as_bytes());
    table.push(0);
    offsets.insert(value.to_string(), offset);

    offset
}

fn place(offset: &mut usize, len: usize, align: usize) -> usize {
    *offset = (*offset + align - 1) & !(align - 1);
    let position = *offset;
    *offset += len;
    position
}

fn append_at(data: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if data.len() < offset {
        data.resize(offset, 0);
    }
    data.extend_from_slice(bytes);
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(
    data: &mut Vec<u8>,
    name: u32,
    typ: u32,
    flags: u64,
    offset: usize,
    size: usize,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
) {
    data.write_u32::<LittleEndian>(name).unwrap();
    data.write_u32::<LittleEndian>(typ).unwrap();
    data.write_u64::<LittleEndian>(flags).unwrap();
    data.write_u64::<LittleEndian>(0).unwrap();
    data.write_u64::<LittleEndian>(offset as u64).unwrap();
    data.write_u64::<LittleEndian>(size as u64).unwrap();
    data.write_u32::<LittleEndian>(link).unwrap();
    data.write_u32::<LittleEndian>(info).unwrap();
    data.write_u64::<LittleEndian>(addralign).unwrap();
    data.write_u64::<LittleEndian>(entsize).unwrap();
}

/// The System V ELF hash function, used for `vd_hash`/`vna_hash`.
fn elf_hash(name: &str) -> u32 {
    let mut h: u32 = 0;

    for byte in name.bytes() {
        h = (h << 4).wrapping_add(byte as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }

    h
}
