// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading of dynamically linked ELF executables and shared objects. */

use {
    crate::error::{DepcheckError, Result},
    object::{
        elf,
        read::elf::{Dyn, FileHeader, ProgramHeader, SectionHeader, Sym},
        Endianness, FileKind, SectionIndex,
    },
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
    },
};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Word width of an ELF file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    pub fn is_64(&self) -> bool {
        matches!(self, Self::Elf64)
    }
}

/// A section within an ELF file.
#[derive(Clone, Debug)]
pub struct ElfSection {
    pub index: usize,
    pub name: String,
    pub typ: u32,
    pub flags: u64,
    pub address: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub entity_size: u64,
}

/// A program header entry.
#[derive(Clone, Debug)]
pub struct ElfSegment {
    pub typ: u32,
    pub flags: u32,
    pub offset: u64,
    pub virtual_address: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub alignment: u64,
}

/// An entry of the dynamic symbol table.
#[derive(Clone, Debug)]
pub struct DynamicSymbol {
    /// Symbol name, decoded from `.dynstr` (UTF-8 best effort).
    pub name: String,
    /// Binding (`STB_*`).
    pub binding: u8,
    /// Type (`STT_*`).
    pub typ: u8,
    /// Visibility (`STV_*`), from the low bits of `st_other`.
    pub visibility: u8,
    /// Defining section index. 0 means undefined.
    pub section_index: u16,
    /// Raw `.gnu.version` entry for this symbol, hidden bit included.
    pub version_index: u16,
    /// Resolved version string, if the symbol carries one.
    pub version: Option<String>,
    /// For undefined symbols, the library `.gnu.version_r` names as the
    /// provider of the required version.
    pub version_file: Option<String>,
}

impl DynamicSymbol {
    pub fn is_undefined(&self) -> bool {
        self.section_index == elf::SHN_UNDEF
    }

    /// Whether this symbol is expected to be provided by another object.
    pub fn is_import(&self) -> bool {
        self.is_undefined() && matches!(self.binding, elf::STB_GLOBAL | elf::STB_WEAK)
    }

    /// Whether this symbol participates in the export interface of its file.
    ///
    /// Requires a defining section, GLOBAL or WEAK binding, DEFAULT or
    /// PROTECTED visibility, and a versym that is neither LOCAL nor hidden.
    pub fn is_export(&self) -> bool {
        !self.is_undefined()
            && matches!(self.binding, elf::STB_GLOBAL | elf::STB_WEAK)
            && matches!(self.visibility, elf::STV_DEFAULT | elf::STV_PROTECTED)
            && self.version_index & elf::VERSYM_VERSION != elf::VER_NDX_LOCAL
            && self.version_index & elf::VERSYM_HIDDEN == 0
    }
}

/// A loaded ELF object.
///
/// All tables the dependency analysis consumes are parsed at load time and
/// the instance is immutable afterwards.
#[derive(Clone, Debug)]
pub struct ElfFile {
    path: PathBuf,
    class: ElfClass,
    endianness: Endianness,
    object_file_type: u16,
    machine: u16,
    entry: u64,
    soname: Option<String>,
    needed: Vec<String>,
    rpath: Option<String>,
    runpath: Option<String>,
    dynamic_entries: Vec<(u64, u64)>,
    sections: Vec<ElfSection>,
    segments: Vec<ElfSegment>,
    dynamic_symbols: Vec<DynamicSymbol>,
    version_provider_files: Vec<String>,
    relocation_count: u64,
}

impl ElfFile {
    /// Load and parse an ELF file from the filesystem.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| DepcheckError::IoPath(path.display().to_string(), e))?;

        Self::parse(path, &data)
    }

    /// Parse an ELF file from a byte buffer.
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        if data.len() < ELF_MAGIC.len() || data[0..4] != ELF_MAGIC {
            return Err(DepcheckError::NotElf(path.display().to_string()));
        }

        match FileKind::parse(data) {
            Ok(FileKind::Elf32) => parse_elf::<elf::FileHeader32<Endianness>>(path, data),
            Ok(FileKind::Elf64) => parse_elf::<elf::FileHeader64<Endianness>>(path, data),
            Ok(kind) => Err(DepcheckError::Unsupported(format!(
                "{}: unexpected file kind {:?}",
                path.display(),
                kind
            ))),
            Err(e) => Err(DepcheckError::Unsupported(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn class(&self) -> ElfClass {
        self.class
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// `e_type` of the ELF header (`ET_EXEC`, `ET_DYN`, ...).
    pub fn object_file_type(&self) -> u16 {
        self.object_file_type
    }

    /// `e_machine` of the ELF header.
    pub fn machine(&self) -> u16 {
        self.machine
    }

    /// `e_entry` of the ELF header.
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// The `DT_SONAME` value, if the file advertises one.
    pub fn soname(&self) -> Option<&str> {
        self.soname.as_deref()
    }

    /// `DT_NEEDED` entries, in dynamic section order.
    pub fn needed_libraries(&self) -> &[String] {
        &self.needed
    }

    pub fn rpath(&self) -> Option<&str> {
        self.rpath.as_deref()
    }

    pub fn runpath(&self) -> Option<&str> {
        self.runpath.as_deref()
    }

    /// All dynamic section entries as raw (tag, value) pairs, in file order.
    pub fn dynamic_entries(&self) -> &[(u64, u64)] {
        &self.dynamic_entries
    }

    pub fn sections(&self) -> &[ElfSection] {
        &self.sections
    }

    pub fn segments(&self) -> &[ElfSegment] {
        &self.segments
    }

    pub fn dynamic_symbols(&self) -> &[DynamicSymbol] {
        &self.dynamic_symbols
    }

    /// Symbols this file expects some other object to provide.
    pub fn imported_symbols(&self) -> impl Iterator<Item = &DynamicSymbol> {
        self.dynamic_symbols.iter().filter(|s| s.is_import())
    }

    /// Symbols this file provides to other objects.
    pub fn exported_symbols(&self) -> impl Iterator<Item = &DynamicSymbol> {
        self.dynamic_symbols.iter().filter(|s| s.is_export())
    }

    /// Library names appearing as `vn_file` in `.gnu.version_r`.
    ///
    /// These libraries must stay loaded to satisfy version requirements,
    /// independently of whether any symbol binds to them.
    pub fn version_provider_files(&self) -> &[String] {
        &self.version_provider_files
    }

    /// Total number of relocation entries across all REL/RELA sections.
    pub fn relocation_count(&self) -> u64 {
        self.relocation_count
    }

    /// Final path component, for display purposes.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn parse_elf<Elf: FileHeader<Endian = Endianness>>(path: &Path, data: &[u8]) -> Result<ElfFile> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;

    let class = if header.is_class_64() {
        ElfClass::Elf64
    } else {
        ElfClass::Elf32
    };

    let sections = header.sections(endian, data)?;
    let versions = sections.versions(endian, data)?;

    // Map version indexes to the file names that must provide them. The
    // version table itself only retains version strings.
    let mut version_files: HashMap<u16, String> = HashMap::new();
    let mut version_provider_files = Vec::new();

    if let Some((mut verneed, link)) = sections.gnu_verneed(endian, data)? {
        let strings = sections.strings(endian, data, link)?;

        while let Some((entry, mut vernauxes)) = verneed.next()? {
            let file = String::from_utf8_lossy(entry.file(endian, strings)?).to_string();

            if !version_provider_files.contains(&file) {
                version_provider_files.push(file.clone());
            }

            while let Some(vernaux) = vernauxes.next()? {
                let index = vernaux.vna_other.get(endian) & elf::VERSYM_VERSION;
                version_files.insert(index, file.clone());
            }
        }
    }

    let segments = header
        .program_headers(endian, data)?
        .iter()
        .map(|ph| ElfSegment {
            typ: ph.p_type(endian),
            flags: ph.p_flags(endian),
            offset: ph.p_offset(endian).into(),
            virtual_address: ph.p_vaddr(endian).into(),
            file_size: ph.p_filesz(endian).into(),
            memory_size: ph.p_memsz(endian).into(),
            alignment: ph.p_align(endian).into(),
        })
        .collect();

    let mut elf_sections = Vec::new();
    let mut dynamic_symbols = Vec::new();
    let mut soname = None;
    let mut needed = Vec::new();
    let mut rpath = None;
    let mut runpath = None;
    let mut dynamic_entries = Vec::new();
    let mut relocation_count = 0u64;

    for (section_index, section) in sections.iter().enumerate() {
        elf_sections.push(ElfSection {
            index: section_index,
            name: String::from_utf8_lossy(sections.section_name(endian, section)?).to_string(),
            typ: section.sh_type(endian),
            flags: section.sh_flags(endian).into(),
            address: section.sh_addr(endian).into(),
            offset: section.sh_offset(endian).into(),
            size: section.sh_size(endian).into(),
            link: section.sh_link(endian),
            info: section.sh_info(endian),
            entity_size: section.sh_entsize(endian).into(),
        });

        if section.sh_type(endian) == elf::SHT_DYNSYM {
            if let Some(symbols) =
                section.symbols(endian, data, &sections, SectionIndex(section_index))?
            {
                let strings = symbols.strings();

                for (symbol_index, symbol) in symbols.iter().enumerate() {
                    let name =
                        String::from_utf8_lossy(symbol.name(endian, strings)?).to_string();

                    let (version_index, version) = if let Some(versions) = &versions {
                        let index = versions.version_index(endian, symbol_index);
                        let version = versions
                            .version(index)?
                            .map(|v| String::from_utf8_lossy(v.name()).to_string());

                        let mut raw = index.index();
                        if index.is_hidden() {
                            raw |= elf::VERSYM_HIDDEN;
                        }

                        (raw, version)
                    } else {
                        (elf::VER_NDX_GLOBAL, None)
                    };

                    let version_file = if symbol.is_undefined(endian) {
                        version_files
                            .get(&(version_index & elf::VERSYM_VERSION))
                            .cloned()
                    } else {
                        None
                    };

                    dynamic_symbols.push(DynamicSymbol {
                        name,
                        binding: symbol.st_bind(),
                        typ: symbol.st_type(),
                        visibility: symbol.st_visibility(),
                        section_index: symbol.st_shndx(endian),
                        version_index,
                        version,
                        version_file,
                    });
                }
            }
        }

        if let Some((rel, _)) = section.rel(endian, data)? {
            relocation_count += rel.len() as u64;
        }
        if let Some((rela, _)) = section.rela(endian, data)? {
            relocation_count += rela.len() as u64;
        }

        if let Some((entries, link)) = section.dynamic(endian, data)? {
            let strings = sections.strings(endian, data, link).unwrap_or_default();

            for entry in entries {
                dynamic_entries.push((entry.d_tag(endian).into(), entry.d_val(endian).into()));

                match entry.tag32(endian) {
                    Some(elf::DT_NEEDED) => {
                        needed.push(
                            String::from_utf8_lossy(entry.string(endian, strings)?).to_string(),
                        );
                    }
                    Some(elf::DT_SONAME) => {
                        soname = Some(
                            String::from_utf8_lossy(entry.string(endian, strings)?).to_string(),
                        );
                    }
                    Some(elf::DT_RPATH) => {
                        rpath = Some(
                            String::from_utf8_lossy(entry.string(endian, strings)?).to_string(),
                        );
                    }
                    Some(elf::DT_RUNPATH) => {
                        runpath = Some(
                            String::from_utf8_lossy(entry.string(endian, strings)?).to_string(),
                        );
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(ElfFile {
        path: path.to_path_buf(),
        class,
        endianness: endian,
        object_file_type: header.e_type(endian),
        machine: header.e_machine(endian),
        entry: header.e_entry(endian).into(),
        soname,
        needed,
        rpath,
        runpath,
        dynamic_entries,
        sections: elf_sections,
        segments,
        dynamic_symbols,
        version_provider_files,
        relocation_count,
    })
}
