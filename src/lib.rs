// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Detect unused shared library dependencies of ELF binaries.

A dynamically linked ELF file declares the libraries it requires through
`DT_NEEDED` entries. Over time some of those declarations go stale: the
library is still loaded at run time but no longer satisfies any symbol.
This crate loads a file and the transitive closure of its dependencies
from the host filesystem, honoring `DT_RUNPATH`/`DT_RPATH`,
`LD_LIBRARY_PATH`, `/etc/ld.so.conf`, and the default trusted
directories. It then attributes every undefined symbol of the subject to
the dependency the dynamic linker would bind it to. Dependencies that
receive no symbol and are not needed as symbol version providers are
reported as removable.

The `depcheck` binary exposes this as a batch command line tool; the
library interface serves richer frontends.
*/

pub mod analysis;
pub mod cli;
pub mod elf;
pub mod error;
pub mod file_set;
pub mod report;
pub mod search_path;
pub mod testutil;

pub use {
    analysis::{analyze_dependencies, DependencyAnalysis, DependencyAttribution},
    elf::{DynamicSymbol, ElfClass, ElfFile, ElfSection, ElfSegment},
    error::{DepcheckError, Result},
    file_set::FileSet,
};
