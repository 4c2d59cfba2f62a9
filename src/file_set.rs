// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Collections of ELF files connected through `DT_NEEDED` edges. */

use {
    crate::{
        elf::ElfFile,
        error::{DepcheckError, Result},
        search_path,
    },
    log::{debug, warn},
    std::{
        collections::{HashMap, HashSet},
        path::{Path, PathBuf},
    },
};

/// An ordered set of loaded ELF files with a `SONAME` index.
///
/// Files are owned by the set and referenced by index, so cyclic dependency
/// graphs cost nothing. The first file registered under a given `SONAME`
/// wins; later duplicates are ignored.
#[derive(Debug, Default)]
pub struct FileSet {
    files: Vec<ElfFile>,
    soname_index: HashMap<String, usize>,
    unresolved: Vec<String>,
    cycle_pairs: Vec<(String, String)>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &ElfFile> {
        self.files.iter()
    }

    pub fn file(&self, index: usize) -> &ElfFile {
        &self.files[index]
    }

    pub fn file_by_soname(&self, name: &str) -> Option<&ElfFile> {
        self.file_index_by_soname(name).map(|i| &self.files[i])
    }

    pub fn file_index_by_soname(&self, name: &str) -> Option<usize> {
        self.soname_index.get(name).copied()
    }

    /// Needed names that could not be located on any search path, in
    /// discovery order.
    pub fn unresolved_libraries(&self) -> &[String] {
        &self.unresolved
    }

    /// Whether `topological_sort` encountered a dependency cycle.
    pub fn has_dependency_cycle(&self) -> bool {
        !self.cycle_pairs.is_empty()
    }

    /// The (dependent, dependency) name pairs whose edges closed a cycle.
    pub fn cycle_pairs(&self) -> &[(String, String)] {
        &self.cycle_pairs
    }

    /// Load a file and, recursively, every needed library that can be
    /// located. Returns the index of the loaded file.
    ///
    /// Resolution failures are recorded and do not fail the load. Adding a
    /// file whose `SONAME` is already present is a no-op.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file = ElfFile::load(path)?;

        if let Some(soname) = file.soname() {
            if let Some(index) = self.file_index_by_soname(soname) {
                return Ok(index);
            }
        }

        let index = self.register(file);
        let mut rpath_stack = Vec::new();
        let mut loading = HashSet::new();
        self.load_dependencies(index, &mut rpath_stack, &mut loading);

        Ok(index)
    }

    fn register(&mut self, file: ElfFile) -> usize {
        let index = self.files.len();

        if let Some(soname) = file.soname() {
            self.soname_index.entry(soname.to_string()).or_insert(index);
        }

        self.files.push(file);

        index
    }

    fn load_dependencies(
        &mut self,
        index: usize,
        rpath_stack: &mut Vec<String>,
        loading: &mut HashSet<usize>,
    ) {
        if !loading.insert(index) {
            return;
        }

        // This file's DT_RPATH participates in lookups for everything
        // below it on the load stack.
        let pushed_rpath = if let Some(rpath) = self.files[index].rpath() {
            let origin = self.files[index]
                .path()
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .to_path_buf();
            rpath_stack.push(search_path::expand_dynamic_string_tokens(
                rpath,
                &origin,
                self.files[index].class(),
            ));
            true
        } else {
            false
        };

        let needed = self.files[index].needed_libraries().to_vec();

        for name in needed {
            if self.soname_index.contains_key(&name) {
                continue;
            }

            let path = match self.resolve_library(index, &name, rpath_stack) {
                Ok(path) => path,
                Err(DepcheckError::UnresolvedDependency(_)) => {
                    self.record_unresolved(&name);
                    continue;
                }
                Err(e) => {
                    warn!("failed to resolve {}: {}", name, e);
                    self.record_unresolved(&name);
                    continue;
                }
            };

            match ElfFile::load(&path) {
                Ok(dep) => {
                    let dep_index = self.register(dep);
                    // The needed name may differ from the SONAME the file
                    // advertises; make it addressable under both.
                    self.soname_index.entry(name).or_insert(dep_index);
                    self.load_dependencies(dep_index, rpath_stack, loading);
                }
                Err(e) => {
                    warn!("failed to load {}: {}", path.display(), e);
                    self.record_unresolved(&name);
                }
            }
        }

        if pushed_rpath {
            rpath_stack.pop();
        }
    }

    fn resolve_library(
        &self,
        subject: usize,
        name: &str,
        inherited_rpaths: &[String],
    ) -> Result<PathBuf> {
        // Needed entries containing a slash bypass the search path.
        if name.contains('/') {
            let path = PathBuf::from(name);
            if path.is_file() {
                return Ok(path);
            }
            return Err(DepcheckError::UnresolvedDependency(name.to_string()));
        }

        for dir in search_path::compose(self.file(subject), inherited_rpaths) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!("resolved {} to {}", name, candidate.display());
                return Ok(candidate);
            }
        }

        Err(DepcheckError::UnresolvedDependency(name.to_string()))
    }

    fn record_unresolved(&mut self, name: &str) {
        if !self.unresolved.iter().any(|n| n == name) {
            self.unresolved.push(name.to_string());
        }
    }

    fn display_name(&self, index: usize) -> String {
        match self.files[index].soname() {
            Some(soname) => soname.to_string(),
            None => self.files[index].file_name(),
        }
    }

    /// Reorder the set so every file appears after all of its transitive
    /// dependencies present in the set. Add order breaks ties.
    ///
    /// Edges closing a dependency cycle are dropped and recorded; the
    /// affected files keep their relative add order.
    pub fn topological_sort(&mut self) {
        let count = self.files.len();

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, file) in self.files.iter().enumerate() {
            for name in file.needed_libraries() {
                if let Some(&dep) = self.soname_index.get(name) {
                    if dep != i && !deps[i].contains(&dep) {
                        deps[i].push(dep);
                    }
                }
            }
        }

        let mut emitted = vec![false; count];
        let mut order = Vec::with_capacity(count);

        while order.len() < count {
            let mut progressed = false;

            for i in 0..count {
                if !emitted[i] && deps[i].iter().all(|&d| emitted[d]) {
                    emitted[i] = true;
                    order.push(i);
                    progressed = true;
                }
            }

            if !progressed {
                // Everything left sits on a cycle.
                for i in 0..count {
                    if emitted[i] {
                        continue;
                    }
                    for &d in &deps[i] {
                        if !emitted[d] {
                            warn!(
                                "dependency cycle between {} and {}",
                                self.display_name(i),
                                self.display_name(d)
                            );
                            self.cycle_pairs
                                .push((self.display_name(i), self.display_name(d)));
                        }
                    }
                }

                for i in 0..count {
                    if !emitted[i] {
                        emitted[i] = true;
                        order.push(i);
                    }
                }
            }
        }

        let mut remap = vec![0usize; count];
        for (new_index, &old_index) in order.iter().enumerate() {
            remap[old_index] = new_index;
        }

        let mut slots = std::mem::take(&mut self.files)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        self.files = order
            .iter()
            .map(|&old_index| {
                slots[old_index]
                    .take()
                    .expect("each index appears once in the sort order")
            })
            .collect();

        for index in self.soname_index.values_mut() {
            *index = remap[*index];
        }
    }
}
