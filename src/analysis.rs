// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Attribution of undefined symbols to direct dependencies. */

use {
    crate::file_set::FileSet,
    log::debug,
    std::{collections::HashSet, path::PathBuf},
};

/// What a single `DT_NEEDED` entry contributes to its dependent.
#[derive(Clone, Debug)]
pub struct DependencyAttribution {
    /// The needed name as it appears in the dynamic section.
    pub needed_name: String,
    /// Index of the resolved file in the set, if resolution succeeded.
    pub file_index: Option<usize>,
    /// Subject symbols this dependency satisfies, in subject symbol order.
    /// Versioned symbols render as `name@version`.
    pub symbols: Vec<String>,
    /// Whether the subject's `.gnu.version_r` names this library as a
    /// version provider.
    pub version_provider: bool,
}

impl DependencyAttribution {
    pub fn is_resolved(&self) -> bool {
        self.file_index.is_some()
    }

    /// A dependency is unused when it resolved, satisfies no symbol, and is
    /// not required as a version provider.
    pub fn is_unused(&self) -> bool {
        self.is_resolved() && self.symbols.is_empty() && !self.version_provider
    }
}

/// Result of analyzing one subject file.
#[derive(Clone, Debug)]
pub struct DependencyAnalysis {
    pub subject_path: PathBuf,
    /// One entry per `DT_NEEDED` entry of the subject, in order.
    pub attributions: Vec<DependencyAttribution>,
    /// Imports no direct dependency satisfies.
    pub unattributed: Vec<String>,
}

impl DependencyAnalysis {
    pub fn unused_dependencies(&self) -> impl Iterator<Item = &DependencyAttribution> {
        self.attributions.iter().filter(|a| a.is_unused())
    }

    pub fn unresolved_dependencies(&self) -> impl Iterator<Item = &DependencyAttribution> {
        self.attributions.iter().filter(|a| !a.is_resolved())
    }
}

struct ExportIndex<'a> {
    /// (name, version) pairs of versioned exports.
    versioned: HashSet<(&'a str, &'a str)>,
    /// Names exported at base version (no version assignment).
    base: HashSet<&'a str>,
    /// Every exported name, for unversioned import matching.
    names: HashSet<&'a str>,
}

impl<'a> ExportIndex<'a> {
    fn satisfies(&self, name: &str, version: Option<&str>) -> bool {
        match version {
            // A versioned import is satisfied by the exact version or by a
            // base-version export.
            Some(version) => {
                self.versioned.contains(&(name, version)) || self.base.contains(name)
            }
            None => self.names.contains(name),
        }
    }
}

/// Attribute every import of `subject` to one of its direct dependencies.
///
/// When several dependencies export a matching symbol the first one in
/// `DT_NEEDED` order wins, matching the dynamic linker's resolution order.
pub fn analyze_dependencies(set: &FileSet, subject: usize) -> DependencyAnalysis {
    let subject_file = set.file(subject);

    let mut attributions = Vec::new();
    let mut indexes = Vec::new();

    for name in subject_file.needed_libraries() {
        let file_index = set.file_index_by_soname(name);

        indexes.push(file_index.map(|i| {
            let mut index = ExportIndex {
                versioned: HashSet::new(),
                base: HashSet::new(),
                names: HashSet::new(),
            };

            for sym in set.file(i).exported_symbols() {
                index.names.insert(sym.name.as_str());
                match sym.version.as_deref() {
                    Some(version) => {
                        index.versioned.insert((sym.name.as_str(), version));
                    }
                    None => {
                        index.base.insert(sym.name.as_str());
                    }
                }
            }

            index
        }));

        attributions.push(DependencyAttribution {
            needed_name: name.clone(),
            file_index,
            symbols: Vec::new(),
            version_provider: subject_file
                .version_provider_files()
                .iter()
                .any(|f| f == name),
        });
    }

    let mut unattributed = Vec::new();

    for sym in subject_file.imported_symbols() {
        let label = match sym.version.as_deref() {
            Some(version) => format!("{}@{}", sym.name, version),
            None => sym.name.clone(),
        };

        let mut matched = false;

        for (i, index) in indexes.iter().enumerate() {
            if let Some(index) = index {
                if index.satisfies(&sym.name, sym.version.as_deref()) {
                    attributions[i].symbols.push(label.clone());
                    matched = true;
                    break;
                }
            }
        }

        if !matched {
            debug!(
                "{}: no direct dependency provides {}",
                subject_file.path().display(),
                label
            );
            unattributed.push(label);
        }
    }

    DependencyAnalysis {
        subject_path: subject_file.path().to_path_buf(),
        attributions,
        unattributed,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{file_set::FileSet, testutil::SharedObjectBuilder},
        anyhow::Result,
        std::path::Path,
    };

    fn analyze_app(dir: &Path) -> Result<DependencyAnalysis> {
        let mut set = FileSet::new();
        let root = set.add_file(dir.join("app"))?;
        Ok(analyze_dependencies(&set, root))
    }

    fn unused(analysis: &DependencyAnalysis) -> Vec<&str> {
        analysis
            .unused_dependencies()
            .map(|a| a.needed_name.as_str())
            .collect()
    }

    fn unresolved(analysis: &DependencyAnalysis) -> Vec<&str> {
        analysis
            .unresolved_dependencies()
            .map(|a| a.needed_name.as_str())
            .collect()
    }

    #[test]
    fn test_unused_dependency_detected() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("libalpha.so")
            .define("alpha_fn")
            .write_to(&td.path().join("libalpha.so"))?;
        SharedObjectBuilder::new("libbeta.so")
            .define("beta_fn")
            .write_to(&td.path().join("libbeta.so"))?;

        SharedObjectBuilder::executable()
            .needed("libalpha.so")
            .needed("libbeta.so")
            .runpath("$ORIGIN")
            .import("alpha_fn")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert_eq!(unused(&analysis), vec!["libbeta.so"]);
        assert_eq!(analysis.attributions[0].symbols, vec!["alpha_fn"]);
        assert!(analysis.unattributed.is_empty());

        Ok(())
    }

    #[test]
    fn test_versioned_import_attribution() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("libthread.so.0")
            .define_versioned("thr_create", "LIB_2.2.5")
            .write_to(&td.path().join("libthread.so.0"))?;

        SharedObjectBuilder::executable()
            .needed("libthread.so.0")
            .runpath("$ORIGIN")
            .import_versioned("thr_create", "LIB_2.2.5", "libthread.so.0")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert!(unused(&analysis).is_empty());
        assert_eq!(
            analysis.attributions[0].symbols,
            vec!["thr_create@LIB_2.2.5"]
        );
        assert!(analysis.attributions[0].version_provider);

        Ok(())
    }

    #[test]
    fn test_first_needed_entry_wins() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("liba.so")
            .define("foo")
            .write_to(&td.path().join("liba.so"))?;
        SharedObjectBuilder::new("libb.so")
            .define("foo")
            .write_to(&td.path().join("libb.so"))?;

        SharedObjectBuilder::executable()
            .needed("liba.so")
            .needed("libb.so")
            .runpath("$ORIGIN")
            .import("foo")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert_eq!(analysis.attributions[0].symbols, vec!["foo"]);
        assert!(analysis.attributions[1].symbols.is_empty());
        assert_eq!(unused(&analysis), vec!["libb.so"]);

        Ok(())
    }

    #[test]
    fn test_unresolved_not_reported_unused() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::executable()
            .needed("libghost.so")
            .runpath("$ORIGIN")
            .import("phantom")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert_eq!(unresolved(&analysis), vec!["libghost.so"]);
        assert!(unused(&analysis).is_empty());
        assert_eq!(analysis.unattributed, vec!["phantom"]);

        Ok(())
    }

    #[test]
    fn test_version_provider_never_unused() -> Result<()> {
        let td = tempfile::tempdir()?;

        // libfilter provides the version namespace but the implementation
        // lives in libimpl; no symbol binds to libfilter directly.
        SharedObjectBuilder::new("libimpl.so")
            .define("fo")
            .write_to(&td.path().join("libimpl.so"))?;
        SharedObjectBuilder::new("libfilter.so")
            .write_to(&td.path().join("libfilter.so"))?;

        SharedObjectBuilder::executable()
            .needed("libimpl.so")
            .needed("libfilter.so")
            .runpath("$ORIGIN")
            .import_versioned("fo", "FILT_1", "libfilter.so")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        // The base-version export of libimpl satisfies the versioned import.
        assert_eq!(analysis.attributions[0].symbols, vec!["fo@FILT_1"]);
        assert!(analysis.attributions[1].symbols.is_empty());
        assert!(analysis.attributions[1].version_provider);
        assert!(unused(&analysis).is_empty());

        Ok(())
    }

    #[test]
    fn test_weak_import_attribution() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("libw.so")
            .define("wfn")
            .write_to(&td.path().join("libw.so"))?;

        SharedObjectBuilder::executable()
            .needed("libw.so")
            .runpath("$ORIGIN")
            .import_weak("wfn")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert_eq!(analysis.attributions[0].symbols, vec!["wfn"]);
        assert!(unused(&analysis).is_empty());

        Ok(())
    }

    #[test]
    fn test_hidden_export_does_not_satisfy() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("libhid.so")
            .define_hidden_versioned("hid", "HV_1")
            .write_to(&td.path().join("libhid.so"))?;

        SharedObjectBuilder::executable()
            .needed("libhid.so")
            .runpath("$ORIGIN")
            .import("hid")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert_eq!(analysis.unattributed, vec!["hid"]);
        assert_eq!(unused(&analysis), vec!["libhid.so"]);

        Ok(())
    }

    #[test]
    fn test_no_needed_entries() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::executable()
            .define("main")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        assert!(analysis.attributions.is_empty());
        assert!(unused(&analysis).is_empty());
        assert!(unresolved(&analysis).is_empty());
        assert!(analysis.unattributed.is_empty());

        Ok(())
    }

    #[test]
    fn test_each_import_attributed_exactly_once() -> Result<()> {
        let td = tempfile::tempdir()?;

        SharedObjectBuilder::new("liba.so")
            .define("shared_fn")
            .define("a_only")
            .write_to(&td.path().join("liba.so"))?;
        SharedObjectBuilder::new("libb.so")
            .define("shared_fn")
            .define("b_only")
            .write_to(&td.path().join("libb.so"))?;

        SharedObjectBuilder::executable()
            .needed("liba.so")
            .needed("libb.so")
            .runpath("$ORIGIN")
            .import("shared_fn")
            .import("a_only")
            .import("b_only")
            .import("nowhere_fn")
            .write_to(&td.path().join("app"))?;

        let analysis = analyze_app(td.path())?;

        for label in ["shared_fn", "a_only", "b_only", "nowhere_fn"] {
            let attributed = analysis
                .attributions
                .iter()
                .map(|a| a.symbols.iter().filter(|s| *s == label).count())
                .sum::<usize>();
            let unattributed = analysis.unattributed.iter().filter(|s| *s == label).count();
            assert_eq!(attributed + unattributed, 1, "{}", label);
        }

        Ok(())
    }
}
