// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Composition of the dynamic linker library search order.

Mirrors the lookup rules of `ld.so(8)`: `DT_RUNPATH` (or the `DT_RPATH`
chain when absent), `LD_LIBRARY_PATH`, the directories configured through
`/etc/ld.so.conf`, and finally the trusted default directories.
*/

use {
    crate::elf::{ElfClass, ElfFile},
    log::debug,
    once_cell::sync::Lazy,
    std::{
        collections::HashSet,
        env, fs,
        path::{Path, PathBuf},
    },
};

/// Directories configured via /etc/ld.so.conf, in file order.
///
/// Host configuration does not change for the lifetime of the process, so
/// the parse happens once.
static LD_SO_CONF_DIRECTORIES: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let mut dirs = Vec::new();
    let mut seen = HashSet::new();
    parse_ld_so_conf(Path::new("/etc/ld.so.conf"), &mut dirs, &mut seen, 8);
    dirs
});

pub fn ld_so_conf_directories() -> &'static [PathBuf] {
    &LD_SO_CONF_DIRECTORIES
}

fn parse_ld_so_conf(
    path: &Path,
    dirs: &mut Vec<PathBuf>,
    seen: &mut HashSet<PathBuf>,
    depth: usize,
) {
    if depth == 0 || !seen.insert(path.to_path_buf()) {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return,
    };

    for raw_line in content.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(pattern) = line.strip_prefix("include ") {
            // Relative include patterns resolve against the directory of
            // the including file.
            let pattern = pattern.trim();
            let pattern = if pattern.starts_with('/') {
                pattern.to_string()
            } else {
                path.parent()
                    .unwrap_or_else(|| Path::new("/"))
                    .join(pattern)
                    .to_string_lossy()
                    .to_string()
            };

            if let Ok(paths) = glob::glob(&pattern) {
                for included in paths.flatten() {
                    parse_ld_so_conf(&included, dirs, seen, depth - 1);
                }
            }

            continue;
        }

        if line.starts_with('/') {
            let dir = PathBuf::from(line.trim_end_matches('/'));
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
}

/// Expand `$ORIGIN`, `$LIB`, and `$PLATFORM` dynamic string tokens.
pub fn expand_dynamic_string_tokens(value: &str, origin: &Path, class: ElfClass) -> String {
    let origin = origin.to_string_lossy();
    let lib = if class.is_64() { "lib64" } else { "lib" };
    let platform = env::consts::ARCH;

    value
        .replace("${ORIGIN}", &origin)
        .replace("$ORIGIN", &origin)
        .replace("${LIB}", lib)
        .replace("$LIB", lib)
        .replace("${PLATFORM}", platform)
        .replace("$PLATFORM", platform)
}

/// The trusted default directories, most specific first.
pub fn default_directories(class: ElfClass) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if class.is_64() {
        dirs.push(PathBuf::from("/lib64"));
        dirs.push(PathBuf::from("/usr/lib64"));
    }

    dirs.push(PathBuf::from(format!("/lib/{}-linux-gnu", env::consts::ARCH)));
    dirs.push(PathBuf::from(format!(
        "/usr/lib/{}-linux-gnu",
        env::consts::ARCH
    )));
    dirs.push(PathBuf::from("/lib"));
    dirs.push(PathBuf::from("/usr/lib"));

    dirs
}

/// Compose the full search path for dependency lookups of `subject`.
///
/// `inherited_rpaths` holds already-expanded `DT_RPATH` directory lists of
/// the subject and its load-stack ancestors, innermost last. They are only
/// consulted when the subject carries no `DT_RUNPATH`.
pub fn compose(subject: &ElfFile, inherited_rpaths: &[String]) -> Vec<PathBuf> {
    let origin = subject
        .path()
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .to_path_buf();
    let class = subject.class();

    let mut dirs: Vec<PathBuf> = Vec::new();

    let mut push_list = |dirs: &mut Vec<PathBuf>, list: &str| {
        for part in list.split(':') {
            if part.is_empty() {
                continue;
            }
            let dir = PathBuf::from(part);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    };

    if let Some(runpath) = subject.runpath() {
        push_list(
            &mut dirs,
            &expand_dynamic_string_tokens(runpath, &origin, class),
        );
    } else {
        for rpath in inherited_rpaths.iter().rev() {
            push_list(&mut dirs, rpath);
        }
    }

    if let Ok(ld_library_path) = env::var("LD_LIBRARY_PATH") {
        push_list(&mut dirs, &ld_library_path);
    }

    for dir in ld_so_conf_directories() {
        if !dirs.contains(dir) {
            dirs.push(dir.clone());
        }
    }

    for dir in default_directories(class) {
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }

    debug!(
        "search path for {}: {} directories",
        subject.path().display(),
        dirs.len()
    );

    dirs
}
