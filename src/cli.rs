// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{analysis::analyze_dependencies, file_set::FileSet, report},
    anyhow::Result,
    clap::{Arg, Command},
    std::io::Write,
};

const ABOUT: &str = "\
Find unused shared library dependencies of ELF binaries.

For every given file, depcheck loads the transitive closure of its
DT_NEEDED libraries using the same search order as the dynamic linker,
attributes every undefined symbol to the dependency that would satisfy
it at load time, and reports declared dependencies that contribute
nothing.

Each file is analyzed as an independent subject. A dependency is only
reported as unused if it also is not required to provide a symbol
version. Libraries that cannot be located on any search path are
reported as unresolved.
";

pub fn run() -> Result<i32> {
    let matches = Command::new("depcheck")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Find unused shared library dependencies of ELF binaries")
        .long_about(ABOUT)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Also print the symbols attributed to each dependency"),
        )
        .arg(
            Arg::new("files")
                .required(true)
                .multiple_values(true)
                .value_name("ELF")
                .help("ELF executables or shared objects to analyze"),
        )
        .get_matches();

    let verbose = matches.is_present("verbose");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut analyzed = 0usize;

    for path in matches.values_of("files").unwrap_or_default() {
        let mut set = FileSet::new();

        let root = match set.add_file(path) {
            Ok(index) => index,
            Err(e) => {
                eprintln!("{}: {}", path, e);
                continue;
            }
        };

        let analysis = analyze_dependencies(&set, root);

        if verbose {
            report::write_analysis_verbose(&mut out, &analysis)?;
        } else {
            report::write_analysis(&mut out, &analysis)?;
        }

        analyzed += 1;
    }

    out.flush()?;

    Ok(if analyzed > 0 { 0 } else { 1 })
}
