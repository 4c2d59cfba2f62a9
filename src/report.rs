// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Textual rendering of dependency analysis results. */

use {
    crate::analysis::DependencyAnalysis,
    std::io::{self, Write},
};

/// Write the subject block for one analysis.
///
/// Unused dependencies are listed only when present; unresolved direct
/// dependencies are always listed.
pub fn write_analysis<W: Write>(writer: &mut W, analysis: &DependencyAnalysis) -> io::Result<()> {
    writeln!(writer, "{}:", analysis.subject_path.display())?;

    for dep in analysis.unused_dependencies() {
        writeln!(writer, "    unused: {}", dep.needed_name)?;
    }

    for dep in analysis.unresolved_dependencies() {
        writeln!(writer, "    unresolved: {}", dep.needed_name)?;
    }

    Ok(())
}

/// Like [write_analysis], but additionally lists the symbols each
/// dependency satisfies.
pub fn write_analysis_verbose<W: Write>(
    writer: &mut W,
    analysis: &DependencyAnalysis,
) -> io::Result<()> {
    write_analysis(writer, analysis)?;

    for dep in analysis
        .attributions
        .iter()
        .filter(|a| !a.symbols.is_empty())
    {
        writeln!(
            writer,
            "    {}: {} symbols",
            dep.needed_name,
            dep.symbols.len()
        )?;

        for symbol in &dep.symbols {
            writeln!(writer, "        {}", symbol)?;
        }
    }

    if !analysis.unattributed.is_empty() {
        writeln!(writer, "    unattributed: {} symbols", analysis.unattributed.len())?;

        for symbol in &analysis.unattributed {
            writeln!(writer, "        {}", symbol)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::analysis::{DependencyAnalysis, DependencyAttribution},
        std::path::PathBuf,
    };

    fn sample() -> DependencyAnalysis {
        DependencyAnalysis {
            subject_path: PathBuf::from("/opt/app/bin/app"),
            attributions: vec![
                DependencyAttribution {
                    needed_name: "libused.so".to_string(),
                    file_index: Some(1),
                    symbols: vec!["fn_a".to_string(), "fn_b@V1".to_string()],
                    version_provider: false,
                },
                DependencyAttribution {
                    needed_name: "libunused.so".to_string(),
                    file_index: Some(2),
                    symbols: vec![],
                    version_provider: false,
                },
                DependencyAttribution {
                    needed_name: "libmissing.so".to_string(),
                    file_index: None,
                    symbols: vec![],
                    version_provider: false,
                },
            ],
            unattributed: vec![],
        }
    }

    #[test]
    fn test_report_format() {
        let mut out = Vec::new();
        write_analysis(&mut out, &sample()).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "/opt/app/bin/app:\n    unused: libunused.so\n    unresolved: libmissing.so\n"
        );
    }

    #[test]
    fn test_report_omits_empty_unused() {
        let mut analysis = sample();
        analysis.attributions.remove(1);
        analysis.attributions.remove(1);

        let mut out = Vec::new();
        write_analysis(&mut out, &analysis).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "/opt/app/bin/app:\n");
    }

    #[test]
    fn test_verbose_report_lists_symbols() {
        let mut out = Vec::new();
        write_analysis_verbose(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("    libused.so: 2 symbols\n"));
        assert!(text.contains("        fn_b@V1\n"));
    }
}
