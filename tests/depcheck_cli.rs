// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::Result,
    elf_depcheck::testutil::SharedObjectBuilder,
    std::{path::Path, process::Command},
};

fn depcheck() -> Command {
    Command::new(env!("CARGO_BIN_EXE_depcheck"))
}

fn write_fixture_tree(dir: &Path) -> Result<()> {
    SharedObjectBuilder::new("libused.so")
        .define("used_fn")
        .write_to(dir.join("libused.so"))?;
    SharedObjectBuilder::new("libunused.so")
        .define("never_called")
        .write_to(dir.join("libunused.so"))?;

    SharedObjectBuilder::executable()
        .needed("libused.so")
        .needed("libunused.so")
        .needed("libghost.so")
        .runpath("$ORIGIN")
        .import("used_fn")
        .write_to(dir.join("app"))?;

    Ok(())
}

#[test]
fn test_reports_unused_and_unresolved() -> Result<()> {
    let td = tempfile::tempdir()?;
    write_fixture_tree(td.path())?;

    let app = td.path().join("app");
    let output = depcheck().arg(&app).output()?;

    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(
        stdout,
        format!(
            "{}:\n    unused: libunused.so\n    unresolved: libghost.so\n",
            app.display()
        )
    );

    Ok(())
}

#[test]
fn test_verbose_lists_attributed_symbols() -> Result<()> {
    let td = tempfile::tempdir()?;
    write_fixture_tree(td.path())?;

    let output = depcheck()
        .arg("--verbose")
        .arg(td.path().join("app"))
        .output()?;

    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("    libused.so: 1 symbols\n"));
    assert!(stdout.contains("        used_fn\n"));

    Ok(())
}

#[test]
fn test_batch_continues_past_bad_files() -> Result<()> {
    let td = tempfile::tempdir()?;
    write_fixture_tree(td.path())?;

    let garbage = td.path().join("garbage");
    std::fs::write(&garbage, b"not an elf at all")?;

    let output = depcheck()
        .arg(&garbage)
        .arg(td.path().join("app"))
        .output()?;

    // One subject produced output, so the batch succeeds.
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("unused: libunused.so"));

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("not an ELF file"));

    Ok(())
}

#[test]
fn test_all_arguments_bad_is_an_error() -> Result<()> {
    let td = tempfile::tempdir()?;

    let output = depcheck().arg(td.path().join("missing")).output()?;

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(!output.stderr.is_empty());

    Ok(())
}

#[test]
fn test_no_arguments_is_an_error() -> Result<()> {
    let output = depcheck().output()?;

    assert!(!output.status.success());

    Ok(())
}
