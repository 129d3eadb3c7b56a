use axoasset::LocalAsset;

use super::mock::scratch_dir;
use crate::extract::{extract, Extraction, EXTRACTED_MARKER_FILE_NAME};
use crate::platform::Platform;
use crate::DistError;

#[test]
fn missing_archive() {
    let (_guard, dir) = scratch_dir();
    let err = extract(
        &dir.join("nope.tar.gz"),
        &dir.join("bin"),
        "node",
        Platform::Linux,
        "t1",
    )
    .unwrap_err();
    assert!(matches!(err, DistError::ArchiveMissing { .. }));
}

#[test]
fn unknown_format() {
    let (_guard, dir) = scratch_dir();
    let archive = dir.join("tool.rar");
    LocalAsset::write_new("junk", &archive).unwrap();
    let err = extract(&archive, &dir.join("bin"), "node", Platform::Linux, "t1").unwrap_err();
    assert!(matches!(err, DistError::UnknownArchiveFormat { .. }));
}

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::tests::mock::tar_gz;

    #[test]
    fn extracts_nested_binary_once() {
        let (_guard, dir) = scratch_dir();
        let archive = dir.join("smol-runtime-linux-x64.tar.gz");
        let bytes = tar_gz(&[
            ("README.md", "hi"),
            ("smol-runtime-linux-x64/bin/node", "#!/bin/sh\necho v1\n"),
        ]);
        LocalAsset::new(&archive, bytes).unwrap().write_to_dir(&dir).unwrap();
        let out = dir.join("bin");

        let first = extract(&archive, &out, "node", Platform::Linux, "t1").unwrap();
        assert_eq!(first, Extraction::Extracted(out.join("node")));
        let mode = std::fs::metadata(out.join("node")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            LocalAsset::load_string(out.join(EXTRACTED_MARKER_FILE_NAME)).unwrap(),
            "t1"
        );
        // only the binary comes out
        assert!(!out.join("README.md").exists());

        let second = extract(&archive, &out, "node", Platform::Linux, "t1").unwrap();
        assert_eq!(second, Extraction::UpToDate(out.join("node")));

        // a new tag re-extracts, even from the same archive
        let third = extract(&archive, &out, "node", Platform::Linux, "t2").unwrap();
        assert!(matches!(third, Extraction::Extracted(_)));
    }

    #[test]
    fn binary_not_in_archive() {
        let (_guard, dir) = scratch_dir();
        let archive = dir.join("binject-linux-x64.tar.gz");
        let bytes = tar_gz(&[("binject-linux-x64/README.md", "no binary here")]);
        LocalAsset::new(&archive, bytes).unwrap().write_to_dir(&dir).unwrap();
        let out = dir.join("bin");

        let err = extract(&archive, &out, "binject", Platform::Linux, "t1").unwrap_err();
        match err {
            DistError::BinaryNotInArchive { binary, .. } => assert_eq!(binary, "binject"),
            other => panic!("wrong error {other:?}"),
        }
        assert!(!out.join(EXTRACTED_MARKER_FILE_NAME).exists());
    }

    #[test]
    fn windows_binaries_need_exe() {
        let (_guard, dir) = scratch_dir();
        let archive = dir.join("tool.tgz");
        let bytes = tar_gz(&[("binject", "not the windows one"), ("binject.exe", "MZ")]);
        LocalAsset::new(&archive, bytes).unwrap().write_to_dir(&dir).unwrap();
        let out = dir.join("bin");

        let done = extract(&archive, &out, "binject", Platform::Win32, "t1").unwrap();
        assert_eq!(done.binary(), out.join("binject.exe"));
        assert_eq!(LocalAsset::load_string(done.binary()).unwrap(), "MZ");
    }

    #[test]
    fn corrupt_archive_reports_tool_stderr() {
        let (_guard, dir) = scratch_dir();
        let archive = dir.join("broken.tar.gz");
        LocalAsset::write_new("this is not gzip", &archive).unwrap();
        let err = extract(&archive, &dir.join("bin"), "node", Platform::Linux, "t1").unwrap_err();
        match err {
            DistError::ExtractionFailed { exit, stderr, .. } => {
                assert!(exit.starts_with("exit code"), "{exit}");
                assert!(!stderr.is_empty());
            }
            other => panic!("wrong error {other:?}"),
        }
    }
}
