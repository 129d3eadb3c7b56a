//! Mock testing utils: scratch dirs, fake tools, fake archives and configs

use std::collections::BTreeMap;

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use temp_dir::TempDir;

use crate::config::{Config, ConfigFile};

pub const REPO: &str = "sea-dist/fixtures";
pub const RUNTIME_TAG: &str = "smol-runtime-20240901-1";
pub const INJECTOR_TAG: &str = "binject-1.2.0";

/// A fresh directory, deleted when the guard drops
pub fn scratch_dir() -> (TempDir, Utf8PathBuf) {
    crate::create_tmp().unwrap()
}

/// A config with nothing but a cache dir and (optionally) an API base
pub fn mock_config(cache_dir: &Utf8Path, env: &[(&str, &str)]) -> Config {
    let env = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    let file = ConfigFile {
        release_repo: Some(REPO.to_owned()),
        ..ConfigFile::default()
    };
    let cache_dir = cache_dir.to_owned();
    Config::from_sources(file, |var| env.get(var).cloned(), move || cache_dir).unwrap()
}

/// Write an executable shell script
#[cfg(unix)]
pub fn fake_tool(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    LocalAsset::write_new_all(&format!("#!/bin/sh\n{body}\n"), &path).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Make a .tar.gz holding `files` (relative path, contents), returning its bytes
#[cfg(unix)]
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let (_guard, dir) = scratch_dir();
    let staging = dir.join("staging");
    for (path, contents) in files {
        LocalAsset::write_new_all(contents, staging.join(path)).unwrap();
    }
    LocalAsset::create_dir_all(&staging).unwrap();
    let archive = dir.join("archive.tar.gz");
    let status = std::process::Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(&staging)
        .arg(".")
        .status()
        .unwrap();
    assert!(status.success());
    LocalAsset::load_bytes(&archive).unwrap()
}

/// A fake blob compiler: reads `output` out of sea-config.json and writes a blob there
pub const FAKE_COMPILER: &str = r#"
[ "$1" = "--experimental-sea-config" ] || exit 7
out=$(sed -n 's/^ *"output": "\(.*\)",$/\1/p' "$2")
[ -n "$out" ] || { echo "no output in $2" >&2; exit 6; }
printf 'BLOB' > "$out"
"#;

/// A fake injector: appends the blob to the output, checking the fuse
///
/// Every invocation's arguments are appended to `binject.log` next to it.
pub const FAKE_INJECTOR: &str = r#"
echo "$*" >> "$(dirname "$0")/binject.log"
[ "$1" = "inject" ] || exit 9
shift
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2;;
    --sea) sea="$2"; shift 2;;
    --sentinel-fuse) fuse="$2"; shift 2;;
    *) shift 2;;
  esac
done
[ "$fuse" = "NODE_SEA_FUSE_fce680ab2cc467b6e072b8b5df1996b2" ] || { echo "bad fuse" >&2; exit 8; }
cat "$sea" >> "$out"
"#;

/// A fake rcodesign: logs its arguments to `rcodesign.log` next to it
pub const FAKE_RCODESIGN: &str = r#"
echo "$*" >> "$(dirname "$0")/rcodesign.log"
[ "$1" = "sign" ] && [ -f "$2" ] || exit 4
"#;
