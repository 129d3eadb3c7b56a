use crate::platform::{
    resolve_platform_arch_key, supported_targets, Arch, BuildTarget, Libc, Platform,
    TargetSelection,
};
use crate::tools::{all_tools, lookup_asset, lookup_target_asset, AssetLookup};
use crate::DistError;

#[test]
fn platform_arch_keys() {
    assert_eq!(
        resolve_platform_arch_key(Platform::Darwin, Arch::Arm64, None),
        "darwin-arm64"
    );
    assert_eq!(
        resolve_platform_arch_key(Platform::Linux, Arch::X64, Some(Libc::Musl)),
        "linux-x64-musl"
    );
    assert_eq!(
        resolve_platform_arch_key(Platform::Win32, Arch::X64, None),
        "win32-x64"
    );
}

#[test]
fn libc_is_normalized() {
    let glibc = BuildTarget::new(Platform::Linux, Arch::X64, None);
    assert_eq!(glibc.libc, Some(Libc::Glibc));
    assert_eq!(glibc.key(), "linux-x64");
    assert!(!glibc.has_nondefault_libc());

    let musl = BuildTarget::new(Platform::Linux, Arch::Arm64, Some(Libc::Musl));
    assert_eq!(musl.key(), "linux-arm64-musl");
    assert_eq!(musl.output_file_name("app"), "app-linux-arm64");

    // libc means nothing off linux
    let mac = BuildTarget::new(Platform::Darwin, Arch::X64, Some(Libc::Musl));
    assert_eq!(mac.libc, None);
    assert_eq!(mac.key(), "darwin-x64");

    let win = BuildTarget::new(Platform::Win32, Arch::X64, None);
    assert_eq!(win.output_file_name("app"), "app-win32-x64.exe");
}

#[test]
fn support_matrix() {
    let keys = supported_targets()
        .iter()
        .map(BuildTarget::key)
        .collect::<Vec<_>>();
    insta::assert_snapshot!(keys.join("\n"), @r###"
    darwin-x64
    darwin-arm64
    linux-x64
    linux-x64-musl
    linux-arm64
    linux-arm64-musl
    win32-x64
    "###);
}

#[test]
fn selection_filters_the_matrix() {
    let selection = TargetSelection {
        platforms: vec![Platform::Linux],
        libcs: vec![Libc::Musl],
        ..TargetSelection::default()
    };
    let keys = selection
        .select()
        .unwrap()
        .iter()
        .map(BuildTarget::key)
        .collect::<Vec<_>>();
    assert_eq!(keys, ["linux-x64-musl", "linux-arm64-musl"]);

    let selection = TargetSelection {
        arches: vec![Arch::Arm64],
        ..TargetSelection::default()
    };
    let keys = selection
        .select()
        .unwrap()
        .iter()
        .map(BuildTarget::key)
        .collect::<Vec<_>>();
    assert_eq!(keys, ["darwin-arm64", "linux-arm64", "linux-arm64-musl"]);

    let all = TargetSelection {
        all: true,
        platforms: vec![Platform::Win32],
        ..TargetSelection::default()
    };
    assert_eq!(all.select().unwrap().len(), supported_targets().len());
}

#[test]
fn libc_alone_means_linux() {
    let keys = |selection: TargetSelection| {
        selection
            .select()
            .unwrap()
            .iter()
            .map(BuildTarget::key)
            .collect::<Vec<_>>()
    };
    let musl = TargetSelection {
        libcs: vec![Libc::Musl],
        ..TargetSelection::default()
    };
    assert_eq!(keys(musl), ["linux-x64-musl", "linux-arm64-musl"]);

    let musl_arm = TargetSelection {
        arches: vec![Arch::Arm64],
        libcs: vec![Libc::Musl],
        ..TargetSelection::default()
    };
    assert_eq!(keys(musl_arm), ["linux-arm64-musl"]);

    // naming another platform keeps it alongside the filtered linux targets
    let mixed = TargetSelection {
        platforms: vec![Platform::Darwin, Platform::Linux],
        arches: vec![Arch::X64],
        libcs: vec![Libc::Musl],
        ..TargetSelection::default()
    };
    assert_eq!(keys(mixed), ["darwin-x64", "linux-x64-musl"]);
}

#[test]
fn empty_matches_are_errors() {
    let selection = TargetSelection {
        platforms: vec![Platform::Win32],
        arches: vec![Arch::Arm64],
        ..TargetSelection::default()
    };
    match selection.select() {
        Err(DistError::NoTargetsSelected { selection }) => {
            assert_eq!(selection, "platform=win32 arch=arm64")
        }
        other => panic!("expected NoTargetsSelected, got {other:?}"),
    }
}

#[test]
fn selector_parsing() {
    assert_eq!("macos".parse::<Platform>().unwrap(), Platform::Darwin);
    assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
    assert_eq!("gnu".parse::<Libc>().unwrap(), Libc::Glibc);
    assert!(matches!(
        "solaris".parse::<Platform>(),
        Err(DistError::UnknownSelector {
            kind: "platform",
            ..
        })
    ));
}

#[test]
fn asset_table_lookups() {
    match lookup_asset("binject", "win32-x64") {
        AssetLookup::Supported(asset) => {
            assert_eq!(asset.asset_file_name, "binject-win32-x64.zip");
            assert_eq!(asset.binary_file_name(), "binject.exe");
            assert_eq!(
                asset.download_url("o/r", "binject-1", None),
                "https://github.com/o/r/releases/download/binject-1/binject-win32-x64.zip"
            );
            assert_eq!(
                asset.download_url("o/r", "binject-1", Some("https://mirror.example/")),
                "https://mirror.example/binject-1/binject-win32-x64.zip"
            );
        }
        other => panic!("expected a supported asset, got {other:?}"),
    }
    // the signer doesn't ship musl builds
    assert_eq!(lookup_asset("rcodesign", "linux-x64-musl"), AssetLookup::Unsupported);
    assert_eq!(lookup_asset("nonsense", "linux-x64"), AssetLookup::UnknownTool);

    let musl = BuildTarget::new(Platform::Linux, Arch::X64, Some(Libc::Musl));
    match lookup_target_asset("smol-runtime", &musl) {
        AssetLookup::Supported(asset) => {
            assert_eq!(asset.libc, Some(Libc::Musl));
            assert_eq!(asset.binary_file_name(), "node");
        }
        other => panic!("expected a supported asset, got {other:?}"),
    }

    let names = all_tools().iter().map(|t| t.name).collect::<Vec<_>>();
    assert_eq!(names, ["smol-runtime", "binject", "rcodesign"]);
    assert_eq!(all_tools()[0].tag_env_var(), "SEA_DIST_SMOL_RUNTIME_TAG");
}
