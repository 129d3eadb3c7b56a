//! The build matrix: which platform/arch/libc combinations we can produce
//! executables for, and how callers narrow that down.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DistError, DistResult};

/// An operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// macOS
    Darwin,
    /// Linux
    Linux,
    /// Windows
    Win32,
}

/// A cpu architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64
    X64,
    /// aarch64
    Arm64,
}

/// A C library flavour, only meaningful on Linux
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Libc {
    /// GNU libc
    Glibc,
    /// musl
    Musl,
}

impl Platform {
    /// All platforms, in display order
    pub const ALL: &'static [Platform] = &[Platform::Darwin, Platform::Linux, Platform::Win32];

    /// The name used in keys and file names
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Darwin => "darwin",
            Platform::Linux => "linux",
            Platform::Win32 => "win32",
        }
    }

    /// The libc a target on this platform gets when none is specified
    pub fn default_libc(self) -> Option<Libc> {
        match self {
            Platform::Linux => Some(Libc::Glibc),
            Platform::Darwin | Platform::Win32 => None,
        }
    }

    /// Suffix executables on this platform need
    pub fn exe_suffix(self) -> &'static str {
        match self {
            Platform::Win32 => ".exe",
            Platform::Darwin | Platform::Linux => "",
        }
    }

    /// Whether an executable for this platform is unusable without a signature
    pub fn requires_signing(self) -> bool {
        self == Platform::Darwin
    }

    /// The platform we're running on, if it's one we know
    pub fn host() -> Option<Platform> {
        match std::env::consts::OS {
            "macos" => Some(Platform::Darwin),
            "linux" => Some(Platform::Linux),
            "windows" => Some(Platform::Win32),
            _ => None,
        }
    }
}

impl Arch {
    /// All architectures, in display order
    pub const ALL: &'static [Arch] = &[Arch::X64, Arch::Arm64];

    /// The name used in keys and file names
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    /// The architecture we're running on, if it's one we know
    pub fn host() -> Option<Arch> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::X64),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl Libc {
    /// All libc flavours, in display order
    pub const ALL: &'static [Libc] = &[Libc::Glibc, Libc::Musl];

    /// The name used in keys and file names
    pub fn as_str(self) -> &'static str {
        match self {
            Libc::Glibc => "glibc",
            Libc::Musl => "musl",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Libc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DistError;
    fn from_str(s: &str) -> DistResult<Self> {
        match s {
            "darwin" | "macos" => Ok(Platform::Darwin),
            "linux" => Ok(Platform::Linux),
            "win32" | "windows" => Ok(Platform::Win32),
            _ => Err(DistError::UnknownSelector {
                kind: "platform",
                value: s.to_owned(),
                expected: "darwin, linux, win32",
            }),
        }
    }
}

impl FromStr for Arch {
    type Err = DistError;
    fn from_str(s: &str) -> DistResult<Self> {
        match s {
            "x64" | "x86_64" => Ok(Arch::X64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            _ => Err(DistError::UnknownSelector {
                kind: "arch",
                value: s.to_owned(),
                expected: "x64, arm64",
            }),
        }
    }
}

impl FromStr for Libc {
    type Err = DistError;
    fn from_str(s: &str) -> DistResult<Self> {
        match s {
            "glibc" | "gnu" => Ok(Libc::Glibc),
            "musl" => Ok(Libc::Musl),
            _ => Err(DistError::UnknownSelector {
                kind: "libc",
                value: s.to_owned(),
                expected: "glibc, musl",
            }),
        }
    }
}

/// Compute the key used both for asset lookup and as a cache directory name
///
/// `"platform-arch"`, or `"platform-arch-libc"` when a libc is given.
pub fn resolve_platform_arch_key(platform: Platform, arch: Arch, libc: Option<Libc>) -> String {
    match libc {
        Some(libc) => format!("{platform}-{arch}-{libc}"),
        None => format!("{platform}-{arch}"),
    }
}

/// One platform/arch/libc combination we produce an executable for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    /// The os family
    pub platform: Platform,
    /// The cpu architecture
    pub arch: Arch,
    /// The libc, only ever Some on linux
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libc: Option<Libc>,
}

impl BuildTarget {
    /// Make a target, normalizing libc: dropped on platforms that don't have
    /// a choice, defaulted on the ones that do
    pub fn new(platform: Platform, arch: Arch, libc: Option<Libc>) -> Self {
        let libc = match platform.default_libc() {
            Some(default) => Some(libc.unwrap_or(default)),
            None => None,
        };
        Self {
            platform,
            arch,
            libc,
        }
    }

    /// The machine we're running on
    pub fn host() -> Option<Self> {
        let platform = Platform::host()?;
        let arch = Arch::host()?;
        let libc = if platform == Platform::Linux && host_is_musl() {
            Some(Libc::Musl)
        } else {
            None
        };
        Some(Self::new(platform, arch, libc))
    }

    /// Whether this target uses something other than its platform's default libc
    pub fn has_nondefault_libc(&self) -> bool {
        self.libc.is_some() && self.libc != self.platform.default_libc()
    }

    /// The key used for asset lookup and the per-target cache directory
    ///
    /// The platform's default libc is left implicit, so `linux-x64` means glibc.
    pub fn key(&self) -> String {
        let libc = if self.has_nondefault_libc() {
            self.libc
        } else {
            None
        };
        resolve_platform_arch_key(self.platform, self.arch, libc)
    }

    /// The file name of the executable produced for this target
    pub fn output_file_name(&self, product: &str) -> String {
        format!(
            "{product}-{}-{}{}",
            self.platform,
            self.arch,
            self.platform.exe_suffix()
        )
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(target_os = "linux")]
fn host_is_musl() -> bool {
    cfg!(target_env = "musl")
}

#[cfg(not(target_os = "linux"))]
fn host_is_musl() -> bool {
    false
}

/// Everything we know how to build
///
/// There's no windows-on-arm runtime upstream (yet), so that one's left out.
pub fn supported_targets() -> Vec<BuildTarget> {
    let mut targets = vec![];
    for &platform in Platform::ALL {
        for &arch in Arch::ALL {
            if platform == Platform::Win32 && arch == Arch::Arm64 {
                continue;
            }
            if platform == Platform::Linux {
                for &libc in Libc::ALL {
                    targets.push(BuildTarget::new(platform, arch, Some(libc)));
                }
            } else {
                targets.push(BuildTarget::new(platform, arch, None));
            }
        }
    }
    targets
}

/// Which targets a caller wants
///
/// Each unset field matches everything. With everything unset and `all`
/// false, we pick the host target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSelection {
    /// Every supported target, ignoring everything else
    pub all: bool,
    /// Only these platforms
    pub platforms: Vec<Platform>,
    /// Only these architectures
    pub arches: Vec<Arch>,
    /// Only these libcs
    ///
    /// Platforms without a libc only survive this filter when `platforms`
    /// names them, so a libc on its own selects linux targets.
    pub libcs: Vec<Libc>,
}

impl TargetSelection {
    /// Does this selection have no criteria at all?
    pub fn is_empty(&self) -> bool {
        !self.all && self.platforms.is_empty() && self.arches.is_empty() && self.libcs.is_empty()
    }

    fn matches(&self, target: &BuildTarget) -> bool {
        if self.all {
            return true;
        }
        let platform_ok = self.platforms.is_empty() || self.platforms.contains(&target.platform);
        let arch_ok = self.arches.is_empty() || self.arches.contains(&target.arch);
        let libc_ok = self.libcs.is_empty()
            || match target.libc {
                Some(libc) => self.libcs.contains(&libc),
                None => !self.platforms.is_empty(),
            };
        platform_ok && arch_ok && libc_ok
    }

    /// Filter the support table down to what was asked for
    pub fn select(&self) -> DistResult<Vec<BuildTarget>> {
        if self.is_empty() {
            return match BuildTarget::host() {
                Some(host) => Ok(vec![host]),
                None => Err(DistError::NoTargetsSelected {
                    selection: "host".to_owned(),
                }),
            };
        }
        let selected = supported_targets()
            .into_iter()
            .filter(|t| self.matches(t))
            .collect::<Vec<_>>();
        if selected.is_empty() {
            return Err(DistError::NoTargetsSelected {
                selection: self.to_string(),
            });
        }
        Ok(selected)
    }
}

impl fmt::Display for TargetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use itertools::Itertools;
        if self.all {
            return f.write_str("all");
        }
        let mut parts = vec![];
        if !self.platforms.is_empty() {
            parts.push(format!("platform={}", self.platforms.iter().join(",")));
        }
        if !self.arches.is_empty() {
            parts.push(format!("arch={}", self.arches.iter().join(",")));
        }
        if !self.libcs.is_empty() {
            parts.push(format!("libc={}", self.libcs.iter().join(",")));
        }
        f.write_str(&parts.join(" "))
    }
}
