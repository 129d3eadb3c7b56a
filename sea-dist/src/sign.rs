//! Ad-hoc code signing for macOS executables
//!
//! Injecting a blob invalidates whatever signature the base runtime had, and
//! Apple Silicon refuses to run unsigned code, so every darwin output gets a
//! fresh ad-hoc signature. On a Mac we use the system `codesign`; anywhere
//! else we need the (optional, cached) `rcodesign` tool.

use axoprocess::Cmd;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::errors::{DistError, DistResult};
use crate::platform::{BuildTarget, Platform};
use crate::process::run_tool;

/// Where macOS keeps its signer
pub const SYSTEM_CODESIGN: &str = "/usr/bin/codesign";

/// Something that can produce an ad-hoc signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signer {
    /// Apple's codesign(1)
    Codesign(Utf8PathBuf),
    /// The portable rcodesign
    Rcodesign(Utf8PathBuf),
}

/// Signing capability for this run
#[derive(Debug, Clone, Default)]
pub struct Signing {
    signer: Option<Signer>,
}

impl Signing {
    /// Figure out what we can sign with
    ///
    /// `rcodesign` is the cached portable signer, if warming found one.
    pub fn detect(rcodesign: Option<Utf8PathBuf>) -> Self {
        let system = Utf8Path::new(SYSTEM_CODESIGN);
        if Platform::host() == Some(Platform::Darwin) && system.is_file() {
            return Self::with_signer(Some(Signer::Codesign(system.to_owned())));
        }
        Self::with_signer(rcodesign.filter(|p| p.is_file()).map(Signer::Rcodesign))
    }

    /// Use exactly this signer (or none)
    pub fn with_signer(signer: Option<Signer>) -> Self {
        if let Some(signer) = &signer {
            debug!("signing with {signer:?}");
        }
        Self { signer }
    }

    /// The signer we'd use
    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Drop the base runtime's signature before patching it
    ///
    /// Only codesign can do this, and only darwin targets have one. Without
    /// codesign the injector's own Mach-O handling has to cope.
    pub fn strip(&self, file: &Utf8Path, target: &BuildTarget) -> DistResult<()> {
        if !target.platform.requires_signing() {
            return Ok(());
        }
        let Some(Signer::Codesign(codesign)) = &self.signer else {
            return Ok(());
        };
        let mut cmd = Cmd::new(codesign, format!("remove signature from {file}"));
        cmd.arg("--remove-signature").arg(file);
        let out = run_tool(&mut cmd)?;
        if !out.success() {
            return Err(signing_error(file, out));
        }
        Ok(())
    }

    /// Sign `file` if `target` needs it, returning whether we did
    pub fn sign(&self, file: &Utf8Path, target: &BuildTarget) -> DistResult<bool> {
        if !target.platform.requires_signing() {
            return Ok(false);
        }
        match &self.signer {
            Some(Signer::Codesign(codesign)) => {
                let mut cmd = Cmd::new(codesign, format!("ad-hoc sign {file}"));
                cmd.arg("--sign").arg("-").arg("--force").arg(file);
                let out = run_tool(&mut cmd)?;
                if !out.success() {
                    return Err(signing_error(file, out));
                }

                let mut cmd = Cmd::new(codesign, format!("verify signature of {file}"));
                cmd.arg("--verify").arg(file);
                let out = run_tool(&mut cmd)?;
                if !out.success() {
                    return Err(signing_error(file, out));
                }
            }
            Some(Signer::Rcodesign(rcodesign)) => {
                let mut cmd = Cmd::new(rcodesign, format!("ad-hoc sign {file}"));
                cmd.arg("sign").arg(file);
                let out = run_tool(&mut cmd)?;
                if !out.success() {
                    return Err(signing_error(file, out));
                }
            }
            None => {
                return Err(DistError::MissingSigningTool {
                    target: target.to_string(),
                })
            }
        }
        info!("signed {file}");
        Ok(true)
    }
}

fn signing_error(file: &Utf8Path, out: crate::process::ToolOutput) -> DistError {
    DistError::Signing {
        file: file.to_owned(),
        exit: out.exit_description(),
        stderr: out.diagnostics(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;

    #[test]
    fn only_darwin_needs_a_signer() {
        let signing = Signing::with_signer(None);
        let linux = BuildTarget::new(Platform::Linux, Arch::X64, None);
        let mac = BuildTarget::new(Platform::Darwin, Arch::Arm64, None);
        assert!(!signing.sign(Utf8Path::new("/nope"), &linux).unwrap());
        assert!(matches!(
            signing.sign(Utf8Path::new("/nope"), &mac),
            Err(DistError::MissingSigningTool { .. })
        ));
        // stripping without codesign is a no-op rather than an error
        signing.strip(Utf8Path::new("/nope"), &mac).unwrap();
    }

    #[test]
    fn missing_rcodesign_is_not_a_signer() {
        if Platform::host() == Some(Platform::Darwin) {
            return;
        }
        let signing = Signing::detect(Some("/definitely/not/rcodesign".into()));
        assert_eq!(signing.signer(), None);
    }
}
