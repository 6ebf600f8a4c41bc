//! Remote package source descriptors
//!
//! Each source is written as `<label>.repo` into the package manager's
//! repository configuration directory.

use std::fmt;
use std::path::Path;

const OFFLINE_BASE_URL: &str = "http://cern.ch/atlas-software-dist-eos/RPMs";
const TDAQ_BASE_URL: &str = "http://cern.ch/atlas-tdaq-sw/yum";
const LCG_URL: &str = "http://lcgpackages.web.cern.ch/lcgpackages/rpms";

/// Label of the source serving the nightly being installed
pub const NIGHTLY_REPO_LABEL: &str = "atlas-offline-nightly";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub label: String,
    pub name: String,
    pub url: String,
    pub prefix: Option<String>,
    pub enabled: bool,
}

impl RemoteRepo {
    pub fn new(label: &str, name: &str, url: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            name: name.to_string(),
            url: url.into(),
            prefix: None,
            enabled: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn file_name(&self) -> String {
        format!("{}.repo", self.label)
    }
}

impl fmt::Display for RemoteRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.label)?;
        writeln!(f, "name={}", self.name)?;
        writeln!(f, "baseurl={}", self.url)?;
        writeln!(f, "enabled={}", self.enabled)?;
        if let Some(prefix) = self.prefix.as_deref().filter(|p| !p.is_empty()) {
            writeln!(f, "prefix={}", prefix)?;
        }
        Ok(())
    }
}

/// Sources registered before configuring the package manager.
///
/// `rpm_src_dir` serves the nightly itself and `nightly_dir` is where its
/// packages are relocated to.
pub fn default_repos(install_base: &Path, rpm_src_dir: &Path, nightly_dir: &Path) -> Vec<RemoteRepo> {
    let tdaq = |path: &str| format!("{}/{}", TDAQ_BASE_URL, path);

    vec![
        RemoteRepo::new(
            "atlas-offline-data",
            "ATLAS offline data packages",
            format!("{}/data", OFFLINE_BASE_URL),
        ),
        RemoteRepo::new("lcg", "LCG Repository", LCG_URL)
            .with_prefix(install_base.join("sw/lcg/releases").to_string_lossy()),
        RemoteRepo::new(
            "tdaq-nightly",
            "Nightly snapshots of TDAQ releases",
            tdaq("tdaq/nightly"),
        ),
        RemoteRepo::new(
            "tdaq-testing",
            "Non-official updates and patches for TDAQ releases",
            tdaq("tdaq/testing"),
        ),
        RemoteRepo::new(
            "dqm-common-testing",
            "dqm-common projects",
            tdaq("dqm-common/testing"),
        ),
        RemoteRepo::new(
            "dqm-common-centos7",
            "dqm-common projects centos7",
            tdaq("dqm-common/centos7"),
        ),
        RemoteRepo::new(
            "tdaq-common-testing",
            "Non-official updates and patches for tdaq-common",
            tdaq("tdaq-common/testing"),
        ),
        RemoteRepo::new(
            "tdaq-common-centos7",
            "tdaq-common projects centos7",
            tdaq("tdaq-common/centos7"),
        ),
        RemoteRepo::new(
            NIGHTLY_REPO_LABEL,
            "ATLAS offline nightly releases",
            format!("file://{}", rpm_src_dir.display()),
        )
        .with_prefix(nightly_dir.to_string_lossy()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_render_with_prefix() {
        let repo = RemoteRepo::new("lcg", "LCG Repository", "http://lcg/rpms").with_prefix("/sw/lcg");
        assert_eq!(
            repo.to_string(),
            "[lcg]\nname=LCG Repository\nbaseurl=http://lcg/rpms\nenabled=true\nprefix=/sw/lcg\n"
        );
        assert_eq!(repo.file_name(), "lcg.repo");
    }

    #[test]
    fn test_render_without_prefix() {
        let mut repo = RemoteRepo::new("tdaq-nightly", "TDAQ", "http://tdaq");
        repo.enabled = false;
        assert_eq!(
            repo.to_string(),
            "[tdaq-nightly]\nname=TDAQ\nbaseurl=http://tdaq\nenabled=false\n"
        );
    }

    #[test]
    fn test_default_repos_have_unique_labels() {
        let repos = default_repos(
            Path::new("/cvmfs/atlas-nightlies.cern.ch/repo/sw"),
            Path::new("/eos/nightlies/21.2/2024-01-01T0200"),
            Path::new("/cvmfs/atlas-nightlies.cern.ch/repo/sw/21.2_AnalysisBase_x86_64-centos7-gcc8-opt/2024-01-01T0200"),
        );

        let labels: HashSet<_> = repos.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels.len(), repos.len());

        let nightly = repos.iter().find(|r| r.label == NIGHTLY_REPO_LABEL).unwrap();
        assert_eq!(nightly.url, "file:///eos/nightlies/21.2/2024-01-01T0200");
        assert!(nightly.prefix.as_deref().unwrap().ends_with("/2024-01-01T0200"));
    }
}
