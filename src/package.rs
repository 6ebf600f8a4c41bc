//! Package files and install groups

use std::path::{Path, PathBuf};

/// Offline packages carry this prefix; at least one is needed to split.
pub const OFFLINE_PREFIX: &str = "AtlasOffline";
/// HLT packages are installed as their own group.
pub const HLT_PREFIX: &str = "AtlasHLT";

/// One RPM file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub path: PathBuf,
    pub size: u64,
}

impl Package {
    /// Stat `path` for its size.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let size = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    /// File name, e.g. `AnalysisBase_21.2.100_x86_64-centos7-gcc8-opt.rpm`
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn name_starts_with(&self, prefix: &str) -> bool {
        self.name().starts_with(prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Ordered packages: top package first, then its local dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet(Vec<Package>);

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, package: Package) {
        self.0.push(package);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Package> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(Package::name).collect()
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.0.iter().map(|p| p.path.as_path()).collect()
    }

    pub fn any_starts_with(&self, prefix: &str) -> bool {
        self.0.iter().any(|p| p.name_starts_with(prefix))
    }

    /// Split into install groups.
    ///
    /// Cache nightlies always install as one group. Otherwise the set is split
    /// into offline and `AtlasHLT` groups, but only when the offline group holds
    /// an `AtlasOffline` package and the HLT group is non-empty.
    pub fn into_groups(self, cache_nightly: bool) -> Vec<PackageSet> {
        if cache_nightly {
            return vec![self];
        }

        let (hlt, offline): (Vec<Package>, Vec<Package>) = self
            .0
            .iter()
            .cloned()
            .partition(|p| p.name_starts_with(HLT_PREFIX));
        let offline = PackageSet(offline);
        let hlt = PackageSet(hlt);

        if offline.any_starts_with(OFFLINE_PREFIX) && !hlt.is_empty() {
            vec![offline, hlt]
        } else {
            vec![self]
        }
    }
}

impl FromIterator<Package> for PackageSet {
    fn from_iter<I: IntoIterator<Item = Package>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PackageSet {
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PackageSet {
    type Item = &'a Package;
    type IntoIter = std::slice::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
