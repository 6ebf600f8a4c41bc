use std::collections::HashSet;
use tracing::debug;

/// An entry of `ayum list installed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Parse `ayum -q list installed`.
///
/// The text is split on the word `installed`; every chunk with exactly two
/// fields is `<name>.noarch <version>`.
pub fn parse_installed(text: &str) -> Vec<InstalledPackage> {
    text.split("installed")
        .filter_map(|chunk| {
            let fields: Vec<&str> = chunk.split_whitespace().collect();
            match fields.as_slice() {
                [name, version] => Some(InstalledPackage {
                    name: name.replacen(".noarch", "", 1),
                    version: version.to_string(),
                }),
                [] => None,
                _ => {
                    debug!(chunk = chunk.trim(), "skipping unexpected list output");
                    None
                }
            }
        })
        .collect()
}

/// `foo.rpm` -> `foo`
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Split requested files into (reinstall, install) by bare name, keeping request order.
pub fn classify(installed: &[InstalledPackage], requested: &[String]) -> (Vec<String>, Vec<String>) {
    let installed: HashSet<&str> = installed.iter().map(|p| p.name.as_str()).collect();

    requested
        .iter()
        .map(|r| strip_extension(r).to_string())
        .partition(|name| installed.contains(name.as_str()))
}
