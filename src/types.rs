//! Type-safe platform and logging option types
//!
//! A nightly platform string such as `x86_64-centos7-gcc8-opt` is parsed into
//! closed enumerations so an unsupported component fails at start-up rather
//! than as a missing top package later on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

/// CPU architecture of the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Binary {
    #[strum(serialize = "x86_64")]
    X86_64,
}

/// Operating system of the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Os {
    Slc6,
    Centos7,
}

/// Compiler used for the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Compiler {
    Gcc49,
    Gcc62,
    Gcc8,
    Clang10,
}

/// Optimised or debug build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Build {
    Opt,
    Dbg,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform {0:?} must have the form <binary>-<os>-<compiler>-<build>")]
    Shape(String),

    #[error("platform {platform:?}: unknown {part} {value:?} (expected one of: {allowed})")]
    Unknown {
        platform: String,
        part: &'static str,
        value: String,
        allowed: String,
    },
}

/// `<binary>-<os>-<compiler>-<build>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub binary: Binary,
    pub os: Os,
    pub compiler: Compiler,
    pub build: Build,
}

fn parse_part<T>(platform: &str, part: &'static str, value: &str) -> Result<T, PlatformError>
where
    T: FromStr + IntoEnumIterator + fmt::Display,
{
    value.parse::<T>().map_err(|_| PlatformError::Unknown {
        platform: platform.to_string(),
        part,
        value: value.to_string(),
        allowed: T::iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "),
    })
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let [binary, os, compiler, build] = parts.as_slice() else {
            return Err(PlatformError::Shape(s.to_string()));
        };

        Ok(Self {
            binary: parse_part(s, "binary", binary)?,
            os: parse_part(s, "os", os)?,
            compiler: parse_part(s, "compiler", compiler)?,
            build: parse_part(s, "build", build)?,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.binary, self.os, self.compiler, self.build)
    }
}

impl Serialize for Platform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        let p: Platform = "x86_64-centos7-gcc8-opt".parse().unwrap();
        assert_eq!(p.binary, Binary::X86_64);
        assert_eq!(p.os, Os::Centos7);
        assert_eq!(p.compiler, Compiler::Gcc8);
        assert_eq!(p.build, Build::Opt);
        assert_eq!(p.to_string(), "x86_64-centos7-gcc8-opt");
    }

    #[test]
    fn test_platform_wrong_shape() {
        let err = "x86_64-centos7-gcc8".parse::<Platform>().unwrap_err();
        assert!(matches!(err, PlatformError::Shape(_)));
    }

    #[test]
    fn test_platform_unknown_component_names_allowed_values() {
        let err = "x86_64-centos7-gcc8-fast".parse::<Platform>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown build \"fast\""));
        assert!(msg.contains("opt, dbg"));
    }

    #[test]
    fn test_platform_serde_as_string() {
        let p: Platform = serde_json::from_str("\"x86_64-slc6-gcc62-dbg\"").unwrap();
        assert_eq!(p.os, Os::Slc6);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"x86_64-slc6-gcc62-dbg\"");
    }
}
