//! Chaincode source locations by kind.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported chaincode type: [{0}]")]
pub struct UnsupportedKind(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaincodeKind {
    /// Test chaincode from the fixtures tree.
    Test,
    /// System chaincode plugins.
    System,
}

impl FromStr for ChaincodeKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(ChaincodeKind::Test),
            "system" => Ok(ChaincodeKind::System),
            other => Err(UnsupportedKind(other.to_string())),
        }
    }
}

/// Root directory chaincode packages of `kind` are built from.
pub fn deploy_path(
    workdir: &Path,
    kind: ChaincodeKind,
    test_cc_path: &Path,
    system_cc_path: &Path,
) -> PathBuf {
    match kind {
        ChaincodeKind::Test => workdir.join(test_cc_path),
        ChaincodeKind::System => workdir.join(system_cc_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_map_to_configured_paths() {
        let work = Path::new("/work");
        let test = deploy_path(
            work,
            "test".parse().expect("kind"),
            Path::new("fixtures/testdata"),
            Path::new("fixtures/scc"),
        );
        assert_eq!(test, PathBuf::from("/work/fixtures/testdata"));
        let system = deploy_path(
            work,
            ChaincodeKind::System,
            Path::new("fixtures/testdata"),
            Path::new("fixtures/scc"),
        );
        assert_eq!(system, PathBuf::from("/work/fixtures/scc"));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = "golang".parse::<ChaincodeKind>().unwrap_err();
        assert_eq!(err, UnsupportedKind("golang".to_string()));
        assert_eq!(err.to_string(), "unsupported chaincode type: [golang]");
    }
}
