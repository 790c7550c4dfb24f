use crate::domain::{StoreCode, Version};

const CREDENTIALS_FILE: &str = "config/users_pareto_nkl.json";
const MASTER_FILE: &str = "master_pareto_nkl.xlsx";
const RESULTS_DIR: &str = "hasil";
const RESULT_PREFIX: &str = "Hasil_";
const RESULT_EXT: &str = ".xlsx";

/// Object paths under the configured root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: String,
}

impl Layout {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn credentials_path(&self) -> String {
        format!("{}/{CREDENTIALS_FILE}", self.root)
    }

    pub fn master_path(&self) -> String {
        format!("{}/{MASTER_FILE}", self.root)
    }

    pub fn results_prefix(&self) -> String {
        format!("{}/{RESULTS_DIR}/", self.root)
    }

    pub fn result_path(&self, store: &StoreCode, version: &Version) -> String {
        format!(
            "{}{}",
            self.results_prefix(),
            Self::result_file_name(store, version)
        )
    }

    pub fn result_file_name(store: &StoreCode, version: &Version) -> String {
        format!("{RESULT_PREFIX}{store}{}", Self::version_suffix(version))
    }

    fn version_suffix(version: &Version) -> String {
        format!("_v{version}{RESULT_EXT}")
    }

    /// Store code of a result object that belongs to `version`, if any.
    pub fn parse_result_name(path: &str, version: &Version) -> Option<StoreCode> {
        let name = file_name(path);
        let code = name
            .strip_prefix(RESULT_PREFIX)?
            .strip_suffix(&Self::version_suffix(version))?;
        code.parse().ok()
    }

    /// Loose round match used by consolidation: the file name carries `v<version>`.
    pub fn mentions_version(path: &str, version: &Version) -> bool {
        file_name(path).contains(&format!("v{version}"))
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
