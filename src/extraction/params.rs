use crate::{Result, RunnerError};
use std::fmt;
use std::path::PathBuf;

pub const ENV_RUN_ID: &str = "CRAWLER_RUN_ID";
pub const ENV_BASE_URL: &str = "CRAWLER_BASE_URL";
pub const ENV_USERNAME: &str = "CRAWLER_USERNAME";
pub const ENV_PASSWORD: &str = "CRAWLER_PASSWORD";
pub const ENV_OUTPUT_DIR: &str = "CRAWLER_OUTPUT_DIR";
pub const ENV_TARGET_URLS: &str = "CRAWLER_TARGET_URLS";
pub const ENV_SELECTORS_PATH: &str = "CRAWLER_SELECTORS_PATH";
pub const ENV_CONFIG_PATH: &str = "CRAWLER_CONFIG_PATH";
pub const ENV_ASSET_MANIFEST: &str = "CRAWLER_ASSET_MANIFEST";

/// Parameters of one extraction process
///
/// Passed from the supervisor to the child only through the child's
/// environment, so concurrent runs never share mutable configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractionParams {
    pub run_id: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub output_dir: PathBuf,
    pub target_urls: Vec<String>,
    pub selectors_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub asset_manifest: Option<PathBuf>,
}

impl ExtractionParams {
    /// Environment variables carrying these parameters
    pub fn to_env(&self) -> Result<Vec<(&'static str, String)>> {
        let mut env = vec![
            (ENV_RUN_ID, self.run_id.clone()),
            (ENV_BASE_URL, self.base_url.clone()),
            (ENV_USERNAME, self.username.clone()),
            (ENV_PASSWORD, self.password.clone()),
            (ENV_OUTPUT_DIR, self.output_dir.to_string_lossy().into_owned()),
            (ENV_TARGET_URLS, serde_json::to_string(&self.target_urls)?),
            (ENV_SELECTORS_PATH, self.selectors_path.to_string_lossy().into_owned()),
        ];
        if let Some(path) = &self.config_path {
            env.push((ENV_CONFIG_PATH, path.to_string_lossy().into_owned()));
        }
        if let Some(path) = &self.asset_manifest {
            env.push((ENV_ASSET_MANIFEST, path.to_string_lossy().into_owned()));
        }
        Ok(env)
    }

    /// Reads the parameters from this process's environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the parameters through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(RunnerError::MissingParameter(key))
        };

        let target_urls: Vec<String> = serde_json::from_str(&required(ENV_TARGET_URLS)?)?;

        Ok(Self {
            run_id: required(ENV_RUN_ID)?,
            base_url: required(ENV_BASE_URL)?,
            username: required(ENV_USERNAME)?,
            password: lookup(ENV_PASSWORD).unwrap_or_default(),
            output_dir: PathBuf::from(required(ENV_OUTPUT_DIR)?),
            target_urls,
            selectors_path: PathBuf::from(required(ENV_SELECTORS_PATH)?),
            config_path: lookup(ENV_CONFIG_PATH)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            asset_manifest: lookup(ENV_ASSET_MANIFEST)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }
}

impl fmt::Debug for ExtractionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionParams")
            .field("run_id", &self.run_id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("output_dir", &self.output_dir)
            .field("target_urls", &self.target_urls)
            .field("selectors_path", &self.selectors_path)
            .field("config_path", &self.config_path)
            .field("asset_manifest", &self.asset_manifest)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> ExtractionParams {
        ExtractionParams {
            run_id: "run-1".to_string(),
            base_url: "https://school.example.com".to_string(),
            username: "alice".to_string(),
            password: "secret".to_string(),
            output_dir: PathBuf::from("/tmp/outputs/run-1"),
            target_urls: vec![
                "https://school.example.com/course/1".to_string(),
                "https://school.example.com/course/2".to_string(),
            ],
            selectors_path: PathBuf::from("/etc/crawl-runner/site.toml"),
            config_path: Some(PathBuf::from("/etc/crawl-runner/config.toml")),
            asset_manifest: None,
        }
    }

    #[test]
    fn test_env_contract_is_symmetric() {
        let params = sample();
        let env: HashMap<&str, String> = params.to_env().unwrap().into_iter().collect();

        assert_eq!(
            env[ENV_TARGET_URLS],
            r#"["https://school.example.com/course/1","https://school.example.com/course/2"]"#
        );
        assert!(!env.contains_key(ENV_ASSET_MANIFEST));

        let parsed = ExtractionParams::from_lookup(|key| env.get(key).cloned()).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_missing_required_parameter() {
        let result = ExtractionParams::from_lookup(|key| {
            (key == ENV_TARGET_URLS).then(|| "[]".to_string())
        });
        assert!(matches!(result, Err(RunnerError::MissingParameter(ENV_RUN_ID))));
    }

    #[test]
    fn test_malformed_target_urls() {
        let mut env: HashMap<&str, String> = sample().to_env().unwrap().into_iter().collect();
        env.insert(ENV_TARGET_URLS, "not json".to_string());

        let result = ExtractionParams::from_lookup(|key| env.get(key).cloned());
        assert!(matches!(result, Err(RunnerError::Json(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("secret"));
    }
}
