use crate::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Site-specific selector configuration for the login flow
#[derive(Debug, Clone, Deserialize)]
pub struct SiteProfile {
    /// Login page, relative to the course base URL (or absolute)
    #[serde(rename = "login-path", default = "default_login_path")]
    pub login_path: String,

    #[serde(rename = "username-selector", default = "default_username_selector")]
    pub username_selector: String,

    #[serde(rename = "password-selector", default = "default_password_selector")]
    pub password_selector: String,

    #[serde(rename = "submit-selector", default = "default_submit_selector")]
    pub submit_selector: String,

    /// Element that only exists once logged in
    #[serde(rename = "logged-in-selector")]
    pub logged_in_selector: String,

    /// Try the key-by-key scripted login before the manual flow
    #[serde(rename = "scripted-login", default)]
    pub scripted_login: bool,

    #[serde(rename = "selector-timeout-ms", default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_username_selector() -> String {
    "input[type=email], input[name=username]".to_string()
}

fn default_password_selector() -> String {
    "input[type=password]".to_string()
}

fn default_submit_selector() -> String {
    "button[type=submit]".to_string()
}

fn default_selector_timeout_ms() -> u64 {
    15_000
}

impl SiteProfile {
    /// Loads and validates a site profile from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses and validates a site profile from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let profile: SiteProfile = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let selectors = [
            ("username-selector", &self.username_selector),
            ("password-selector", &self.password_selector),
            ("submit-selector", &self.submit_selector),
            ("logged-in-selector", &self.logged_in_selector),
        ];
        for (name, value) in selectors {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
            }
        }

        if self.selector_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "selector-timeout-ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    /// Resolves the login page against a course base URL
    pub fn login_url(&self, base_url: &str) -> Result<url::Url, url::ParseError> {
        url::Url::parse(base_url)?.join(&self.login_path)
    }
}

/// Login credentials for one course
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_profile() {
        let profile = SiteProfile::parse(r#"logged-in-selector = ".dashboard""#).unwrap();
        assert_eq!(profile.login_path, "/login");
        assert_eq!(profile.submit_selector, "button[type=submit]");
        assert!(!profile.scripted_login);
        assert_eq!(profile.selector_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_missing_logged_in_selector_is_rejected() {
        assert!(matches!(
            SiteProfile::parse(r#"login-path = "/signin""#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        let result = SiteProfile::parse(
            r#"
logged-in-selector = ".dashboard"
submit-selector = "  "
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_login_url_resolution() {
        let profile = SiteProfile::parse(
            r##"
login-path = "/users/sign_in"
logged-in-selector = "#nav"
"##,
        )
        .unwrap();

        assert_eq!(
            profile.login_url("https://school.example.com/courses").unwrap().as_str(),
            "https://school.example.com/users/sign_in"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
