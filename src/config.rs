use crate::error::{Error, Result};
use ini::{Ini, ParseOption, Properties};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "default";

/// Locations of the files shared with the AWS CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct AwsPaths {
    pub config_file: PathBuf,
    pub credentials_file: PathBuf,
    pub sso_cache_dir: PathBuf,
}

impl AwsPaths {
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir().ok_or(Error::HomeDirUnavailable)?;
        Ok(Self::resolve(&home, |name| std::env::var(name).ok()))
    }

    fn resolve<F>(home: &Path, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let aws_path = home.join(".aws");
        let config_file = var("AWS_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| aws_path.join("config"));
        let credentials_file = var("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| aws_path.join("credentials"));
        Self {
            config_file,
            credentials_file,
            sso_cache_dir: aws_path.join("sso").join("cache"),
        }
    }

    #[cfg(test)]
    pub fn under(dir: &Path) -> Self {
        Self::resolve(dir, |_| None)
    }
}

/// AWS files are read verbatim: backslashes and quotes are part of the value.
pub fn verbatim_parse() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    }
}

/// Config section key for a profile: `default` stays bare, everything else
/// lives under `profile <name>`.
pub fn config_key(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        String::from(DEFAULT_PROFILE)
    } else {
        format!("profile {profile}")
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct ProfileConfig {
    pub sso_region: Option<String>,
    pub sso_account_id: Option<String>,
    pub sso_role_name: Option<String>,
    pub sso_session: Option<String>,
}

impl ProfileConfig {
    fn from_section(prop: &Properties) -> Self {
        let get = |key: &str| prop.get(key).map(String::from);
        Self {
            sso_region: get("sso_region"),
            sso_account_id: get("sso_account_id"),
            sso_role_name: get("sso_role_name"),
            sso_session: get("sso_session"),
        }
    }
}

/// The three values needed to exchange an access token for role credentials.
#[derive(Debug, PartialEq, Clone)]
pub struct SsoParameters {
    pub sso_region: String,
    pub sso_account_id: String,
    pub sso_role_name: String,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Config {
    profiles: Vec<(String, ProfileConfig)>,
    session_regions: HashMap<String, String>,
}

impl Config {
    fn from_ini(ini: &Ini) -> Self {
        let sec_re = Regex::new("^(?P<kind>profile|sso-session) (?P<name>.+)$").unwrap();
        let mut config = Config::default();
        for (sec, prop) in ini.iter() {
            let Some(sec) = sec else {
                continue;
            };
            match sec_re.captures(sec) {
                Some(cap) if &cap["kind"] == "sso-session" => {
                    if let Some(region) = prop.get("sso_region") {
                        config
                            .session_regions
                            .insert(String::from(&cap["name"]), String::from(region));
                    }
                }
                _ => config
                    .profiles
                    .push((String::from(sec), ProfileConfig::from_section(prop))),
            }
        }
        config
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ProfileConfig> {
        self.profiles
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, profile)| profile)
    }

    /// Profile names as typed on the command line, in file order.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles
            .iter()
            .map(|(key, _)| key.strip_prefix("profile ").unwrap_or(key).to_string())
            .collect()
    }

    /// Looks up `key` and fills in its SSO parameters, taking `sso_region`
    /// from the referenced `sso-session` section when the profile omits it.
    pub fn sso_parameters(&self, key: &str) -> Result<SsoParameters> {
        let profile = self.get(key).ok_or_else(|| Error::ConfigMissingProfile {
            key: key.to_string(),
        })?;
        let missing = |field| Error::ProfileIncomplete {
            key: key.to_string(),
            field,
        };
        let sso_region = profile
            .sso_region
            .clone()
            .or_else(|| {
                profile
                    .sso_session
                    .as_ref()
                    .and_then(|session| self.session_regions.get(session).cloned())
            })
            .ok_or_else(|| missing("sso_region"))?;
        Ok(SsoParameters {
            sso_region,
            sso_account_id: profile
                .sso_account_id
                .clone()
                .ok_or_else(|| missing("sso_account_id"))?,
            sso_role_name: profile
                .sso_role_name
                .clone()
                .ok_or_else(|| missing("sso_role_name"))?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Config> {
        tracing::debug!(path = %self.path.display(), "reading AWS config");
        let ini = Ini::load_from_file_opt(&self.path, verbatim_parse()).map_err(|source| {
            Error::ConfigUnreadable {
                path: self.path.clone(),
                source,
            }
        })?;
        let config = Config::from_ini(&ini);
        if config.is_empty() {
            return Err(Error::ConfigEmpty {
                path: self.path.clone(),
            });
        }
        Ok(config)
    }
}
