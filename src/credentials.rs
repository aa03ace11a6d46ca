use crate::aws_sso::RoleCredentials;
use crate::config::verbatim_parse;
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use ini::{EscapePolicy, Ini, Properties, WriteOption};
use std::io::Write;
use std::path::{Path, PathBuf};

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const SESSION_TOKEN: &str = "aws_session_token";
const EXPIRATION: &str = "expiration";

#[derive(Debug, PartialEq, Clone, Default)]
pub struct StoredCredential {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl StoredCredential {
    fn from_section(prop: &Properties) -> Self {
        Self {
            access_key_id: prop.get(ACCESS_KEY_ID).map(String::from),
            secret_access_key: prop.get(SECRET_ACCESS_KEY).map(String::from),
            session_token: prop.get(SESSION_TOKEN).map(String::from),
            expiration: prop.get(EXPIRATION).and_then(parse_expiration),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(expiration) if expiration > now)
    }
}

/// Expirations are written as epoch milliseconds; RFC 3339 is accepted too.
fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Full contents of the credentials file. Sections and keys this tool does
/// not manage are carried through untouched.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    ini: Ini,
}

impl CredentialFile {
    pub fn get(&self, profile: &str) -> Option<StoredCredential> {
        self.ini.section(Some(profile)).map(StoredCredential::from_section)
    }

    pub fn profiles(&self) -> Vec<String> {
        self.ini.sections().flatten().map(String::from).collect()
    }

    /// Replaces the whole section for `profile` with freshly issued credentials.
    pub fn set(&mut self, profile: &str, creds: &RoleCredentials) {
        self.ini.delete(Some(profile));
        self.ini
            .with_section(Some(profile))
            .set(ACCESS_KEY_ID, creds.access_key_id.as_str())
            .set(SECRET_ACCESS_KEY, creds.secret_access_key.as_str())
            .set(SESSION_TOKEN, creds.session_token.as_str())
            .set(EXPIRATION, creds.expiration.timestamp_millis().to_string());
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<CredentialFile> {
        tracing::debug!(path = %self.path.display(), "reading AWS credentials");
        let ini = Ini::load_from_file_opt(&self.path, verbatim_parse()).map_err(|source| {
            Error::CredentialsUnreadable {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(CredentialFile { ini })
    }

    /// Rewrites the credentials file in one step: the new content goes to a
    /// temporary file next to the target which is then renamed over it.
    pub fn write(&self, creds: &CredentialFile) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "writing AWS credentials");
        self.write_atomic(creds)
            .map_err(|source| Error::CredentialsUnwritable {
                path: self.path.clone(),
                source,
            })
    }

    fn write_atomic(&self, creds: &CredentialFile) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut buf = Vec::new();
        creds.ini.write_to_opt(
            &mut buf,
            WriteOption {
                escape_policy: EscapePolicy::Nothing,
                ..WriteOption::default()
            },
        )?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&buf)?;
        file.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
