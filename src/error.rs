use std::path::PathBuf;

use thiserror::Error;

use crate::aws_sso::ExchangeError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to determine the home directory")]
    HomeDirUnavailable,

    #[error("failed to read AWS config {}", .path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("AWS config {} contains no profiles", .path.display())]
    ConfigEmpty { path: PathBuf },

    #[error("no profile selected")]
    ProfileMissing,

    #[error("profile config `{key}` does not exist")]
    ConfigMissingProfile { key: String },

    #[error("profile config `{key}` has no `{field}`")]
    ProfileIncomplete { key: String, field: &'static str },

    #[error("failed to read AWS credentials {}", .path.display())]
    CredentialsUnreadable {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write AWS credentials {}", .path.display())]
    CredentialsUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't get the SSO access token for profile `{profile}`")]
    AccessTokenUnavailable { profile: String },

    #[error("failed to get role credentials for profile `{profile}`")]
    Exchange {
        profile: String,
        #[source]
        source: ExchangeError,
    },

    #[error("failed to run `{command}`")]
    Login {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("profile selection failed")]
    Prompt(#[from] dialoguer::Error),
}
