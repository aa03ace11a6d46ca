use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sso::error::SdkError;
use aws_sdk_sso::operation::get_role_credentials::GetRoleCredentialsError;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, PartialEq, Clone)]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl TryFrom<&aws_sdk_sso::types::RoleCredentials> for RoleCredentials {
    type Error = ExchangeError;

    fn try_from(value: &aws_sdk_sso::types::RoleCredentials) -> Result<Self, Self::Error> {
        let field = |v: Option<&str>, name| v.map(String::from).ok_or(ExchangeError::MissingField(name));
        Ok(Self {
            access_key_id: field(value.access_key_id(), "accessKeyId")?,
            secret_access_key: field(value.secret_access_key(), "secretAccessKey")?,
            session_token: field(value.session_token(), "sessionToken")?,
            expiration: Utc
                .timestamp_millis_opt(value.expiration())
                .single()
                .ok_or(ExchangeError::MissingField("expiration"))?,
        })
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("GetRoleCredentials request failed: {0}")]
    Sdk(#[source] Box<SdkError<GetRoleCredentialsError>>),

    #[error("response contains no role credentials")]
    MissingRoleCredentials,

    #[error("role credentials have no {0}")]
    MissingField(&'static str),
}

impl From<SdkError<GetRoleCredentialsError>> for ExchangeError {
    fn from(err: SdkError<GetRoleCredentialsError>) -> Self {
        Self::Sdk(Box::new(err))
    }
}

/// Trades an SSO access token for short-lived credentials of one role.
#[async_trait]
pub trait CredentialExchanger {
    async fn exchange(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, ExchangeError>;
}

/// Builds an exchanger bound to the SSO region of a profile.
#[async_trait]
pub trait ExchangerFactory {
    type Exchanger: CredentialExchanger + Send + Sync;

    async fn for_region(&self, region: &str) -> Self::Exchanger;
}

pub struct SSO {
    client: aws_sdk_sso::Client,
}

impl SSO {
    pub async fn connect(region: &str) -> Self {
        // GetRoleCredentials is authorized by the bearer token alone.
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .no_credentials()
            .load()
            .await;
        Self {
            client: aws_sdk_sso::Client::new(&aws_config),
        }
    }
}

#[async_trait]
impl CredentialExchanger for SSO {
    async fn exchange(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, ExchangeError> {
        tracing::info!(account_id, role_name, "fetching role credentials");
        let output = self
            .client
            .get_role_credentials()
            .access_token(access_token)
            .account_id(account_id)
            .role_name(role_name)
            .send()
            .await?;
        let creds = output
            .role_credentials()
            .ok_or(ExchangeError::MissingRoleCredentials)?;
        RoleCredentials::try_from(creds)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SsoFactory;

#[async_trait]
impl ExchangerFactory for SsoFactory {
    type Exchanger = SSO;

    async fn for_region(&self, region: &str) -> SSO {
        SSO::connect(region).await
    }
}
