use crate::aws_sso::{CredentialExchanger, ExchangerFactory};
use crate::config::{config_key, AwsPaths, Config, ConfigStore};
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::login::LoginInvoker;
use crate::token_cache::TokenCache;
use crate::ui::Logger;
use chrono::{DateTime, Utc};

#[derive(Debug, PartialEq, Clone)]
pub enum Outcome {
    /// Stored credentials were still valid and left untouched.
    Reused { expiration: DateTime<Utc> },
    /// New role credentials were fetched and written.
    Refreshed { expiration: DateTime<Utc> },
}

pub struct CredentialService<L, X, G> {
    config_store: ConfigStore,
    credential_store: CredentialStore,
    token_cache: TokenCache,
    login: L,
    exchangers: X,
    logger: G,
}

impl<L, X, G> CredentialService<L, X, G>
where
    L: LoginInvoker + Send + Sync,
    X: ExchangerFactory + Send + Sync,
    G: Logger,
{
    pub fn new(paths: &AwsPaths, login: L, exchangers: X, logger: G) -> Self {
        Self {
            config_store: ConfigStore::new(&paths.config_file),
            credential_store: CredentialStore::new(&paths.credentials_file),
            token_cache: TokenCache::new(&paths.sso_cache_dir),
            login,
            exchangers,
            logger,
        }
    }

    pub fn load_config(&self) -> Result<Config> {
        self.logger.info("CLI", "read local AWS config ...");
        self.config_store.load()
    }

    pub async fn start(&self, profile: Option<&str>, now: DateTime<Utc>) -> Result<Outcome> {
        let profile = profile.ok_or(Error::ProfileMissing)?;
        let config = self.load_config()?;
        let params = config.sso_parameters(&config_key(profile))?;

        self.logger.info("CLI", "read local AWS credentials ...");
        let mut creds = self.credential_store.read()?;
        tracing::debug!(profiles = ?creds.profiles(), "loaded credentials");
        match creds.get(profile) {
            Some(stored) if stored.is_valid_at(now) => {
                self.logger
                    .success("CLI", "** Credentials already exists **");
                return Ok(Outcome::Reused {
                    expiration: stored.expiration.unwrap_or(now),
                });
            }
            Some(stored) => {
                tracing::debug!(profile, expiration = ?stored.expiration, "stored credentials expired")
            }
            None => tracing::debug!(profile, "no stored credentials"),
        }

        let access_token = self.access_token(profile, now).await?;

        self.logger.info("CLI", "get AWS SSO Credentials ...");
        let exchanger = self.exchangers.for_region(&params.sso_region).await;
        let role_creds = match exchanger
            .exchange(&access_token, &params.sso_account_id, &params.sso_role_name)
            .await
        {
            Ok(role_creds) => role_creds,
            Err(source) => {
                self.logger.error("CLI", "Something went wrong");
                self.logger.error("CLI", &source.to_string());
                self.logger.error("CLI", "Please login to SSO manually");
                self.logger
                    .error("CLI", &format!("aws sso login --profile {profile}"));
                return Err(Error::Exchange {
                    profile: profile.to_string(),
                    source,
                });
            }
        };

        self.logger.info("CLI", "write AWS credentials to file ...");
        creds.set(profile, &role_creds);
        self.credential_store.write(&creds)?;
        self.logger.success(
            "CLI",
            &format!(
                "Done, check out {} file",
                self.credential_store.path().display()
            ),
        );
        Ok(Outcome::Refreshed {
            expiration: role_creds.expiration,
        })
    }

    /// Cached token if there is one, otherwise log in and look exactly once
    /// more.
    async fn access_token(&self, profile: &str, now: DateTime<Utc>) -> Result<String> {
        self.logger.info("CLI", "get local AWS SSO accessToken ...");
        if let Some(token) = self.token_cache.find_valid_token(now) {
            return Ok(token);
        }
        tracing::info!(profile, "no valid SSO access token cached, logging in");
        self.login.login(profile).await?;
        self.token_cache
            .find_valid_token(Utc::now().max(now))
            .ok_or_else(|| Error::AccessTokenUnavailable {
                profile: profile.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws_sso::{ExchangeError, RoleCredentials};
    use crate::ui::LabelKind;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    const CONFIG: &str = r#"
[default]
sso_region = eu-west-1
sso_account_id = 222222222222
sso_role_name = ReadOnly

[profile dev]
sso_region = us-east-1
sso_account_id = 111111111111
sso_role_name = Admin
"#;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        region: String,
        access_token: String,
        account_id: String,
        role_name: String,
    }

    #[derive(Clone, Default)]
    struct MockExchange {
        calls: Arc<Mutex<Vec<Call>>>,
        fail: bool,
    }

    struct BoundExchange {
        region: String,
        parent: MockExchange,
    }

    #[async_trait]
    impl ExchangerFactory for MockExchange {
        type Exchanger = BoundExchange;

        async fn for_region(&self, region: &str) -> BoundExchange {
            BoundExchange {
                region: region.to_string(),
                parent: self.clone(),
            }
        }
    }

    #[async_trait]
    impl CredentialExchanger for BoundExchange {
        async fn exchange(
            &self,
            access_token: &str,
            account_id: &str,
            role_name: &str,
        ) -> std::result::Result<RoleCredentials, ExchangeError> {
            self.parent.calls.lock().unwrap().push(Call {
                region: self.region.clone(),
                access_token: access_token.to_string(),
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            });
            if self.parent.fail {
                return Err(ExchangeError::MissingRoleCredentials);
            }
            Ok(role_credentials())
        }
    }

    /// Stands in for `aws sso login`; optionally drops a token into the cache.
    #[derive(Clone, Default)]
    struct MockLogin {
        cache_dir: PathBuf,
        produces_token: bool,
        invocations: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LoginInvoker for MockLogin {
        async fn login(&self, profile: &str) -> Result<()> {
            self.invocations.lock().unwrap().push(profile.to_string());
            if self.produces_token {
                write_token(&self.cache_dir, "fresh.json", "from-login");
            }
            Ok(())
        }
    }

    fn role_credentials() -> RoleCredentials {
        RoleCredentials {
            access_key_id: String::from("AKIANEW"),
            secret_access_key: String::from("new-secret"),
            session_token: String::from("new-session"),
            expiration: Utc.timestamp_millis_opt(4_102_444_800_000).unwrap(),
        }
    }

    fn write_token(dir: &Path, name: &str, token: &str) {
        fs::create_dir_all(dir).unwrap();
        let expires_at = (Utc::now() + Duration::hours(8)).format("%Y-%m-%dT%H:%M:%SUTC");
        let body = serde_json::json!({
            "accessToken": token,
            "expiresAt": expires_at.to_string(),
        });
        fs::write(dir.join(name), body.to_string()).unwrap();
    }

    /// Keeps every labelled line so tests can check what the user was told.
    #[derive(Clone, Default)]
    struct RecordingLogger {
        lines: Arc<Mutex<Vec<(LabelKind, String)>>>,
    }

    impl Logger for RecordingLogger {
        fn log(&self, kind: LabelKind, _source: &str, message: &str) {
            self.lines.lock().unwrap().push((kind, message.to_string()));
        }
    }

    struct Fixture {
        _home: tempfile::TempDir,
        paths: AwsPaths,
        exchange: MockExchange,
        login: MockLogin,
        logger: RecordingLogger,
    }

    impl Fixture {
        fn new(credentials: &str) -> Self {
            let home = tempfile::tempdir().unwrap();
            let paths = AwsPaths::under(home.path());
            fs::create_dir_all(paths.config_file.parent().unwrap()).unwrap();
            fs::write(&paths.config_file, CONFIG).unwrap();
            fs::write(&paths.credentials_file, credentials).unwrap();
            let login = MockLogin {
                cache_dir: paths.sso_cache_dir.clone(),
                ..MockLogin::default()
            };
            Self {
                _home: home,
                paths,
                exchange: MockExchange::default(),
                login,
                logger: RecordingLogger::default(),
            }
        }

        fn service(&self) -> CredentialService<MockLogin, MockExchange, RecordingLogger> {
            CredentialService::new(
                &self.paths,
                self.login.clone(),
                self.exchange.clone(),
                self.logger.clone(),
            )
        }

        fn errors(&self) -> Vec<String> {
            self.logger
                .lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(kind, _)| *kind == LabelKind::Error)
                .map(|(_, message)| message.clone())
                .collect()
        }

        fn calls(&self) -> Vec<Call> {
            self.exchange.calls.lock().unwrap().clone()
        }

        fn logins(&self) -> Vec<String> {
            self.login.invocations.lock().unwrap().clone()
        }

        fn credentials(&self) -> String {
            fs::read_to_string(&self.paths.credentials_file).unwrap()
        }
    }

    #[tokio::test]
    async fn test_refresh_with_cached_token() {
        let fixture = Fixture::new("[other]\naws_access_key_id = AKIAOTHER\n");
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        let outcome = fixture
            .service()
            .start(Some("dev"), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Refreshed {
                expiration: role_credentials().expiration
            }
        );
        assert_eq!(
            fixture.calls(),
            vec![Call {
                region: String::from("us-east-1"),
                access_token: String::from("cached-token"),
                account_id: String::from("111111111111"),
                role_name: String::from("Admin"),
            }]
        );
        assert!(fixture.logins().is_empty());
        assert!(fixture.errors().is_empty());

        let creds = CredentialStore::new(&fixture.paths.credentials_file)
            .read()
            .unwrap();
        let dev = creds.get("dev").unwrap();
        assert_eq!(dev.access_key_id.as_deref(), Some("AKIANEW"));
        assert_eq!(dev.secret_access_key.as_deref(), Some("new-secret"));
        assert_eq!(dev.session_token.as_deref(), Some("new-session"));
        assert_eq!(dev.expiration, Some(role_credentials().expiration));
        assert_eq!(
            creds.get("other").unwrap().access_key_id.as_deref(),
            Some("AKIAOTHER")
        );
        assert!(creds.get("profile dev").is_none());
    }

    #[tokio::test]
    async fn test_valid_stored_credentials_short_circuit() {
        let now = Utc::now();
        let expiration = now.timestamp_millis() + 3_600_000;
        let content = format!(
            "[dev]\naws_access_key_id = AKIAOLD\nexpiration = {expiration}\n"
        );
        let fixture = Fixture::new(&content);
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        let outcome = fixture.service().start(Some("dev"), now).await.unwrap();
        assert!(matches!(outcome, Outcome::Reused { .. }));
        assert!(fixture.calls().is_empty());
        assert!(fixture.logins().is_empty());
        assert_eq!(fixture.credentials(), content);
    }

    #[tokio::test]
    async fn test_expired_stored_credentials_refresh() {
        let now = Utc::now();
        let expiration = now.timestamp_millis() - 1;
        let fixture = Fixture::new(&format!(
            "[dev]\naws_access_key_id = AKIAOLD\nexpiration = {expiration}\n"
        ));
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        let outcome = fixture.service().start(Some("dev"), now).await.unwrap();
        assert!(matches!(outcome, Outcome::Refreshed { .. }));
        assert_eq!(fixture.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_default_profile_uses_bare_keys() {
        let fixture = Fixture::new("[default]\naws_access_key_id = AKIAOLD\n");
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        fixture
            .service()
            .start(Some("default"), Utc::now())
            .await
            .unwrap();
        let calls = fixture.calls();
        assert_eq!(calls[0].region, "eu-west-1");
        assert_eq!(calls[0].role_name, "ReadOnly");
        let creds = CredentialStore::new(&fixture.paths.credentials_file)
            .read()
            .unwrap();
        assert_eq!(creds.profiles(), vec!["default"]);
        assert_eq!(
            creds.get("default").unwrap().access_key_id.as_deref(),
            Some("AKIANEW")
        );
    }

    #[tokio::test]
    async fn test_login_then_refresh() {
        let mut fixture = Fixture::new("");
        fixture.login.produces_token = true;

        let outcome = fixture
            .service()
            .start(Some("dev"), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Refreshed { .. }));
        assert_eq!(fixture.logins(), vec!["dev"]);
        assert_eq!(fixture.calls()[0].access_token, "from-login");
        assert!(fixture.credentials().contains("[dev]"));
    }

    #[tokio::test]
    async fn test_login_without_token() {
        let fixture = Fixture::new("");
        fs::create_dir_all(&fixture.paths.sso_cache_dir).unwrap();
        fs::write(fixture.paths.sso_cache_dir.join("junk.json"), "{}").unwrap();

        let err = fixture
            .service()
            .start(Some("dev"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccessTokenUnavailable { profile } if profile == "dev"));
        assert_eq!(fixture.logins(), vec!["dev"]);
        assert!(fixture.calls().is_empty());
        assert_eq!(fixture.credentials(), "");
    }

    #[tokio::test]
    async fn test_exchange_failure_leaves_file_untouched() {
        let content = "[dev]\naws_access_key_id = AKIAOLD\n";
        let mut fixture = Fixture::new(content);
        fixture.exchange.fail = true;
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        let err = fixture
            .service()
            .start(Some("dev"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Exchange {
                source: ExchangeError::MissingRoleCredentials,
                ..
            }
        ));
        assert!(fixture
            .errors()
            .iter()
            .any(|line| line.contains("aws sso login --profile dev")));
        assert_eq!(fixture.credentials(), content);
    }

    #[tokio::test]
    async fn test_profile_errors() {
        let fixture = Fixture::new("");
        let service = fixture.service();
        assert!(matches!(
            service.start(None, Utc::now()).await,
            Err(Error::ProfileMissing)
        ));
        assert!(matches!(
            service.start(Some("prod"), Utc::now()).await,
            Err(Error::ConfigMissingProfile { key }) if key == "profile prod"
        ));
        assert!(fixture.logins().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_file() {
        let fixture = Fixture::new("");
        fs::remove_file(&fixture.paths.credentials_file).unwrap();
        write_token(&fixture.paths.sso_cache_dir, "a.json", "cached-token");

        let err = fixture
            .service()
            .start(Some("dev"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialsUnreadable { .. }));
        assert!(fixture.calls().is_empty());
    }
}
