use std::io::{self, BufRead, Read, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use hush_server::{
    crypto::{CryptoError, ShareCipher},
    store::{ExpiryUnit, RevealedSecret, SecretShare},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hush", about = "Hush: one-time secret sharing", version)]
struct Cli {
    /// Hush server URL (default: http://localhost:8080 or $HUSH_SERVER)
    #[arg(long, env = "HUSH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// API key for project routes ($HUSH_TOKEN)
    #[arg(long, env = "HUSH_TOKEN")]
    token: Option<String>,

    /// Project that owns the shares ($HUSH_PROJECT)
    #[arg(long, env = "HUSH_PROJECT")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Unit {
    Min,
    Hour,
    Day,
}

impl From<Unit> for ExpiryUnit {
    fn from(u: Unit) -> Self {
        match u {
            Unit::Min => ExpiryUnit::Min,
            Unit::Hour => ExpiryUnit::Hour,
            Unit::Day => ExpiryUnit::Day,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Hush HTTP server
    Serve {
        /// Port to listen on (default: $HUSH_PORT or 8080)
        #[arg(long, env = "HUSH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $HUSH_HOST or 0.0.0.0)
        #[arg(long, env = "HUSH_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Encrypt a secret locally and upload it; reads stdin when TEXT is omitted
    Share {
        text: Option<String>,
        /// How many units the share stays valid
        #[arg(long, default_value = "1")]
        expire: u32,
        #[arg(long, value_enum, default_value = "hour")]
        unit: Unit,
        /// Delete the share after its first reveal
        #[arg(long)]
        read_once: bool,
        /// Encrypt with a password the viewer must enter
        #[arg(long)]
        password: Option<String>,
        /// Path slug (random when omitted)
        #[arg(long)]
        slug: Option<String>,
    },
    /// Reveal and decrypt a share
    Open {
        slug: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// List the project's shares (metadata only)
    List,
    /// Change a share's expiry
    Extend {
        id: String,
        #[arg(long)]
        expire: u32,
        #[arg(long, value_enum)]
        unit: Unit,
    },
    /// Delete a share
    Delete { id: String },
    /// Delete every share of the project (run when the project is removed)
    Purge {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSH_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let api = Api::new(&cli.server);

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Share {
            text,
            expire,
            unit,
            read_once,
            password,
            slug,
        } => {
            let token = require(&cli.token, "--token / HUSH_TOKEN")?;
            let project = require(&cli.project, "--project / HUSH_PROJECT")?;
            let text = match text {
                Some(t) => t,
                None => read_stdin()?,
            };
            let share = ShareOptions {
                expire,
                unit: unit.into(),
                read_once,
                password,
                slug,
            };
            cmd_share(&api, &token, &project, &text, share).await
        }

        Commands::Open { slug, password } => cmd_open(&api, &slug, password).await,

        Commands::List => {
            let token = require(&cli.token, "--token / HUSH_TOKEN")?;
            let project = require(&cli.project, "--project / HUSH_PROJECT")?;
            cmd_list(&api, &token, &project).await
        }

        Commands::Extend { id, expire, unit } => {
            let token = require(&cli.token, "--token / HUSH_TOKEN")?;
            let project = require(&cli.project, "--project / HUSH_PROJECT")?;
            let updated = api
                .update_duration(&token, &project, &id, expire, unit.into())
                .await?;
            println!(
                "✓ {} now expires in {}",
                updated.path_slug,
                time_left(updated.expire_at_date, Utc::now())
            );
            Ok(())
        }

        Commands::Delete { id } => {
            let token = require(&cli.token, "--token / HUSH_TOKEN")?;
            let project = require(&cli.project, "--project / HUSH_PROJECT")?;
            let deleted = api.delete(&token, &project, &id).await?;
            println!("✓ deleted {}", deleted.path_slug);
            Ok(())
        }

        Commands::Purge { yes } => {
            let token = require(&cli.token, "--token / HUSH_TOKEN")?;
            let project = require(&cli.project, "--project / HUSH_PROJECT")?;
            if !yes {
                anyhow::bail!("purge deletes every share of {project}; rerun with --yes");
            }
            let deleted = api.purge(&token, &project).await?;
            println!("✓ purged {deleted} share(s) from {project}");
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = hush_server::ServerConfig {
        host,
        port,
        api_key: hush_server::resolve_api_key()?,
        ..Default::default()
    };

    hush_server::run(cfg).await
}

struct ShareOptions {
    expire: u32,
    unit: ExpiryUnit,
    read_once: bool,
    password: Option<String>,
    slug: Option<String>,
}

async fn cmd_share(
    api: &Api,
    token: &str,
    project: &str,
    text: &str,
    opts: ShareOptions,
) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("nothing to share");
    }
    let cipher = load_cipher()?;
    let encrypted = cipher.encrypt(text, opts.password.as_deref());
    let slug = opts.slug.unwrap_or_else(hush_server::slug::random_slug);
    let expire_at = opts
        .unit
        .expire_at(Utc::now(), opts.expire)
        .context("expiry is too far in the future")?;

    let body = json!({
        "secretContent": encrypted.cipher,
        "iv": encrypted.iv,
        "pathSlug": slug,
        "expireAtValue": opts.expire.to_string(),
        "expireAtUnit": opts.unit,
        "expireAtDate": expire_at.to_rfc3339(),
        "readOnlyOnce": opts.read_once,
        "isPasswordProtected": opts.password.as_deref().is_some_and(|p| !p.is_empty()),
    });
    let created = api.create(token, project, &body).await?;

    println!("✓ shared as {}", created.path_slug);
    println!("  open with: hush open {}", created.path_slug);
    Ok(())
}

async fn cmd_open(api: &Api, slug: &str, password: Option<String>) -> Result<()> {
    if !api.is_valid(slug).await? {
        anyhow::bail!("secret is invalid or has expired");
    }
    let revealed = api.reveal(slug).await?;
    let cipher = load_cipher()?;

    let stdin = io::stdin();
    let plaintext = decrypt_with_retry(&cipher, &revealed, password, || {
        eprint!("password: ");
        io::stderr().flush().ok();
        let mut line = String::new();
        let n = stdin.lock().read_line(&mut line)?;
        Ok((n > 0).then(|| line.trim_end_matches(['\r', '\n']).to_owned()))
    })?;
    println!("{plaintext}");
    Ok(())
}

async fn cmd_list(api: &Api, token: &str, project: &str) -> Result<()> {
    let shares = api.list(token, project).await?;
    if shares.is_empty() {
        println!("(no shares)");
        return Ok(());
    }
    let now = Utc::now();
    for s in &shares {
        let expiry = if s.expire_at_date > now {
            format!("expires in {}", time_left(s.expire_at_date, now))
        } else {
            "expired".to_string()
        };
        let mut flags = Vec::new();
        if s.read_only_once {
            flags.push("read-once");
        }
        if s.is_password_protected {
            flags.push("password");
        }
        if s.read {
            flags.push("read");
        }
        println!("  {} {}  {}  ({})", s.id, s.path_slug, expiry, flags.join(", "));
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

const PASSWORD_ATTEMPTS: usize = 3;

/// Decrypt a revealed share, asking for the password again after a failure.
/// The ciphertext is fetched once; a read-once share cannot be revealed twice.
fn decrypt_with_retry(
    cipher: &ShareCipher,
    revealed: &RevealedSecret,
    mut password: Option<String>,
    mut prompt: impl FnMut() -> Result<Option<String>>,
) -> Result<String> {
    if revealed.is_password_protected && password.is_none() {
        password = prompt()?;
    }
    for attempt in 1..=PASSWORD_ATTEMPTS {
        match cipher.decrypt(&revealed.cipher, &revealed.iv, password.as_deref()) {
            Ok(text) => return Ok(text),
            Err(CryptoError::DecryptionFailure)
                if revealed.is_password_protected && attempt < PASSWORD_ATTEMPTS =>
            {
                eprintln!("wrong password, try again");
                password = prompt()?;
                if password.is_none() {
                    break;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(CryptoError::DecryptionFailure.into())
}

/// Build the cipher from `HUSH_SHARING_PASSPHRASE_FILE` (preferred) or
/// `HUSH_SHARING_PASSPHRASE`. Creator and viewer must agree on this value.
fn load_cipher() -> Result<ShareCipher> {
    let fallback = match std::env::var("HUSH_SHARING_PASSPHRASE_FILE") {
        Ok(path) => hush_server::read_key_file(std::path::Path::new(&path))?,
        Err(_) => std::env::var("HUSH_SHARING_PASSPHRASE").context(
            "HUSH_SHARING_PASSPHRASE or HUSH_SHARING_PASSPHRASE_FILE environment variable is required",
        )?,
    };
    Ok(ShareCipher::new(fallback)?)
}

fn require(value: &Option<String>, what: &str) -> Result<String> {
    value
        .clone()
        .with_context(|| format!("{what} is required for this command"))
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("read secret from stdin")?;
    Ok(buf.trim_end_matches(['\r', '\n']).to_owned())
}

/// Coarse distance between `date` and `now`, e.g. `3d`, `5h`, `40s`.
fn time_left(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const UNITS: [(i64, &str); 5] = [
        (31_536_000, "y"),
        (2_592_000, "mo"),
        (86_400, "d"),
        (3_600, "h"),
        (60, "m"),
    ];
    let secs = (date - now).num_seconds().abs();
    for (size, suffix) in UNITS {
        if secs >= size {
            return format!("{}{suffix}", secs / size);
        }
    }
    format!("{secs}s")
}

// ── HTTP client ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct One {
    secret_sharing: SecretShare,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Many {
    secret_sharing: Vec<SecretShare>,
}

#[derive(Deserialize)]
struct Purged {
    deleted: usize,
}

struct Api {
    client: Client,
    base: String,
}

impl Api {
    fn new(server: &str) -> Self {
        Self {
            client: Client::new(),
            base: format!("{}/api/v1", server.trim_end_matches('/')),
        }
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/workspace/{project}/secret-sharing", self.base)
    }

    async fn create(&self, token: &str, project: &str, body: &Value) -> Result<SecretShare> {
        let resp = self
            .client
            .post(self.project_url(project))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .context("HTTP request failed")?;
        Ok(parse::<One>(resp).await?.secret_sharing)
    }

    async fn list(&self, token: &str, project: &str) -> Result<Vec<SecretShare>> {
        let resp = self
            .client
            .get(self.project_url(project))
            .bearer_auth(token)
            .send()
            .await
            .context("HTTP request failed")?;
        Ok(parse::<Many>(resp).await?.secret_sharing)
    }

    async fn update_duration(
        &self,
        token: &str,
        project: &str,
        id: &str,
        expire: u32,
        unit: ExpiryUnit,
    ) -> Result<SecretShare> {
        let expire_at = unit
            .expire_at(Utc::now(), expire)
            .context("expiry is too far in the future")?;
        let resp = self
            .client
            .put(format!("{}/{id}", self.project_url(project)))
            .bearer_auth(token)
            .json(&json!({
                "expireAtValue": expire.to_string(),
                "expireAtUnit": unit,
                "expireAtDate": expire_at.to_rfc3339(),
            }))
            .send()
            .await
            .context("HTTP request failed")?;
        Ok(parse::<One>(resp).await?.secret_sharing)
    }

    async fn delete(&self, token: &str, project: &str, id: &str) -> Result<SecretShare> {
        let resp = self
            .client
            .delete(format!("{}/{id}", self.project_url(project)))
            .bearer_auth(token)
            .send()
            .await
            .context("HTTP request failed")?;
        Ok(parse::<One>(resp).await?.secret_sharing)
    }

    async fn purge(&self, token: &str, project: &str) -> Result<usize> {
        let resp = self
            .client
            .delete(self.project_url(project))
            .bearer_auth(token)
            .send()
            .await
            .context("HTTP request failed")?;
        Ok(parse::<Purged>(resp).await?.deleted)
    }

    async fn is_valid(&self, slug: &str) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/secret-sharing/valid/{slug}", self.base))
            .send()
            .await
            .context("HTTP request failed")?;
        parse(resp).await
    }

    async fn reveal(&self, slug: &str) -> Result<RevealedSecret> {
        let resp = self
            .client
            .get(format!("{}/secret-sharing/reveal/{slug}", self.base))
            .send()
            .await
            .context("HTTP request failed")?;
        parse(resp).await
    }
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let json: Value = resp.json().await.unwrap_or_default();
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("server returned {status}: {error}");
    }
    resp.json().await.context("parse response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cipher() -> ShareCipher {
        ShareCipher::new("cli-test-fallback").unwrap()
    }

    fn revealed(text: &str, password: Option<&str>) -> RevealedSecret {
        let enc = cipher().encrypt(text, password);
        RevealedSecret {
            cipher: enc.cipher,
            iv: enc.iv,
            is_password_protected: password.is_some(),
        }
    }

    #[test]
    fn time_left_picks_largest_unit() {
        let now = Utc::now();
        assert_eq!(time_left(now + Duration::seconds(40), now), "40s");
        assert_eq!(time_left(now + Duration::minutes(12), now), "12m");
        assert_eq!(time_left(now + Duration::hours(5), now), "5h");
        assert_eq!(time_left(now + Duration::days(3), now), "3d");
        assert_eq!(time_left(now + Duration::days(400), now), "1y");
        assert_eq!(time_left(now - Duration::hours(2), now), "2h");
    }

    #[test]
    fn fallback_share_opens_without_prompt() {
        let r = revealed("hello", None);
        let text = decrypt_with_retry(&cipher(), &r, None, || panic!("no prompt expected"))
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn wrong_password_reprompts() {
        let r = revealed("hello", Some("right"));
        let mut answers = vec![Some("right".to_string()), Some("wrong".to_string())];
        let text =
            decrypt_with_retry(&cipher(), &r, None, || Ok(answers.pop().flatten())).unwrap();
        assert_eq!(text, "hello");
        assert!(answers.is_empty());
    }

    #[test]
    fn gives_up_after_attempts() {
        let r = revealed("hello", Some("right"));
        let mut prompts = 0;
        let err = decrypt_with_retry(&cipher(), &r, Some("nope".into()), || {
            prompts += 1;
            Ok(Some("still wrong".into()))
        })
        .unwrap_err();
        assert!(err.to_string().contains("wrong password"));
        assert_eq!(prompts, PASSWORD_ATTEMPTS - 1);
    }

    #[tokio::test]
    async fn open_flow_hits_valid_then_reveal() {
        let mock = MockServer::start().await;
        let r = revealed("top secret", None);
        Mock::given(method("GET"))
            .and(path("/api/v1/secret-sharing/valid/abc-def-ghi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/secret-sharing/reveal/abc-def-ghi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cipher": r.cipher,
                "iv": r.iv,
                "isPasswordProtected": false
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let api = Api::new(&mock.uri());
        assert!(api.is_valid("abc-def-ghi").await.unwrap());
        let got = api.reveal("abc-def-ghi").await.unwrap();
        assert_eq!(got, r);
    }

    #[tokio::test]
    async fn server_errors_surface_message() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/secret-sharing/reveal/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "secret is invalid or has expired"
            })))
            .mount(&mock)
            .await;

        let err = Api::new(&mock.uri()).reveal("gone").await.unwrap_err();
        assert!(err.to_string().contains("invalid or has expired"));
    }

    #[tokio::test]
    async fn list_sends_bearer_token() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workspace/p1/secret-sharing"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "secretSharing": [{
                    "id": "00000000-0000-0000-0000-000000000001",
                    "projectId": "p1",
                    "secretContent": "",
                    "iv": "aXY=",
                    "pathSlug": "abc-def-ghi",
                    "read": false,
                    "readOnlyOnce": true,
                    "isPasswordProtected": false,
                    "expireAtValue": 1,
                    "expireAtUnit": "hour",
                    "expireAtDate": "2030-01-01T00:00:00Z",
                    "lastReadAt": null,
                    "createdAt": "2029-12-31T23:00:00Z",
                    "updatedAt": "2029-12-31T23:00:00Z"
                }]
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let shares = Api::new(&mock.uri()).list("tok", "p1").await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].expire_at_unit, ExpiryUnit::Hour);
        assert!(shares[0].read_only_once);
    }

    #[tokio::test]
    async fn purge_deletes_project_collection() {
        let mock = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/workspace/p1/secret-sharing"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": 3 })))
            .expect(1)
            .mount(&mock)
            .await;

        assert_eq!(Api::new(&mock.uri()).purge("tok", "p1").await.unwrap(), 3);
    }
}
