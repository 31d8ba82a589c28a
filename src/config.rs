//! Connection configuration for pbs-query.
//!
//! Configuration is merged from four layers, highest priority first:
//!
//! 1. CLI flags
//! 2. values from an optional dotenv-style file (`--env-file`)
//! 3. defaults derived from `PBS_REPOSITORY` / `PBS_PASSWORD`
//! 4. hardcoded defaults

use crate::error::{PbsError, Result};
use crate::modes::Mode;
use clap::Parser;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Endpoint used when neither flags nor environment name one.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1";

/// Default PBS API port.
pub const DEFAULT_PORT: u16 = 8007;

/// Repository strings look like `[user[!token]@]host`, e.g.
/// `monitor@pbs!query@pbs.example.com`.
const REPOSITORY_PATTERN: &str = r"((?P<user>\w+@\w+)(?:!(?P<token>\w+))?@)?(?P<host>\S+)";

/// Command-line arguments.
///
/// Connection flags are optional so the resolver can tell an explicitly
/// given value apart from a defaulted one.
#[derive(Parser, Debug)]
#[command(name = "pbs-query", version, about = "Query a Proxmox Backup Server and print JSON for monitoring")]
pub struct CliArgs {
    /// Read PBS_REPOSITORY / PBS_PASSWORD from this file
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<String>,

    /// PBS api endpoint host
    #[arg(short = 'e', long)]
    pub api_endpoint: Option<String>,

    /// PBS api endpoint port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub api_port: u16,

    /// PBS api user (root@pam, icinga2@pbs, ...)
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// PBS api user password
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// PBS api token name
    #[arg(long)]
    pub token_name: Option<String>,

    /// PBS api token value
    #[arg(long)]
    pub token_value: Option<String>,

    /// Don't verify the HTTPS certificate
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Query mode to run
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<Mode>,

    /// Exclude a datastore or datastore/namespace (repeatable)
    #[arg(short = 'E', long = "exclude", value_name = "NAME")]
    pub exclude: Vec<String>,
}

impl CliArgs {
    /// Datastores and datastore/namespace pairs to skip during enumeration.
    pub fn exclusion_set(&self) -> HashSet<String> {
        self.exclude.iter().cloned().collect()
    }
}

/// Resolved PBS connection settings.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// PBS host, or a full URL when a scheme is included
    pub endpoint: String,
    /// PBS API port (ignored when the endpoint carries a scheme)
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token_name: Option<String>,
    pub token_value: Option<String>,
    /// Verify TLS certificates (disabled by `--insecure`)
    pub verify_tls: bool,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("token_name", &self.token_name)
            .field("token_value", &self.token_value.as_ref().map(|_| "***REDACTED***"))
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

impl ConnectionConfig {
    /// Token credentials, when complete, take priority over the password.
    pub fn has_token_auth(&self) -> bool {
        matches!(
            (&self.token_name, &self.token_value),
            (Some(name), Some(value)) if !name.is_empty() && !value.is_empty()
        )
    }

    /// Base URL for API requests.
    ///
    /// An endpoint that already carries a scheme is used verbatim and the
    /// port flag is ignored.
    pub fn base_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("https://{}:{}", self.endpoint, self.port)
        }
    }
}

/// Snapshot of the environment variables the resolver consults.
///
/// Kept separate from `std::env` so resolution stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    /// `PBS_REPOSITORY`, format `[user[!token]@]host`
    pub repository: Option<String>,
    /// `PBS_PASSWORD`, default for both the password and the token value
    pub password: Option<String>,
}

impl EnvDefaults {
    pub fn from_process_env() -> Self {
        Self {
            repository: std::env::var("PBS_REPOSITORY").ok(),
            password: std::env::var("PBS_PASSWORD").ok(),
        }
    }
}

/// Pieces of a parsed repository string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryParts {
    pub host: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
}

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPOSITORY_PATTERN).expect("repository pattern compiles"))
}

/// Parse a repository string of the form `[user[!token]@]host`.
///
/// The search is unanchored; a string with no `user@` prefix yields only a
/// host. An unmatchable string yields all-`None`.
pub fn parse_repository(repository: &str) -> RepositoryParts {
    match repository_regex().captures(repository) {
        Some(captures) => RepositoryParts {
            host: captures.name("host").map(|m| m.as_str().to_string()),
            user: captures.name("user").map(|m| m.as_str().to_string()),
            token: captures.name("token").map(|m| m.as_str().to_string()),
        },
        None => RepositoryParts::default(),
    }
}

/// Merge CLI flags, env-file values and environment defaults into a final
/// [`ConnectionConfig`].
///
/// Missing credentials are not an error here; they surface at connect time.
pub fn resolve(args: &CliArgs, env: &EnvDefaults) -> Result<ConnectionConfig> {
    let mut endpoint = DEFAULT_ENDPOINT.to_string();
    let mut username = None;
    let mut token_name = None;

    if let Some(repository) = &env.repository {
        let parts = parse_repository(repository);
        if let Some(host) = parts.host {
            endpoint = host;
        }
        username = parts.user;
        token_name = parts.token;
    }

    if let Some(value) = &args.api_endpoint {
        endpoint = value.clone();
    }
    if let Some(value) = &args.username {
        username = Some(value.clone());
    }
    if let Some(value) = &args.token_name {
        token_name = Some(value.clone());
    }
    let mut password = args.password.clone().or_else(|| env.password.clone());
    let mut token_value = args.token_value.clone().or_else(|| env.password.clone());

    if let Some(path) = &args.env_file {
        let vars = load_env_file(path)?;
        if let Some(repository) = vars.get("PBS_REPOSITORY") {
            let parts = parse_repository(repository);
            // An explicit CLI endpoint wins over the file.
            if args.api_endpoint.is_none() || endpoint == DEFAULT_ENDPOINT {
                if let Some(host) = parts.host {
                    endpoint = host;
                }
            }
            if username.is_none() {
                username = parts.user;
            }
            if token_name.is_none() {
                token_name = parts.token;
            }
        }
        // Password and token value share one source field.
        if let Some(value) = vars.get("PBS_PASSWORD") {
            password = Some(value.clone());
            token_value = Some(value.clone());
        }
    }

    Ok(ConnectionConfig {
        endpoint,
        port: args.api_port,
        username,
        password,
        token_name,
        token_value,
        verify_tls: !args.insecure,
    })
}

/// Load key/value pairs from a dotenv-style file without touching the
/// process environment.
fn load_env_file(path: &str) -> Result<HashMap<String, String>> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| PbsError::Config(format!("cannot read env file {path}: {e}")))?;

    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) =
            item.map_err(|e| PbsError::Config(format!("invalid line in {path}: {e}")))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(argv: &[&str]) -> CliArgs {
        let mut full = vec!["pbs-query"];
        full.extend_from_slice(argv);
        CliArgs::parse_from(full)
    }

    fn write_env_file(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("pbs-query-{}-{name}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn parse_repository_full_form() {
        let parts = parse_repository("monitor@pbs!query@pbs.example.com");
        assert_eq!(parts.user.as_deref(), Some("monitor@pbs"));
        assert_eq!(parts.token.as_deref(), Some("query"));
        assert_eq!(parts.host.as_deref(), Some("pbs.example.com"));
    }

    #[test]
    fn parse_repository_without_token() {
        let parts = parse_repository("monitor@pbs@pbs.example.com");
        assert_eq!(parts.user.as_deref(), Some("monitor@pbs"));
        assert_eq!(parts.token, None);
        assert_eq!(parts.host.as_deref(), Some("pbs.example.com"));
    }

    #[test]
    fn parse_repository_host_only() {
        let parts = parse_repository("pbs.example.com");
        assert_eq!(parts.user, None);
        assert_eq!(parts.token, None);
        assert_eq!(parts.host.as_deref(), Some("pbs.example.com"));
    }

    #[test]
    fn resolve_hardcoded_defaults() {
        let config = resolve(&args(&[]), &EnvDefaults::default()).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.username, None);
        assert_eq!(config.password, None);
        assert!(config.verify_tls);
    }

    #[test]
    fn resolve_seeds_from_repository_env() {
        let env = EnvDefaults {
            repository: Some("monitor@pbs!query@pbs.internal".to_string()),
            password: Some("s3cret".to_string()),
        };
        let config = resolve(&args(&[]), &env).unwrap();
        assert_eq!(config.endpoint, "pbs.internal");
        assert_eq!(config.username.as_deref(), Some("monitor@pbs"));
        assert_eq!(config.token_name.as_deref(), Some("query"));
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.token_value.as_deref(), Some("s3cret"));
        assert!(config.has_token_auth());
    }

    #[test]
    fn cli_flags_override_env_defaults() {
        let env = EnvDefaults {
            repository: Some("monitor@pbs!query@pbs.internal".to_string()),
            password: Some("envpass".to_string()),
        };
        let config = resolve(
            &args(&["-e", "other.host", "-u", "root@pam", "-p", "clipass"]),
            &env,
        )
        .unwrap();
        assert_eq!(config.endpoint, "other.host");
        assert_eq!(config.username.as_deref(), Some("root@pam"));
        assert_eq!(config.password.as_deref(), Some("clipass"));
        // --token-value not given, so the env default still applies there
        assert_eq!(config.token_value.as_deref(), Some("envpass"));
    }

    #[test]
    fn env_file_endpoint_applies_when_cli_unset() {
        let path = write_env_file(
            "ep-unset",
            "PBS_REPOSITORY=monitor@pbs!query@file.host\n",
        );
        let config = resolve(&args(&["--env-file", &path]), &EnvDefaults::default()).unwrap();
        assert_eq!(config.endpoint, "file.host");
        assert_eq!(config.username.as_deref(), Some("monitor@pbs"));
        assert_eq!(config.token_name.as_deref(), Some("query"));
    }

    #[test]
    fn cli_endpoint_wins_over_env_file() {
        let path = write_env_file("ep-cli", "PBS_REPOSITORY=file.host\n");
        let config = resolve(
            &args(&["--env-file", &path, "-e", "cli.host"]),
            &EnvDefaults::default(),
        )
        .unwrap();
        assert_eq!(config.endpoint, "cli.host");
    }

    #[test]
    fn env_file_overwrites_default_cli_endpoint() {
        // Explicitly passing the hardcoded default still lets the file win.
        let path = write_env_file("ep-default", "PBS_REPOSITORY=file.host\n");
        let config = resolve(
            &args(&["--env-file", &path, "-e", DEFAULT_ENDPOINT]),
            &EnvDefaults::default(),
        )
        .unwrap();
        assert_eq!(config.endpoint, "file.host");
    }

    #[test]
    fn env_file_username_applies_only_when_unset() {
        let path = write_env_file("user", "PBS_REPOSITORY=monitor@pbs@file.host\n");
        let kept = resolve(
            &args(&["--env-file", &path, "-u", "root@pam"]),
            &EnvDefaults::default(),
        )
        .unwrap();
        assert_eq!(kept.username.as_deref(), Some("root@pam"));

        let filled = resolve(&args(&["--env-file", &path]), &EnvDefaults::default()).unwrap();
        assert_eq!(filled.username.as_deref(), Some("monitor@pbs"));
    }

    #[test]
    fn env_file_password_overwrites_both_fields() {
        let path = write_env_file("pass", "PBS_PASSWORD=filepass\n");
        let config = resolve(
            &args(&["--env-file", &path, "-p", "clipass", "--token-value", "clitoken"]),
            &EnvDefaults::default(),
        )
        .unwrap();
        assert_eq!(config.password.as_deref(), Some("filepass"));
        assert_eq!(config.token_value.as_deref(), Some("filepass"));
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let result = resolve(
            &args(&["--env-file", "/nonexistent/pbs-query.env"]),
            &EnvDefaults::default(),
        );
        assert!(matches!(result, Err(PbsError::Config(_))));
    }

    #[test]
    fn token_auth_requires_both_parts() {
        let mut config = resolve(&args(&["--token-name", "query"]), &EnvDefaults::default()).unwrap();
        assert!(!config.has_token_auth());
        config.token_value = Some("secret".to_string());
        assert!(config.has_token_auth());
        config.token_value = Some(String::new());
        assert!(!config.has_token_auth());
    }

    #[test]
    fn base_url_forms() {
        let mut config = resolve(&args(&["-e", "pbs.host"]), &EnvDefaults::default()).unwrap();
        assert_eq!(config.base_url(), "https://pbs.host:8007");
        config.endpoint = "http://127.0.0.1:1234".to_string();
        assert_eq!(config.base_url(), "http://127.0.0.1:1234");
    }

    #[test]
    fn debug_redacts_secrets() {
        let env = EnvDefaults {
            repository: None,
            password: Some("hunter2".to_string()),
        };
        let config = resolve(&args(&[]), &env).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn exclusion_set_collects_repeated_flags() {
        let parsed = args(&["-E", "store1", "-E", "store2/ns", "-E", "store1"]);
        let set = parsed.exclusion_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains("store1"));
        assert!(set.contains("store2/ns"));
    }
}
