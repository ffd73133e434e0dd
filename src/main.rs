use std::time::Duration;

use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vidsum_backend_core::api::server::serve;
use vidsum_backend_core::auth::JwtAuthenticator;
use vidsum_backend_core::config::load_config;
use vidsum_backend_core::db::accounts::SqliteAccountStore;
use vidsum_backend_core::default_app_root;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("create-account")) {
        run_create_account_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if matches!(cli_args.first().map(String::as_str), Some("issue-token")) {
        run_issue_token_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }

    let config = load_config(default_app_root().as_path())?;
    serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CreateAccountCliArgs {
    email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IssueTokenCliArgs {
    user_id: String,
    ttl: Duration,
}

fn parse_create_account_cli_args(
    args: &[String],
) -> Result<CreateAccountCliArgs, Box<dyn std::error::Error>> {
    let mut email = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--email" => {
                email = Some(needs_value(i)?);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let email = email
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --email"))?;
    Ok(CreateAccountCliArgs { email })
}

fn parse_issue_token_cli_args(
    args: &[String],
) -> Result<IssueTokenCliArgs, Box<dyn std::error::Error>> {
    let mut user_id = None::<String>;
    let mut ttl = JwtAuthenticator::DEFAULT_TTL;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--user-id" => {
                user_id = Some(needs_value(i)?);
                i += 2;
            }
            "--ttl-secs" => {
                let raw = needs_value(i)?;
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    std::io::Error::other(format!("--ttl-secs must be a number, got '{raw}'"))
                })?;
                ttl = Duration::from_secs(secs);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let user_id = user_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --user-id"))?;
    Ok(IssueTokenCliArgs { user_id, ttl })
}

fn run_create_account_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_create_account_usage();
        return Ok(());
    }
    let parsed = parse_create_account_cli_args(args.as_slice())?;
    let config = load_config(default_app_root().as_path())?;
    let store = SqliteAccountStore::new(config.db_path);
    store.initialize()?;
    let account = store.create_account(parsed.email.as_str())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "success": true,
            "account": account
        }))?
    );
    Ok(())
}

fn run_issue_token_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_issue_token_usage();
        return Ok(());
    }
    let parsed = parse_issue_token_cli_args(args.as_slice())?;
    let config = load_config(default_app_root().as_path())?;
    let authenticator = JwtAuthenticator::from_secret(config.require_auth_secret()?.as_bytes());
    let token = authenticator.issue_token(parsed.user_id.as_str(), parsed.ttl)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "success": true,
            "user_id": parsed.user_id,
            "expires_in_secs": parsed.ttl.as_secs(),
            "token": token
        }))?
    );
    Ok(())
}

fn print_create_account_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- create-account --email <email>\n"
    ));
}

fn print_issue_token_usage() {
    eprintln!(
        concat!(
            "Usage:\n",
            "  cargo run -- issue-token --user-id <id> [--ttl-secs <seconds>]\n\n",
            "Requires VIDSUM_AUTH_SECRET (or auth_secret in config/vidsum.toml).\n"
        )
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_create_account_requires_email() {
        let err = parse_create_account_cli_args(&[]).expect_err("email should be required");
        assert!(err.to_string().contains("--email"));
    }

    #[test]
    fn parse_create_account_rejects_unknown_flags() {
        let err = parse_create_account_cli_args(&[String::from("--name"), String::from("x")])
            .expect_err("unknown flag should fail");
        assert!(err.to_string().contains("Unknown argument: --name"));
    }

    #[test]
    fn parse_issue_token_defaults_ttl() {
        let parsed =
            parse_issue_token_cli_args(&[String::from("--user-id"), String::from("user-1")])
                .expect("parse should succeed");
        assert_eq!(parsed.user_id, "user-1");
        assert_eq!(parsed.ttl, JwtAuthenticator::DEFAULT_TTL);
    }

    #[test]
    fn parse_issue_token_accepts_ttl_and_rejects_garbage() {
        let parsed = parse_issue_token_cli_args(&[
            String::from("--user-id"),
            String::from("user-1"),
            String::from("--ttl-secs"),
            String::from("90"),
        ])
        .expect("parse should succeed");
        assert_eq!(parsed.ttl, Duration::from_secs(90));

        let err = parse_issue_token_cli_args(&[
            String::from("--user-id"),
            String::from("user-1"),
            String::from("--ttl-secs"),
        ])
        .expect_err("missing value should fail");
        assert!(err.to_string().contains("Missing value for --ttl-secs"));

        assert!(parse_issue_token_cli_args(&[
            String::from("--user-id"),
            String::from("user-1"),
            String::from("--ttl-secs"),
            String::from("soon"),
        ])
        .is_err());
    }
}
