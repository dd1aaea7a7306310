use std::io::IsTerminal;
use std::io::Read;

use adt_backend_client::AuthStrategy;
use adt_backend_client::Session;
use adt_login::ADT_PASSWORD_ENV_VAR;
use adt_login::BasicCredentials;
use adt_login::Credentials;
use adt_login::SessionCookie;
use adt_login::SessionSeed;
use adt_login::logout;
use adt_login::save_credentials;
use anyhow::Context;
use anyhow::bail;
use serde::Serialize;

use crate::CliContext;
use crate::print_json;

#[derive(Debug, clap::Parser)]
pub struct LoginArgs {
    /// Backend user. Defaults to the connection's `username`.
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Read the password from stdin instead of `ADT_PASSWORD`.
    #[arg(long)]
    pub password_stdin: bool,

    /// Cookie header of an already established session to reuse.
    #[arg(long, value_name = "HEADER")]
    pub cookie: Option<String>,

    /// CSRF token that belongs to `--cookie`.
    #[arg(long, requires = "cookie")]
    pub csrf_token: Option<String>,

    /// Store the credentials without logging in first.
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, clap::Parser)]
pub struct LogoutArgs {}

#[derive(Debug, Serialize)]
struct ConnectionStatus<'a> {
    connection: &'a str,
    base_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_strategy: Option<&'static str>,
    csrf_token: bool,
}

fn strategy_name(strategy: Option<AuthStrategy>) -> Option<&'static str> {
    strategy.map(|s| match s {
        AuthStrategy::Password => "password",
        AuthStrategy::PreAuthenticated => "pre_authenticated",
    })
}

pub async fn run_conncheck(ctx: &CliContext) -> anyhow::Result<()> {
    let connection = ctx.connection()?;
    let mut session = ctx.open_session()?;
    session
        .login()
        .await
        .with_context(|| format!("login to {} failed", connection.id))?;
    print_json(&ConnectionStatus {
        connection: &connection.id,
        base_url: session.base_url(),
        auth_strategy: strategy_name(session.auth_strategy()),
        csrf_token: session.csrf_token().is_some(),
    })
}

pub async fn run_login(ctx: &CliContext, args: LoginArgs) -> anyhow::Result<()> {
    let connection = ctx.connection()?;
    let username = args.username.clone().or_else(|| connection.username.clone());
    let password = if args.password_stdin {
        Some(read_password_from_stdin()?)
    } else {
        std::env::var(ADT_PASSWORD_ENV_VAR)
            .ok()
            .filter(|p| !p.is_empty())
    };
    let credentials = build_credentials(&args, username, password)?;

    let mut auth_strategy = None;
    if !args.no_verify {
        let mut session = Session::new(connection.options.clone(), credentials.clone())?;
        session
            .login()
            .await
            .with_context(|| format!("login to {} failed", connection.id))?;
        auth_strategy = strategy_name(session.auth_strategy());
    }

    save_credentials(ctx.adt_home(), &connection.id, credentials)
        .context("failed to write auth.json")?;
    eprintln!("Stored credentials for {}", connection.id);
    print_json(&ConnectionStatus {
        connection: &connection.id,
        base_url: &connection.options.base_url,
        auth_strategy,
        csrf_token: args.csrf_token.is_some(),
    })
}

pub fn run_logout(ctx: &CliContext, _args: LogoutArgs) -> anyhow::Result<()> {
    let connection = ctx.connection()?;
    let removed = logout(ctx.adt_home(), &connection.id).context("failed to update auth.json")?;
    if removed {
        eprintln!("Removed stored credentials for {}", connection.id);
    } else {
        eprintln!("No stored credentials for {}", connection.id);
    }
    Ok(())
}

fn build_credentials(
    args: &LoginArgs,
    username: Option<String>,
    password: Option<String>,
) -> anyhow::Result<Credentials> {
    let basic = match (username, password) {
        (Some(username), Some(password)) => Some(BasicCredentials::new(username, password)),
        (None, Some(_)) => bail!("a password was given but no username; pass --username"),
        _ => None,
    };

    let Some(cookie) = args.cookie.as_deref() else {
        return match basic {
            Some(basic) => Ok(Credentials {
                basic: Some(basic),
                session: None,
            }),
            None => bail!(
                "no password given; set {ADT_PASSWORD_ENV_VAR}, pass --password-stdin or --cookie"
            ),
        };
    };

    let cookies = SessionCookie::parse_header(cookie);
    if cookies.is_empty() {
        bail!("--cookie does not contain any name=value pair");
    }
    let credentials = Credentials::pre_authenticated(SessionSeed {
        cookies,
        csrf_token: args.csrf_token.clone(),
    });
    Ok(match basic {
        Some(basic) => credentials.with_fallback(basic),
        None => credentials,
    })
}

fn read_password_from_stdin() -> anyhow::Result<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("--password-stdin expects the password to be piped, e.g. `pass show sap | adt login --password-stdin`");
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .context("failed to read password from stdin")?;
    let password = buffer.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password provided via stdin");
    }
    Ok(password)
}
