#![deny(clippy::unwrap_used, clippy::expect_used)]

mod config_command;
pub mod login_cmd;
pub mod object_cmd;

use std::path::Path;

use adt_backend_client::CancellationToken;
use adt_backend_client::Session;
use adt_core::Config;
use adt_core::ConnectionConfig;
use adt_core::LifecycleOptions;
use adt_core::open_session;
use adt_login::default_resolver;
use adt_login::find_adt_home;
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::warn;

use crate::login_cmd::LoginArgs;
use crate::login_cmd::LogoutArgs;
use crate::object_cmd::ActivateArgs;
use crate::object_cmd::AtcArgs;
use crate::object_cmd::CheckArgs;
use crate::object_cmd::DeleteArgs;
use crate::object_cmd::ReadArgs;
use crate::object_cmd::SearchArgs;
use crate::object_cmd::WriteArgs;

/// Command-line client for ABAP Development Tools services.
///
/// Connections are configured in `$ADT_HOME/config.toml` (default
/// `~/.adt`); credentials come from `ADT_USERNAME`/`ADT_PASSWORD` or from
/// `adt login`.
#[derive(Debug, Parser)]
#[command(name = "adt", version, subcommand_required = true)]
pub struct Cli {
    /// Connection id from config.toml. Defaults to `default_connection`.
    #[arg(long, short = 'c', global = true)]
    pub connection: Option<String>,

    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Log in to the backend and report how the session was established.
    Conncheck,

    /// Store credentials for a connection in auth.json.
    Login(LoginArgs),

    /// Remove stored credentials for a connection.
    Logout(LogoutArgs),

    /// Repository quick search.
    Search(SearchArgs),

    /// Print an object's main source.
    Read(ReadArgs),

    /// Create the object if needed, write its source and activate it.
    Write(WriteArgs),

    /// Activate an object.
    Activate(ActivateArgs),

    /// Delete an object.
    Delete(DeleteArgs),

    /// Run the syntax check on an object.
    Check(CheckArgs),

    /// Run ATC on an object and list the findings.
    Atc(AtcArgs),

    /// Validate config.toml and print the resolved connections.
    Config,
}

/// Loaded configuration plus the connection this invocation works on.
pub struct CliContext {
    pub config: Config,
    connection_id: Option<String>,
    cancel: CancellationToken,
}

impl CliContext {
    pub fn load(connection_id: Option<String>, cancel: CancellationToken) -> anyhow::Result<Self> {
        let adt_home = find_adt_home().context("failed to locate ADT home")?;
        let config = Config::load(&adt_home)
            .with_context(|| format!("failed to load config from {}", adt_home.display()))?;
        Ok(Self {
            config,
            connection_id,
            cancel,
        })
    }

    pub fn adt_home(&self) -> &Path {
        &self.config.adt_home
    }

    pub fn connection(&self) -> anyhow::Result<&ConnectionConfig> {
        Ok(self.config.connection(self.connection_id.as_deref())?)
    }

    pub fn lifecycle_options(&self) -> anyhow::Result<LifecycleOptions> {
        Ok(self.connection()?.lifecycle_options(&self.config.lifecycle))
    }

    /// Session for the selected connection with credentials from the
    /// environment or auth.json.
    pub fn open_session(&self) -> anyhow::Result<Session> {
        let connection = self.connection()?;
        let resolver = default_resolver(self.adt_home());
        Ok(open_session(connection, &resolver, self.cancel.clone())?)
    }
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.subcommand, Subcommand::Config) {
        config_command::validate_config(true);
        return Ok(());
    }

    let ctx = CliContext::load(cli.connection, cancel_on_ctrl_c())?;
    match cli.subcommand {
        Subcommand::Conncheck => login_cmd::run_conncheck(&ctx).await,
        Subcommand::Login(args) => login_cmd::run_login(&ctx, args).await,
        Subcommand::Logout(args) => login_cmd::run_logout(&ctx, args),
        Subcommand::Search(args) => object_cmd::run_search(&ctx, args).await,
        Subcommand::Read(args) => object_cmd::run_read(&ctx, args).await,
        Subcommand::Write(args) => object_cmd::run_write(&ctx, args).await,
        Subcommand::Activate(args) => object_cmd::run_activate(&ctx, args).await,
        Subcommand::Delete(args) => object_cmd::run_delete(&ctx, args).await,
        Subcommand::Check(args) => object_cmd::run_check(&ctx, args).await,
        Subcommand::Atc(args) => object_cmd::run_atc(&ctx, args).await,
        Subcommand::Config => Ok(()),
    }
}

/// Token that fires on the first Ctrl-C. In-flight requests abort, but a
/// held lock is still released.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let output = serde_json::to_string_pretty(value)?;
    println!("{output}");
    Ok(())
}
