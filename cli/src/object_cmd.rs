use std::io::IsTerminal;
use std::io::Read;
use std::path::PathBuf;

use adt_core::DEFAULT_ATC_VARIANT;
use adt_core::ObjectLifecycle;
use adt_core::WriteRequest;
use adt_core::decoders::Severity;
use anyhow::Context;
use anyhow::bail;
use serde::Serialize;

use crate::CliContext;
use crate::print_json;

/// Exit code when the backend reports errors for an otherwise completed
/// activation or check.
const EXIT_CODE_BACKEND_ERRORS: i32 = 2;

/// Object addressed by catalog type code and name.
#[derive(Debug, clap::Args)]
pub struct ObjectArgs {
    /// Object type code, e.g. `PROG/P` or `CLAS/OC`.
    pub object_type: String,

    /// Object name.
    pub name: String,
}

#[derive(Debug, clap::Parser)]
pub struct SearchArgs {
    /// Search pattern; `*` is a wildcard.
    pub query: String,

    /// Only return objects of this type.
    #[arg(long = "type", short = 't')]
    pub object_type: Option<String>,
}

#[derive(Debug, clap::Parser)]
pub struct ReadArgs {
    #[command(flatten)]
    pub object: ObjectArgs,
}

#[derive(Debug, clap::Parser)]
pub struct WriteArgs {
    #[command(flatten)]
    pub object: ObjectArgs,

    /// File with the new source. Reads stdin when omitted or `-`.
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Package for a newly created object. Defaults to the connection's
    /// `default_package`.
    #[arg(long, short = 'p')]
    pub package: Option<String>,

    /// Transport request recorded with the change.
    #[arg(long)]
    pub transport: Option<String>,

    /// Description of a newly created object.
    #[arg(long)]
    pub description: Option<String>,

    /// Leave the written source inactive.
    #[arg(long)]
    pub no_activate: bool,
}

#[derive(Debug, clap::Parser)]
pub struct ActivateArgs {
    #[command(flatten)]
    pub object: ObjectArgs,
}

#[derive(Debug, clap::Parser)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub object: ObjectArgs,

    /// Transport request recorded with the deletion.
    #[arg(long)]
    pub transport: Option<String>,
}

#[derive(Debug, clap::Parser)]
pub struct CheckArgs {
    #[command(flatten)]
    pub object: ObjectArgs,

    /// Check this source instead of the stored one (`-` for stdin).
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,
}

#[derive(Debug, clap::Parser)]
pub struct AtcArgs {
    #[command(flatten)]
    pub object: ObjectArgs,

    /// ATC check variant.
    #[arg(long, default_value = DEFAULT_ATC_VARIANT)]
    pub variant: String,
}

#[derive(Debug, Serialize)]
struct Deleted<'a> {
    object_type: &'a str,
    name: &'a str,
    deleted: bool,
}

pub async fn run_search(ctx: &CliContext, args: SearchArgs) -> anyhow::Result<()> {
    let mut session = ctx.open_session()?;
    let hits = ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .search(&args.query, args.object_type.as_deref())
        .await?;
    print_json(&hits)
}

pub async fn run_read(ctx: &CliContext, args: ReadArgs) -> anyhow::Result<()> {
    let ObjectArgs { object_type, name } = args.object;
    let mut session = ctx.open_session()?;
    let source = ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .read_source(&object_type, &name)
        .await?;
    print!("{source}");
    if !source.ends_with('\n') {
        println!();
    }
    Ok(())
}

pub async fn run_write(ctx: &CliContext, args: WriteArgs) -> anyhow::Result<()> {
    let connection = ctx.connection()?;
    let source = read_source_input(args.file.as_ref())?
        .context("no source given; pass --file or pipe the source on stdin")?;
    let request = WriteRequest {
        object_type: args.object.object_type,
        name: args.object.name,
        source,
        package: args
            .package
            .unwrap_or_else(|| connection.default_package.clone()),
        transport: args.transport,
        description: args.description,
    };

    let mut options = ctx.lifecycle_options()?;
    if args.no_activate {
        options.activate = false;
    }
    let mut session = ctx.open_session()?;
    let outcome = ObjectLifecycle::new(&mut session, &ctx.config.catalog, options)
        .write_object(&request)
        .await?;
    print_json(&outcome)?;
    if outcome.activation_error.is_some() {
        std::process::exit(EXIT_CODE_BACKEND_ERRORS);
    }
    Ok(())
}

pub async fn run_activate(ctx: &CliContext, args: ActivateArgs) -> anyhow::Result<()> {
    let ObjectArgs { object_type, name } = args.object;
    let mut session = ctx.open_session()?;
    let result = ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .activate_object(&object_type, &name)
        .await?;
    print_json(&result)?;
    if !result.success {
        std::process::exit(EXIT_CODE_BACKEND_ERRORS);
    }
    Ok(())
}

pub async fn run_delete(ctx: &CliContext, args: DeleteArgs) -> anyhow::Result<()> {
    let ObjectArgs { object_type, name } = args.object;
    let mut session = ctx.open_session()?;
    ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .delete_object(&object_type, &name, args.transport.as_deref())
        .await?;
    print_json(&Deleted {
        object_type: &object_type,
        name: &name,
        deleted: true,
    })
}

pub async fn run_check(ctx: &CliContext, args: CheckArgs) -> anyhow::Result<()> {
    let ObjectArgs { object_type, name } = args.object;
    let source = match args.file.as_ref() {
        Some(path) => read_source_input(Some(path))?,
        None => None,
    };
    let mut session = ctx.open_session()?;
    let messages = ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .check_syntax(&object_type, &name, source.as_deref())
        .await?;
    print_json(&messages)?;
    if messages.iter().any(|m| m.severity == Severity::Error) {
        std::process::exit(EXIT_CODE_BACKEND_ERRORS);
    }
    Ok(())
}

pub async fn run_atc(ctx: &CliContext, args: AtcArgs) -> anyhow::Result<()> {
    let ObjectArgs { object_type, name } = args.object;
    let mut session = ctx.open_session()?;
    let report = ObjectLifecycle::new(&mut session, &ctx.config.catalog, ctx.lifecycle_options()?)
        .run_atc(&object_type, &name, &args.variant)
        .await?;
    print_json(&report)
}

/// Source text from `path`, or from stdin for `None` and `-`. Returns
/// `None` when stdin is an interactive terminal.
fn read_source_input(path: Option<&PathBuf>) -> anyhow::Result<Option<String>> {
    match path {
        Some(path) if path.as_os_str() != "-" => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Some(source))
        }
        _ => {
            let mut stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Ok(None);
            }
            let mut buffer = String::new();
            stdin
                .read_to_string(&mut buffer)
                .context("failed to read source from stdin")?;
            if buffer.is_empty() {
                bail!("stdin was empty");
            }
            Ok(Some(buffer))
        }
    }
}
