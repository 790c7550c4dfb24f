use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pareto_nkl::app::{AdminToken, App, UserSession};
use pareto_nkl::config::ConfigLoader;
use pareto_nkl::domain::{GroupKey, StoreCode, UserId, Version};
use pareto_nkl::error::NklError;
use pareto_nkl::object_store::HttpObjectStore;
use pareto_nkl::output::{JsonOutput, LogSink};
use pareto_nkl::progress::StoreStatus;
use pareto_nkl::upstream::HttpUpstream;

type CliApp = App<HttpObjectStore, HttpUpstream>;

#[derive(Parser)]
#[command(name = "pareto-nkl")]
#[command(about = "Pareto NKL remark tracking: progress, input sessions and admin tools")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show completion progress for the current round")]
    Progress(ProgressArgs),
    #[command(about = "List area managers, or the stores of one area manager")]
    Stores(StoresArgs),
    #[command(about = "Register a new user")]
    Register(RegisterArgs),
    #[command(about = "Open the input session for a store")]
    Session(SessionArgs),
    #[command(about = "Submit remarks for a store")]
    Submit(SubmitArgs),
    #[command(about = "Administrative commands")]
    Admin(AdminArgs),
}

#[derive(Args)]
struct ProgressArgs {
    #[arg(long, value_enum, requires = "group")]
    pending: Option<GroupKey>,

    #[arg(long)]
    group: Option<String>,
}

#[derive(Args)]
struct StoresArgs {
    #[arg(long)]
    am: Option<String>,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    nik: String,

    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    nik: String,

    #[arg(long)]
    password: String,

    #[arg(long)]
    confirm: String,
}

#[derive(Args)]
struct StoreSelector {
    #[arg(long, conflicts_with_all = ["am", "store_name"])]
    store: Option<String>,

    #[arg(long, requires = "store_name")]
    am: Option<String>,

    #[arg(long, requires = "am")]
    store_name: Option<String>,
}

#[derive(Args)]
struct SessionArgs {
    #[command(flatten)]
    login: LoginArgs,

    #[command(flatten)]
    selector: StoreSelector,
}

#[derive(Args)]
struct SubmitArgs {
    #[command(flatten)]
    login: LoginArgs,

    #[command(flatten)]
    selector: StoreSelector,

    #[arg(long, help = "JSON object mapping item code (PLU) to remark")]
    remarks: Utf8PathBuf,
}

#[derive(Args)]
struct AdminArgs {
    #[arg(long)]
    secret: String,

    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand)]
enum AdminCommand {
    #[command(about = "Merge the upstream inventory master into the stored master")]
    Sync,
    #[command(about = "Merge an .xlsx file into the stored master")]
    Upload { file: Utf8PathBuf },
    #[command(about = "Delete the master dataset")]
    DeleteMaster {
        #[arg(long)]
        purge_results: bool,
    },
    #[command(about = "Set a new password for a user")]
    ResetPassword {
        #[arg(long)]
        nik: String,
        #[arg(long)]
        password: String,
    },
    #[command(about = "Delete every submitted result")]
    PurgeResults,
    #[command(about = "Write the consolidated report for a round")]
    Rekap {
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        out: Option<Utf8PathBuf>,
    },
}

#[derive(Serialize)]
struct Message {
    status: &'static str,
    detail: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<NklError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &NklError) -> u8 {
    match error {
        NklError::MissingConfig
        | NklError::InvalidUserId(_)
        | NklError::InvalidStoreCode(_)
        | NklError::InvalidCredentials
        | NklError::PasswordMismatch
        | NklError::EmptyPassword
        | NklError::AdminDenied
        | NklError::MissingRemarks { .. }
        | NklError::UnknownStore(_)
        | NklError::UnknownItem { .. }
        | NklError::MasterNotConfigured
        | NklError::MalformedMaster(_) => 2,
        NklError::StoreHttp(_)
        | NklError::StoreStatus { .. }
        | NklError::UpstreamHttp(_)
        | NklError::UpstreamStatus { .. }
        | NklError::UpstreamPayload(_)
        | NklError::CredentialsUnavailable => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Arc::new(HttpObjectStore::new(config.object_store.clone())?);
    let upstream = config
        .upstream
        .clone()
        .map(HttpUpstream::new)
        .transpose()?;
    let app = App::new(store, upstream, &config);

    match cli.command {
        Commands::Progress(args) => run_progress(&app, args),
        Commands::Stores(args) => run_stores(&app, args),
        Commands::Register(args) => run_register(&app, args),
        Commands::Session(args) => run_session(&app, args),
        Commands::Submit(args) => run_submit(&app, args),
        Commands::Admin(args) => run_admin(&app, args),
    }
}

fn run_progress(app: &CliApp, args: ProgressArgs) -> miette::Result<()> {
    let view = app.home();
    if let (Some(key), Some(group)) = (args.pending, args.group) {
        let pending: Vec<&StoreStatus> = view.snapshot.pending_in_group(key, &group);
        return JsonOutput::print_json(&pending).into_diagnostic();
    }
    JsonOutput::print_home(&view).into_diagnostic()
}

fn run_stores(app: &CliApp, args: StoresArgs) -> miette::Result<()> {
    let dataset = app.master();
    if dataset.is_empty() {
        return Err(NklError::MasterNotConfigured.into());
    }
    let names = match args.am {
        Some(am) => dataset.store_names(&am),
        None => dataset.area_managers(),
    };
    JsonOutput::print_json(&names).into_diagnostic()
}

fn run_register(app: &CliApp, args: RegisterArgs) -> miette::Result<()> {
    let user: UserId = args.nik.parse()?;
    let outcome = app.register(&user, &args.password, &args.confirm)?;
    JsonOutput::print_json(&outcome).into_diagnostic()
}

fn login(app: &CliApp, args: &LoginArgs) -> miette::Result<UserSession> {
    let user: UserId = args.nik.parse()?;
    Ok(app.login(&user, &args.password)?)
}

fn resolve_store(app: &CliApp, selector: &StoreSelector) -> miette::Result<StoreCode> {
    if let Some(code) = &selector.store {
        return Ok(code.parse()?);
    }
    match (&selector.am, &selector.store_name) {
        (Some(am), Some(name)) => {
            let dataset = app.master();
            let row = dataset
                .find_store(am, name)
                .ok_or_else(|| NklError::UnknownStore(format!("{am} / {name}")))?;
            Ok(row.store_code.parse()?)
        }
        _ => Err(miette::Report::msg(
            "select a store with --store or --am together with --store-name",
        )),
    }
}

fn run_session(app: &CliApp, args: SessionArgs) -> miette::Result<()> {
    let session = login(app, &args.login)?;
    let store = resolve_store(app, &args.selector)?;
    let input = app.open_session(&session, &store)?;
    JsonOutput::print_session(&input).into_diagnostic()
}

fn run_submit(app: &CliApp, args: SubmitArgs) -> miette::Result<()> {
    let content = std::fs::read_to_string(args.remarks.as_std_path())
        .map_err(|err| NklError::Filesystem(format!("{}: {err}", args.remarks)))?;
    let remarks: BTreeMap<String, String> = serde_json::from_str(&content)
        .map_err(|err| NklError::Filesystem(format!("{}: {err}", args.remarks)))?;

    let session = login(app, &args.login)?;
    let store = resolve_store(app, &args.selector)?;
    let mut input = app.open_session(&session, &store)?;
    input.apply_remarks(&remarks)?;
    let receipt = app.submit(&session, &input)?;
    JsonOutput::print_receipt(&receipt).into_diagnostic()
}

fn run_admin(app: &CliApp, args: AdminArgs) -> miette::Result<()> {
    let admin = app.authorize_admin(&args.secret)?;
    run_admin_command(app, &admin, args.command)
}

fn run_admin_command(
    app: &CliApp,
    admin: &AdminToken,
    command: AdminCommand,
) -> miette::Result<()> {
    let sink = LogSink;
    match command {
        AdminCommand::Sync => {
            let update = app.sync_master(admin, &sink)?;
            JsonOutput::print_master_update(&update).into_diagnostic()
        }
        AdminCommand::Upload { file } => {
            let bytes = std::fs::read(file.as_std_path())
                .map_err(|err| NklError::Filesystem(format!("{file}: {err}")))?;
            let update = app.upload_master(admin, &bytes, &sink)?;
            JsonOutput::print_master_update(&update).into_diagnostic()
        }
        AdminCommand::DeleteMaster { purge_results } => {
            let summary = app.delete_master(admin, purge_results, &sink)?;
            JsonOutput::print_delete(&summary).into_diagnostic()
        }
        AdminCommand::ResetPassword { nik, password } => {
            let user: UserId = nik.parse()?;
            app.reset_password(admin, &user, &password)?;
            JsonOutput::print_json(&Message {
                status: "ok",
                detail: format!("password reset for {user}"),
            })
            .into_diagnostic()
        }
        AdminCommand::PurgeResults => {
            let deleted = app.purge_results(admin, &sink)?;
            JsonOutput::print_json(&Message {
                status: "ok",
                detail: format!("{deleted} result files deleted"),
            })
            .into_diagnostic()
        }
        AdminCommand::Rekap { version, out } => {
            let version = version.map(|v| v.parse::<Version>()).transpose()?;
            let report = app.consolidate(admin, version, &sink)?;
            let out = out.unwrap_or_else(|| Utf8PathBuf::from(report.file_name()));
            std::fs::write(out.as_std_path(), report.to_xlsx()?)
                .map_err(|err| NklError::Filesystem(format!("{out}: {err}")))?;
            JsonOutput::print_report(&report.summary()).into_diagnostic()
        }
    }
}
