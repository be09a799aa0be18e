use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use mailsend::{
    FileLogger, GmailConfig, GmailMailer, Mailer, Renderer, SmtpConfig, SmtpMailer, TemplateData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Smtp,
    Gmail,
}

#[derive(Parser)]
#[command(name = "mailsend", version)]
#[command(about = "Send one templated email over SMTP or the Gmail API", long_about = None)]
struct Cli {
    /// Recipient address; repeat for several
    #[arg(long, required = true)]
    to: Vec<String>,

    /// Delivery backend
    #[arg(long, value_enum, env = "MAIL_BACKEND", default_value = "smtp")]
    backend: Backend,

    #[arg(long, default_value = "Test email")]
    subject: String,

    /// Template file name, relative to --templates-dir
    #[arg(long, default_value = "sample_template.txt")]
    template: String,

    #[arg(long, env = "MAIL_TEMPLATES_DIR", default_value = "templates")]
    templates_dir: PathBuf,

    /// TOML file with the template fields
    #[arg(long)]
    data: Option<PathBuf>,

    /// Template field as key=value; overrides --data
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// Settings file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Write the SMTP conversation to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Prompt for the SMTP password instead of reading EMAIL_PASSWORD
    #[arg(long, default_value_t = false)]
    ask_password: bool,

    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbosity: u8,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn template_data(cli: &Cli) -> Result<TemplateData> {
    let mut data = match cli.data.as_deref() {
        Some(path) => TemplateData::from_file(path)?,
        None => TemplateData::new(),
    };
    for (key, value) in cli.fields.iter() {
        data.insert(key, value.as_str());
    }
    if cli.data.is_none() && cli.fields.is_empty() {
        data = TemplateData::new()
            .with("receiver_name", "Alessandro")
            .with("sender_name", "Golang");
    }
    Ok(data)
}

fn smtp_mailer(cli: &Cli, renderer: Renderer) -> Result<SmtpMailer> {
    if cli.ask_password {
        let password = rpassword::prompt_password("SMTP password: ")
            .context("failed to read password")?;
        std::env::set_var("EMAIL_PASSWORD", password);
    }
    let config = SmtpConfig::from_env()?;
    let mailer = SmtpMailer::new(config, renderer)?;
    match cli.transcript.as_deref() {
        Some(path) => {
            let logger = FileLogger::file(path)
                .with_context(|| format!("failed to open transcript {}", path.display()))?;
            Ok(mailer.with_transcript(logger))
        }
        None => Ok(mailer),
    }
}

/// Finds `--env-file` ahead of the real parse, since the file has to be in
/// the environment before clap reads `env` defaults.
fn env_file_arg<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter().skip(1);
    let mut found = None;
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            found = args.next().map(PathBuf::from);
        } else if let Some(path) = arg.to_str().and_then(|a| a.strip_prefix("--env-file=")) {
            found = Some(PathBuf::from(path));
        }
    }
    found
}

/// Loads `path` when given, otherwise `./.env` if there is one. Variables
/// already set in the process environment win over both.
fn load_settings(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("error loading settings file {}", path.display()))?;
        }
        None => match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err).context("error loading .env file"),
        },
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = cli.env_file.as_deref().unwrap_or(Path::new(".env"));
    tracing::debug!(settings = %settings.display(), backend = ?cli.backend, "starting");

    let renderer = Renderer::new(cli.templates_dir.clone());
    let mailer: Box<dyn Mailer> = match cli.backend {
        Backend::Smtp => Box::new(smtp_mailer(&cli, renderer)?),
        Backend::Gmail => {
            if cli.transcript.is_some() {
                return Err(anyhow!("--transcript only applies to the smtp backend"));
            }
            Box::new(GmailMailer::new(GmailConfig::from_env()?, renderer)?)
        }
    };

    let data = template_data(&cli)?;
    mailer.send_email(&cli.to, &cli.subject, &data, &cli.template)?;
    Ok(())
}

fn main() -> ExitCode {
    let settings = load_settings(env_file_arg(std::env::args_os()).as_deref());

    let cli = Cli::parse();
    init_logging(cli.verbosity);
    if let Err(err) = settings {
        tracing::error!("{:#}", err);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
