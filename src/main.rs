//! ops-toolkit CLI
//!
//! Entry point for the `ops-toolkit` command-line tool.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ops_toolkit::exec::{ExecError, ExecOptions};
use ops_toolkit::fs::archive::{self, ArchiveFormat, ExtractOptions};
use ops_toolkit::logging::{self, LogOptions, ProductionLog};
use ops_toolkit::notifier::{
    DeliveryError, Message, NotifierClient, NotifierClientBuilder, SendContext,
};
use ops_toolkit::{build_info, http};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ops-toolkit")]
#[command(about = "Archives, downloads, commands and robot notifications", version)]
struct Cli {
    /// Disable colored console logs
    #[arg(long, global = true)]
    no_color: bool,

    /// Default log level (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    /// Also write JSON-lines and text logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a .tar, .tar.gz or .tgz archive
    Extract {
        src: PathBuf,
        dst: PathBuf,

        /// Archive format (default: detect from the file name)
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },

    /// Download a URL to a file
    Download { url: String, path: PathBuf },

    /// Run a command line (split on spaces, no shell)
    Exec {
        /// Working directory
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Extra environment variables (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Save output to a temp file and print it abbreviated
        #[arg(long)]
        dump: bool,

        /// The command line, quoted
        cmd: String,
    },

    /// Print git build metadata
    BuildInfo {
        /// Repository directory (default: enclosing git root)
        dir: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Send a message through a group robot webhook
    Notify {
        #[command(flatten)]
        robot: RobotArgs,

        #[command(subcommand)]
        message: NotifyCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Tar,
    TarGz,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Tar => ArchiveFormat::Tar,
            FormatArg::TarGz => ArchiveFormat::TarGz,
        }
    }
}

#[derive(Args)]
struct RobotArgs {
    /// Credential level used for DINGTALK_ACCESS_TOKEN_<LEVEL> / DINGTALK_SECRET_<LEVEL>
    #[arg(long, default_value = "P1")]
    level: String,

    /// Access token (overrides the environment)
    #[arg(long)]
    token: Option<String>,

    /// Signing secret
    #[arg(long)]
    secret: Option<String>,

    /// Robot API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Retries after the first attempt
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Overall deadline in seconds
    #[arg(long, default_value_t = 30)]
    deadline: u64,
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// Plain text message
    Text {
        content: String,

        /// Mobiles to mention (comma-separated)
        #[arg(long, value_delimiter = ',')]
        at_mobiles: Vec<String>,

        /// Mention everyone
        #[arg(long)]
        at_all: bool,
    },

    /// Markdown message
    Markdown {
        title: String,
        text: String,

        /// Mobiles to mention (comma-separated)
        #[arg(long, value_delimiter = ',')]
        at_mobiles: Vec<String>,

        /// Mention everyone
        #[arg(long)]
        at_all: bool,
    },

    /// Link card
    Link {
        title: String,
        text: String,
        message_url: String,

        /// Picture shown on the card
        #[arg(long)]
        pic_url: Option<String>,
    },
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_options = LogOptions {
        no_color: cli.no_color,
        level: cli.log_level,
        production: cli.log_dir.map(|dir| ProductionLog { dir, append: true }),
    };
    if let Err(e) = logging::init(&log_options) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    match cli.command {
        Commands::Extract { src, dst, format } => run_extract(src, dst, format),
        Commands::Download { url, path } => run_download(&url, path).await,
        Commands::Exec {
            cwd,
            env,
            dump,
            cmd,
        } => run_exec(&cmd, cwd, env, dump),
        Commands::BuildInfo { dir, json } => run_build_info(dir, json),
        Commands::Notify { robot, message } => run_notify(&robot, message).await,
    }
}

fn run_extract(src: PathBuf, dst: PathBuf, format: Option<FormatArg>) {
    let options = ExtractOptions {
        format: format.map(Into::into),
        cancel: None,
    };

    match archive::extract(&src, &dst, &options) {
        Ok(files) => info!(files, dst = %dst.display(), "extracted"),
        Err(e) => {
            error!(error = %e, src = %src.display(), "extraction failed");
            process::exit(1);
        }
    }
}

async fn run_download(url: &str, path: PathBuf) {
    match http::download(url, &path).await {
        Ok(bytes) => info!(bytes, file = %path.display(), "downloaded"),
        Err(e) => {
            error!(error = %e, url, "download failed");
            process::exit(1);
        }
    }
}

fn run_exec(cmd: &str, cwd: Option<PathBuf>, env: Vec<(String, String)>, dump: bool) {
    let mut options = ExecOptions::new().dump_output(dump);
    if let Some(cwd) = cwd {
        options = options.cwd(cwd);
    }
    for (key, value) in env {
        options = options.env(key, value);
    }

    match ops_toolkit::exec(cmd, &options) {
        Ok(result) => {
            if !dump {
                print!("{}", result.output);
            }
        }
        Err(ExecError::Failed { status, result }) => {
            if !dump {
                print!("{}", result.output);
            }
            process::exit(status.code().unwrap_or(1));
        }
        Err(_) => process::exit(1),
    }
}

fn run_build_info(dir: Option<PathBuf>, json: bool) {
    let info = match build_info::collect(dir.as_deref()) {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to collect build info");
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&info) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                error!(error = %e, "failed to encode build info");
                process::exit(1);
            }
        }
    } else {
        println!("Commit:  {}", info.git_commit);
        println!("Branch:  {}", info.git_branch);
        println!("Tag:     {}", info.git_tag);
        println!("Dirty:   {}", info.git_dirty);
        println!("Version: {}", info.git_version);
        println!("Time:    {}", info.build_time);
        println!("Dir:     {}", info.build_dir.display());
    }
}

fn notifier(robot: &RobotArgs) -> Result<NotifierClient, DeliveryError> {
    let mut builder = match &robot.token {
        Some(token) => NotifierClient::builder().access_token(token.clone()),
        None => NotifierClientBuilder::from_env(&robot.level)?,
    };
    if let Some(secret) = &robot.secret {
        builder = builder.sign_secret(secret.clone());
    }
    if let Some(base_url) = &robot.base_url {
        builder = builder.base_url(base_url.clone());
    }
    builder.retry_count(robot.retries).build()
}

async fn run_notify(robot: &RobotArgs, command: NotifyCommands) {
    let client = match notifier(robot) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, level = %robot.level, "failed to configure robot client");
            process::exit(1);
        }
    };

    let message: Message = match command {
        NotifyCommands::Text {
            content,
            at_mobiles,
            at_all,
        } => {
            let builder = Message::text(content).at_mobiles(at_mobiles);
            let builder = if at_all { builder.at_all() } else { builder };
            builder.into()
        }
        NotifyCommands::Markdown {
            title,
            text,
            at_mobiles,
            at_all,
        } => {
            let builder = Message::markdown(title, text).at_mobiles(at_mobiles);
            let builder = if at_all { builder.at_all() } else { builder };
            builder.into()
        }
        NotifyCommands::Link {
            title,
            text,
            message_url,
            pic_url,
        } => {
            let builder = Message::link(title, text, message_url);
            match pic_url {
                Some(pic) => builder.with_picture(pic).into(),
                None => builder.into(),
            }
        }
    };

    let ctx = SendContext::new().with_timeout(Duration::from_secs(robot.deadline));
    let msg_type = message.msg_type();
    match client.send(message, &ctx).await {
        Ok(()) => info!(msg_type, "message delivered"),
        Err(e) => {
            error!(error = %e, msg_type, "message delivery failed");
            process::exit(1);
        }
    }
}
