// # feeportal - Fee Portal CLI
//
// Thin front end over feeportal-core. Each invocation is one execution
// context: it attaches to the configured storage, runs one operation and
// exits. With the file store, the collection and the session persist
// between invocations.
//
// ## Configuration
//
// - `FEEPORTAL_STORE_TYPE`: Storage backend (file, memory). Default: file
// - `FEEPORTAL_STORE_DIR`: Directory for the file store. Default: ./feeportal-data
// - `FEEPORTAL_PAYMENT_DELAY_MS`: Simulated payment processing time. Default: 2000
// - `FEEPORTAL_LOG_LEVEL`: trace, debug, info, warn, error. Default: warn
//
// ## Example
//
// ```bash
// feeportal login bob@student.edu password123
// feeportal pay
// feeportal list
// ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use feeportal_core::{
    AuthService, PortalConfig, ProfileUpdate, StorageConfig, StorageNamespace, Student,
};
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum PortalExitCode {
    /// Operation succeeded
    Success = 0,
    /// Configuration or startup error
    ConfigError = 1,
    /// Storage or other unexpected failure
    RuntimeError = 2,
    /// Operation was rejected (bad credentials, duplicate email, no session)
    Rejected = 3,
}

impl From<PortalExitCode> for ExitCode {
    fn from(code: PortalExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreType {
    File,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "feeportal", version, about = "Student fee portal")]
struct Cli {
    /// Storage backend
    #[arg(long, env = "FEEPORTAL_STORE_TYPE", value_enum, default_value = "file")]
    store: StoreType,

    /// Directory for the file store
    #[arg(long, env = "FEEPORTAL_STORE_DIR", default_value = "feeportal-data")]
    store_dir: String,

    /// Simulated payment processing time in milliseconds
    #[arg(long, env = "FEEPORTAL_PAYMENT_DELAY_MS", default_value_t = 2000)]
    payment_delay_ms: u64,

    /// Log verbosity
    #[arg(long, env = "FEEPORTAL_LOG_LEVEL", value_enum, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in with email and password
    Login { email: String, password: String },
    /// Log out
    Logout,
    /// Register a new student and log in
    Signup {
        name: String,
        email: String,
        password: String,
    },
    /// Change the logged-in student's name and/or email
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Pay the logged-in student's fees
    Pay,
    /// List every student
    List,
    /// Show the logged-in student
    Whoami,
}

impl Cli {
    fn portal_config(&self) -> PortalConfig {
        let storage = match self.store {
            StoreType::File => StorageConfig::File {
                dir: self.store_dir.clone(),
            },
            StoreType::Memory => StorageConfig::Memory,
        };

        let mut config = PortalConfig::new();
        config.storage = storage;
        config.payment.processing_delay_ms = self.payment_delay_ms;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = cli.portal_config();
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return PortalExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PortalExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PortalExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(config, cli.command).await {
            Ok(true) => PortalExitCode::Success,
            Ok(false) => PortalExitCode::Rejected,
            Err(e) => {
                error!("Operation failed: {:#}", e);
                eprintln!("error: {:#}", e);
                PortalExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Attach a context, run one command, close the context
async fn run(config: PortalConfig, command: Command) -> Result<bool> {
    let namespace = StorageNamespace::open(&config).await?;
    let auth = AuthService::attach(&namespace, &config).await?;
    info!(
        "Attached {} to {} storage",
        auth.context_id(),
        config.storage.type_name()
    );

    let outcome = execute(&auth, command).await;
    auth.close().await?;
    outcome
}

async fn execute(auth: &AuthService, command: Command) -> Result<bool> {
    let outcome = match command {
        Command::Login { email, password } => auth.login_checked(&email, &password).await,
        Command::Logout => {
            auth.logout().await?;
            println!("Logged out");
            return Ok(true);
        }
        Command::Signup {
            name,
            email,
            password,
        } => auth.signup_checked(&name, &email, &password).await,
        Command::UpdateProfile { name, email } => {
            let update = ProfileUpdate { name, email };
            if update.is_empty() {
                anyhow::bail!("update-profile needs --name and/or --email");
            }
            auth.update_profile_checked(update).await
        }
        Command::Pay => {
            println!("Processing payment...");
            auth.pay_fees_checked().await
        }
        Command::List => {
            let students = auth.list_all().await;
            let current = auth.current_user().await.map(|s| s.id);
            for student in &students {
                let marker = if current.as_deref() == Some(student.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, describe(student));
            }
            println!("{} student(s)", students.len());
            return Ok(true);
        }
        Command::Whoami => match auth.current_user().await {
            Some(student) => {
                println!("{}", describe(&student));
                return Ok(true);
            }
            None => {
                println!("Not logged in");
                return Ok(false);
            }
        },
    };

    match outcome {
        Ok(student) => {
            println!("{}", describe(&student));
            Ok(true)
        }
        Err(e) if e.is_domain() => {
            println!("Rejected: {}", e);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn describe(student: &Student) -> String {
    format!(
        "[{}] {} <{}> fees {}",
        student.id,
        student.name,
        student.email,
        if student.fees_paid { "paid" } else { "due" }
    )
}
