//! scorecast CLI, the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "scorecast",
    version,
    about = "Exam result prediction and ranking"
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Evaluate the exam schedule at this RFC 3339 instant instead of now
    #[arg(long, global = true, value_parser = parse_instant)]
    at: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter config and example exam definition
    Init,

    /// Validate exam definition TOML files
    Validate {
        /// Path to an exam file or directory
        #[arg(long)]
        exam: PathBuf,
    },

    /// Manage exam definitions in the store
    Exam {
        #[command(subcommand)]
        action: ExamAction,
    },

    /// Register a candidate for an exam
    Register {
        #[arg(long)]
        exam_id: String,

        #[arg(long)]
        candidate: u64,

        #[arg(long)]
        name: String,

        /// Category the candidate belongs to
        #[arg(long)]
        category: Option<String>,
    },

    /// Confirm one subject's answers for a candidate
    Submit {
        #[arg(long)]
        exam_id: String,

        #[arg(long)]
        candidate: u64,

        #[arg(long)]
        subject: String,

        /// Option codes in question order (e.g. "1,2,0,13"); 0 is blank
        #[arg(long)]
        answers: String,
    },

    /// Correct one stored answer
    Correct {
        #[arg(long)]
        exam_id: String,

        #[arg(long)]
        candidate: u64,

        /// Question as subject-number (e.g. "logic-3")
        #[arg(long)]
        question: String,

        /// New option code
        #[arg(long)]
        option: u32,
    },

    /// Publish the official answer key from a TOML file
    PublishKey {
        #[arg(long)]
        exam_id: Option<String>,

        /// Key file mapping subject codes to option codes
        #[arg(long)]
        key: PathBuf,
    },

    /// Bring derived records in line with the answer ledger
    Reconcile {
        /// Exams to reconcile (default: all)
        #[arg(long = "exam-id")]
        exam_ids: Vec<String>,

        /// Directory for run reports (default from config)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show derived results
    Report {
        #[arg(long)]
        exam_id: String,

        #[arg(long, value_enum, default_value = "statistics")]
        view: View,

        /// Key context: predicted or official
        #[arg(long, default_value = "predicted")]
        context: String,

        /// Restrict to the filtered cohort
        #[arg(long)]
        filtered: bool,

        /// "global" or a category name
        #[arg(long, default_value = "global")]
        scope: String,
    },
}

#[derive(Subcommand)]
enum ExamAction {
    /// Add or replace exam definitions from a file or directory
    Add {
        #[arg(long)]
        exam: PathBuf,
    },
    /// List stored exams
    List,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum View {
    Statistics,
    Ranks,
    Items,
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scorecast=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    let now = cli.at.unwrap_or_else(Utc::now);

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Validate { exam } => commands::validate::execute(exam),
        Commands::Exam { action } => match action {
            ExamAction::Add { exam } => commands::exam::add(exam, config).await,
            ExamAction::List => commands::exam::list(config, now).await,
        },
        Commands::Register {
            exam_id,
            candidate,
            name,
            category,
        } => commands::register::execute(exam_id, candidate, name, category, config).await,
        Commands::Submit {
            exam_id,
            candidate,
            subject,
            answers,
        } => commands::submit::execute(exam_id, candidate, subject, answers, config, now).await,
        Commands::Correct {
            exam_id,
            candidate,
            question,
            option,
        } => commands::submit::correct(exam_id, candidate, question, option, config, now).await,
        Commands::PublishKey { exam_id, key } => {
            commands::publish_key::execute(exam_id, key, config).await
        }
        Commands::Reconcile { exam_ids, output } => {
            commands::reconcile::execute(exam_ids, output, config, now).await
        }
        Commands::Report {
            exam_id,
            view,
            context,
            filtered,
            scope,
        } => commands::report::execute(exam_id, view, context, filtered, scope, config, now).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
