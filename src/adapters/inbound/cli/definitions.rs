use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::core::domain::{HumanEvaluation, Severity};

/// flowbench command-line interface.
#[derive(Debug, Parser)]
#[command(name = "flowbench")]
#[command(about = "Evaluate agent flows with Q&A sets and simulated conversations", version)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "config.yaml",
        help = "Path to the flowbench configuration file"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Keep runs in memory instead of the SQLite store"
    )]
    pub in_memory: bool,

    #[arg(long, global = true, help = "Verbose log output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogJsonStyle::Compact,
        help = "Layout of JSON log records"
    )]
    pub log_json_style: LogJsonStyle,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a configured test and stream its progress.
    Run(RunArgs),
    /// Show recent runs or the details of one run.
    Status(StatusArgs),
    /// Compare two finished runs of the same test type.
    Compare(CompareArgs),
    /// Record a human verdict on a result or conversation.
    Evaluate(EvaluateArgs),
    /// Serve the run API over HTTP with live SSE progress.
    Serve(ServeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Test identifier from the configuration file")]
    pub test: String,

    #[arg(long, help = "Run identifier (generated when omitted)")]
    pub run_id: Option<String>,

    #[arg(
        long,
        help = "API key for the simulated-user provider (can also come from env vars)"
    )]
    pub api_key: Option<String>,

    #[arg(long, help = "Print progress events as JSON lines")]
    pub json: bool,

    #[arg(long, help = "Also write a JSON debug log for this run")]
    pub log_file: bool,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    #[arg(help = "Optional run identifier to inspect")]
    pub run_id: Option<String>,

    #[arg(long, default_value_t = 10, help = "Number of runs to list")]
    pub limit: usize,

    #[arg(long, help = "Print JSON instead of text")]
    pub json: bool,
}

impl Default for StatusArgs {
    fn default() -> Self {
        Self {
            run_id: None,
            limit: 10,
            json: false,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct CompareArgs {
    #[arg(help = "Baseline run identifier")]
    pub left: String,

    #[arg(help = "Candidate run identifier")]
    pub right: String,

    #[arg(long, help = "Print JSON instead of text")]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("target").required(true).args(["result", "conversation"])))]
pub struct EvaluateArgs {
    #[arg(help = "Run identifier")]
    pub run_id: String,

    #[arg(long, help = "Result identifier (Q&A runs)")]
    pub result: Option<String>,

    #[arg(long, help = "Conversation identifier (conversation runs)")]
    pub conversation: Option<String>,

    #[arg(long, value_enum, help = "Verdict; omit to clear an earlier one")]
    pub evaluation: Option<EvaluationArg>,

    #[arg(long, value_enum, help = "Severity of the problem")]
    pub severity: Option<SeverityArg>,

    #[arg(long, help = "Free-form reviewer note")]
    pub note: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1", help = "Address to bind")]
    pub bind: String,

    #[arg(long, default_value_t = 8080, help = "Port to listen on")]
    pub port: u16,

    #[arg(long, default_value_t = 25, help = "Default page size for GET /runs")]
    pub limit: usize,

    #[arg(
        long,
        help = "API key for the simulated-user provider (can also come from env vars)"
    )]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[clap(rename_all = "lower")]
pub enum LogJsonStyle {
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[clap(rename_all = "lower")]
pub enum EvaluationArg {
    Correct,
    Partial,
    Incorrect,
}

impl From<EvaluationArg> for HumanEvaluation {
    fn from(value: EvaluationArg) -> Self {
        match value {
            EvaluationArg::Correct => HumanEvaluation::Correct,
            EvaluationArg::Partial => HumanEvaluation::Partial,
            EvaluationArg::Incorrect => HumanEvaluation::Incorrect,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[clap(rename_all = "lower")]
pub enum SeverityArg {
    Critical,
    Major,
    Minor,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Critical => Severity::Critical,
            SeverityArg::Major => Severity::Major,
            SeverityArg::Minor => Severity::Minor,
        }
    }
}
