use clap::{Args as ClapArgs, Parser, Subcommand};

pub mod history;

pub use history::handle_history_command;

#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(about = "Meeting recording and transcription service", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Search and view stored meeting transcripts
    History(HistoryCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct HistoryCliArgs {
    /// Search query over title, transcript, and notes
    #[arg(short, long)]
    pub query: Option<String>,
    /// Maximum number of results to display
    #[arg(short, long, default_value_t = 20)]
    pub limit: u32,
    /// Show the full transcript of a single record
    #[arg(long)]
    pub show: Option<i64>,
}
