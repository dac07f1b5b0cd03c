use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use exam_core::model::{Question, SessionState};
use exam_core::plan::{StepIndex, TOTAL_STEPS};
use services::{Clock, ExamController, ExamError};
use storage::Storage;
use storage::bank::{QuestionBank, import_bank};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "oral-exam", version, about = "Fifteen-step oral exam runner")]
struct Cli {
    /// `SQLite` url; overrides `EXAM_DB_URL`.
    #[arg(long, global = true)]
    db: Option<String>,
    /// Directory for answer recordings; overrides `EXAM_AUDIO_DIR`.
    #[arg(long, global = true)]
    audio_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import a JSON question bank into the database.
    Seed {
        #[arg(long)]
        file: PathBuf,
    },
    /// Walk through an exam in the terminal.
    Exam {
        /// Print the final summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// What the candidate typed after a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Answered,
    Skipped,
    Quit,
}

impl Reply {
    fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" => Self::Quit,
            "s" | "skip" => Self::Skipped,
            _ => Self::Answered,
        }
    }
}

fn init_tracing(filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter).context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    config.prepare_paths()?;
    let storage = Storage::sqlite(&config.db_url, config.audio_dir.clone())
        .await
        .with_context(|| format!("failed to open {}", config.db_url))?;
    info!(db = %config.db_url, audio_dir = %config.audio_dir.display(), "storage ready");
    Ok(storage)
}

async fn seed(storage: &Storage, file: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let bank: QuestionBank = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid question bank", file.display()))?;
    let report = import_bank(storage, bank).await?;
    println!(
        "imported {} topics and {} questions from {}",
        report.topics,
        report.questions,
        file.display()
    );
    Ok(())
}

fn show(step: StepIndex, question: &Question) {
    let content = question.content();
    println!();
    println!(
        "[{step}/{TOTAL_STEPS}] {} ({}, #{})",
        question.topic(),
        question.kind(),
        question.id()
    );
    if !content.text.is_empty() {
        println!("{}", content.text);
    }
    if let Some(body) = &content.question_content {
        println!("{body}");
    }
    if let Some(image) = &content.image {
        println!("image: {image}");
    }
    if let Some(audio) = &content.audio {
        println!("audio: {audio}");
    }
    println!("(enter = answer, s = skip, q = finish)");
}

async fn ask(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Reply> {
    let line = lines.next_line().await.context("failed to read stdin")?;
    Ok(line.as_deref().map_or(Reply::Quit, Reply::parse))
}

async fn run_exam(controller: &ExamController, json: bool) -> anyhow::Result<()> {
    let mut session = SessionState::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let start = controller.start_exam(&mut session).await?;
    println!("opening topic: {}", start.topic);
    let mut step = StepIndex::FIRST;
    let mut question = start.question;

    loop {
        show(step, &question);
        let reply = ask(&mut lines).await?;
        if reply == Reply::Answered {
            let name = controller.record_answer(&session).await?;
            println!("saved {name}");
        }
        if reply == Reply::Quit || step.is_last() {
            break;
        }

        step = controller.advance(&mut session, i64::from(step.get()))?;
        question = match controller.get_step(&mut session, i64::from(step.get())).await {
            Ok(question) => question,
            Err(err @ (ExamError::QuestionNotFound { .. } | ExamError::PoolExhausted { .. })) => {
                warn!(%step, error = %err, "ending exam early");
                println!("no question available for step {step}: {err}");
                break;
            }
            Err(err) => return Err(err.into()),
        };
    }

    let summary = controller.finish_exam(&mut session).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("exam finished, {} recordings:", summary.artifacts.len());
        for name in &summary.artifacts {
            println!("  {name}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .context("failed to load configuration")?
        .with_overrides(cli.db.as_deref(), cli.audio_dir.as_deref())?;
    init_tracing(&config.log_filter)?;

    let storage = open_storage(&config).await?;
    match cli.command {
        Command::Seed { file } => seed(&storage, &file).await,
        Command::Exam { json } => {
            let controller = ExamController::from_storage(Clock::default(), &storage);
            run_exam(&controller, json).await
        }
    }
}
