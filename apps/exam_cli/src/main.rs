use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    authoring::{parse_exam_code, validate_answer_key_change, validate_essay_grade},
    ClientError, ExamClient, SessionContext, SessionStore, ValidationError,
};
use shared::{
    domain::{AttemptId, ExamId, OptionId, QuestionId, Role},
    protocol::{DraftQuestion, ExamDraft},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;
mod take;

#[derive(Parser, Debug)]
#[command(name = "exam", about = "Take and manage timed exams from the terminal")]
struct Cli {
    /// Backend API base URL, e.g. http://127.0.0.1:5000/api
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Where the login session is stored.
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: String,
        /// Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        full_name: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Student)]
        role: RoleArg,
    },
    Logout,
    Whoami,
    /// Your exams (teachers) or your attempts (students).
    Home,
    /// Every exam on the server.
    Exams,
    /// Start an attempt at the exam with this code.
    Take { code: String },
    /// Show your graded attempt at an exam.
    Review { exam_id: i64 },
    /// Answer key and attempts of an exam you created.
    Detail { exam_id: i64 },
    /// Score one essay answer.
    Grade {
        exam_id: i64,
        attempt_id: i64,
        question_id: i64,
        score: f64,
    },
    /// Change the correct option of a question and regrade its attempts.
    UpdateAnswer {
        exam_id: i64,
        question_id: i64,
        option_id: i64,
        #[arg(long)]
        yes: bool,
    },
    Delete {
        exam_id: i64,
        #[arg(long)]
        yes: bool,
    },
    /// Publish an exam from a JSON draft file.
    Create { draft: PathBuf },
    /// Turn a PDF into a JSON draft for review before `create`.
    ParsePdf {
        pdf: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Teacher,
    Student,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Teacher => Role::Teacher,
            RoleArg::Student => Role::Student,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", describe(&err));
            ExitCode::FAILURE
        }
    }
}

fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ClientError>() {
        Some(client_err) => client_err.user_message(),
        None => format!("{err:#}"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = config::load_settings();
    settings.apply_overrides(cli.api_url, cli.session_file);
    let api_url = settings.validated_api_url()?;
    let mut session = SessionContext::load(SessionStore::new(&settings.session_path)).await?;
    let mut client = ExamClient::for_session(api_url, settings.request_timeout(), &session)?;
    info!(api_url = client.api_url(), "exam_cli: starting");

    let outcome = execute(cli.command, &mut client, &mut session).await;
    if outcome.as_ref().is_err_and(credentials_rejected) {
        warn!("exam_cli: credentials rejected, clearing stored session");
        session.clear().await?;
    }
    outcome
}

/// The backend refused the stored token, as opposed to there being none.
fn credentials_rejected(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ClientError>()
        .is_some_and(|err| err.requires_reauth() && !matches!(err, ClientError::NotLoggedIn))
}

async fn execute(
    command: Command,
    client: &mut ExamClient,
    session: &mut SessionContext,
) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ").await?,
            };
            let auth = client.login(&username, &password).await?;
            session.set(auth.user.clone(), auth.token).await?;
            println!("Logged in as {}", render::whoami(&auth.user));
        }
        Command::Register {
            username,
            password,
            full_name,
            role,
        } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ").await?,
            };
            let auth = client
                .register(&username, &password, &full_name, role.into())
                .await?;
            session.set(auth.user.clone(), auth.token).await?;
            println!("Registered {}", render::whoami(&auth.user));
        }
        Command::Logout => {
            session.clear().await?;
            println!("Logged out.");
        }
        Command::Whoami => {
            let user = session.require_user()?;
            println!("{}", render::whoami(user));
        }
        Command::Home => {
            let user = session.require_user()?;
            if user.is_teacher() {
                let exams = client.my_created_exams(user.id).await?;
                print!("{}", render::exam_list(&exams));
            } else {
                let attempts = client.my_attempts(user.id).await?;
                print!("{}", render::attempt_list(&attempts));
            }
        }
        Command::Exams => {
            session.require_user()?;
            let exams = client.list_exams().await?;
            print!("{}", render::exam_list(&exams));
        }
        Command::Take { code } => {
            let user_id = session.require_user()?.id;
            let exam_id = parse_exam_code(&code).map_err(ClientError::from)?;
            take::run(client.clone(), exam_id, user_id).await?;
        }
        Command::Review { exam_id } => {
            let user_id = session.require_user()?.id;
            let detail = client.review_attempt(ExamId(exam_id), user_id).await?;
            print!("{}", render::review(&detail));
        }
        Command::Detail { exam_id } => {
            let teacher_id = session.require_teacher()?.id;
            let (exam, attempts) = client.exam_overview(ExamId(exam_id), teacher_id).await?;
            print!("{}", render::overview(&exam, &attempts));
        }
        Command::Grade {
            exam_id,
            attempt_id,
            question_id,
            score,
        } => {
            let teacher_id = session.require_teacher()?.id;
            let exam = client
                .exam_detail_with_answers(ExamId(exam_id), teacher_id)
                .await?;
            let question_id = QuestionId(question_id);
            let question = exam
                .question(question_id)
                .ok_or(ValidationError::UnknownQuestion(question_id))
                .map_err(ClientError::from)?;
            validate_essay_grade(question, score).map_err(ClientError::from)?;
            let response = client
                .grade_essay(AttemptId(attempt_id), question_id, score, teacher_id)
                .await?;
            match response.total_score {
                Some(total) => println!("Graded. New total: {}", render::format_score(total)),
                None => println!("Graded."),
            }
        }
        Command::UpdateAnswer {
            exam_id,
            question_id,
            option_id,
            yes,
        } => {
            let teacher_id = session.require_teacher()?.id;
            let exam_id = ExamId(exam_id);
            let exam = client.exam_detail_with_answers(exam_id, teacher_id).await?;
            let question_id = QuestionId(question_id);
            let option_id = OptionId(option_id);
            let question = exam
                .question(question_id)
                .ok_or(ValidationError::UnknownQuestion(question_id))
                .map_err(ClientError::from)?;
            validate_answer_key_change(question, option_id).map_err(ClientError::from)?;
            if !yes
                && !confirm("Changing the answer key regrades every attempt. Continue?").await?
            {
                println!("Cancelled.");
                return Ok(());
            }
            let response = client
                .update_answer(exam_id, question_id, option_id, teacher_id)
                .await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Answer key updated; attempts regraded.".to_string())
            );
        }
        Command::Delete { exam_id, yes } => {
            let teacher_id = session.require_teacher()?.id;
            let exam_id = ExamId(exam_id);
            if !yes
                && !confirm(&format!("Delete exam {exam_id} and all of its attempts?")).await?
            {
                println!("Cancelled.");
                return Ok(());
            }
            client.delete_exam(exam_id, teacher_id).await?;
            println!("Exam {exam_id} deleted.");
        }
        Command::Create { draft } => {
            let teacher_id = session.require_teacher()?.id;
            let raw = tokio::fs::read_to_string(&draft)
                .await
                .with_context(|| format!("failed to read draft '{}'", draft.display()))?;
            let exam_draft: ExamDraft = serde_json::from_str(&raw)
                .with_context(|| format!("'{}' is not a valid exam draft", draft.display()))?;
            let created = client.create_exam(&exam_draft, teacher_id).await?;
            match created.exam_id {
                Some(exam_id) => println!("Created exam {exam_id}. Students join with code {exam_id}."),
                None => println!("Exam created."),
            }
        }
        Command::ParsePdf { pdf, out } => {
            session.require_teacher()?;
            let bytes = tokio::fs::read(&pdf)
                .await
                .with_context(|| format!("failed to read '{}'", pdf.display()))?;
            let file_name = pdf
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "exam.pdf".to_string());
            let questions = client.parse_pdf(&file_name, bytes).await?;
            let draft = draft_from_pdf(&pdf, questions);
            let json = serde_json::to_string_pretty(&draft)?;
            match out {
                Some(out) => {
                    tokio::fs::write(&out, json)
                        .await
                        .with_context(|| format!("failed to write '{}'", out.display()))?;
                    println!(
                        "Read {} question(s) into {}. Mark the correct options, then run `exam create {}`.",
                        draft.questions.len(),
                        out.display(),
                        out.display()
                    );
                }
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

fn draft_from_pdf(pdf: &Path, questions: Vec<DraftQuestion>) -> ExamDraft {
    ExamDraft {
        title: pdf
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
        description: String::new(),
        duration: 60,
        questions,
    }
}

async fn prompt(label: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [y/N] ")).await?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
