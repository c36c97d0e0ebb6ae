//! Plain-text views printed to stdout.

use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};
use client_core::attempt::{AttemptResult, SubmitTrigger};
use shared::{
    domain::{Attempt, ChoiceOption, Exam, ExamSummary, ExamWithKey, Question, User},
    protocol::{AttemptDetail, AttemptSummary},
};

/// Seconds left below which the countdown is shown as a warning.
pub const WARNING_THRESHOLD_SECONDS: u32 = 60;

pub fn format_clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn countdown_line(remaining_seconds: u32) -> String {
    if remaining_seconds < WARNING_THRESHOLD_SECONDS {
        format!(
            "!! Time left: {} (less than a minute)",
            format_clock(remaining_seconds)
        )
    } else {
        format!("Time left: {}", format_clock(remaining_seconds))
    }
}

/// Whether a tick is worth printing: every minute, then every 10 s in the
/// final minute.
pub fn should_announce(remaining_seconds: u32) -> bool {
    if remaining_seconds < WARNING_THRESHOLD_SECONDS {
        remaining_seconds % 10 == 0
    } else {
        remaining_seconds % 60 == 0
    }
}

pub fn option_letter(index: usize) -> char {
    u8::try_from(index)
        .ok()
        .filter(|index| *index < 26)
        .map(|index| char::from(b'A' + index))
        .unwrap_or('?')
}

pub fn option_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    upper
        .is_ascii_uppercase()
        .then(|| usize::from(upper as u8 - b'A'))
}

pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{score:.0}")
    } else {
        format!("{score:.2}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn question_kind<O>(question: &Question<O>) -> &'static str
where
    O: ChoiceOption,
{
    if question.is_essay() {
        "essay"
    } else {
        "multiple choice"
    }
}

pub fn whoami(user: &User) -> String {
    format!("{} ({}) id={} role={}", user.display_name(), user.username, user.id, user.role)
}

/// The exam as the student sees it, with their current answers marked.
pub fn exam_sheet(exam: &Exam, attempt: Option<&Attempt>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} (exam {}) ==", exam.title, exam.id);
    if let Some(description) = exam.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(out, "{description}");
    }
    match exam.countdown_seconds() {
        Some(seconds) => {
            let _ = writeln!(out, "Duration: {}", format_clock(seconds));
        }
        None => {
            let _ = writeln!(out, "No time limit");
        }
    }

    for (index, question) in exam.questions.iter().enumerate() {
        let _ = writeln!(
            out,
            "\n{}. {} [{}, {} pt]",
            index + 1,
            question.content,
            question_kind(question),
            format_score(question.score)
        );
        if question.is_essay() {
            let text = attempt
                .and_then(|attempt| attempt.essay_text(question.id))
                .filter(|text| !text.is_empty());
            let _ = writeln!(out, "   answer: {}", text.unwrap_or("(empty)"));
            continue;
        }
        let selected = attempt.and_then(|attempt| attempt.selected_option(question.id));
        for (option_index, option) in question.options.iter().enumerate() {
            let mark = if selected == Some(option.id) { "x" } else { " " };
            let _ = writeln!(
                out,
                "   [{mark}] {}. {}",
                option_letter(option_index),
                option.content
            );
        }
    }
    out
}

pub fn answer_help() -> &'static str {
    "Commands: `<n> <letter>` choose an option, `e <n> <text>` write an essay answer, \
     `show` reprint the exam, `submit` hand in, `quit` leave without submitting"
}

pub fn result_summary(result: &AttemptResult) -> String {
    let mut out = String::new();
    if result.trigger == SubmitTrigger::Timeout {
        let _ = writeln!(out, "Time is up. Your answers were submitted automatically.");
    } else {
        let _ = writeln!(out, "Submitted.");
    }
    let _ = writeln!(
        out,
        "Score: {} / {}",
        format_score(result.total_score),
        format_score(result.max_score)
    );
    if result.partial {
        let _ = writeln!(
            out,
            "This score covers multiple-choice questions only; essay answers are waiting for your teacher."
        );
    }
    out
}

pub fn exam_list(exams: &[ExamSummary]) -> String {
    if exams.is_empty() {
        return "No exams yet.\n".to_string();
    }
    let mut out = String::new();
    for exam in exams {
        let duration = exam
            .duration
            .filter(|minutes| *minutes > 0)
            .map(|minutes| format!("{minutes} min"))
            .unwrap_or_else(|| "untimed".to_string());
        let _ = writeln!(
            out,
            "{:>5}  {}  ({duration}, created {})",
            exam.id,
            exam.title,
            format_time(exam.created_at)
        );
    }
    out
}

pub fn attempt_list(attempts: &[AttemptSummary]) -> String {
    if attempts.is_empty() {
        return "No attempts yet.\n".to_string();
    }
    let mut out = String::new();
    for attempt in attempts {
        let title = attempt.exam_title.as_deref().unwrap_or("(untitled)");
        let exam = attempt
            .exam_id
            .map(|id| format!("exam {id}"))
            .unwrap_or_else(|| "exam ?".to_string());
        let score = attempt
            .total_score
            .map(format_score)
            .unwrap_or_else(|| "-".to_string());
        let who = attempt
            .student_name
            .as_deref()
            .map(|name| format!("  {name}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "attempt {:>5}  {exam}  {title}{who}  score {score}  started {}",
            attempt.attempt_id,
            format_time(attempt.start_time)
        );
    }
    out
}

/// A graded attempt, question by question.
pub fn review(detail: &AttemptDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {} ==",
        detail.exam_title.as_deref().unwrap_or("Exam review")
    );
    let _ = writeln!(
        out,
        "Started {}  total score {}",
        format_time(detail.start_time),
        detail
            .total_score
            .map(format_score)
            .unwrap_or_else(|| "-".to_string())
    );

    for (index, question) in detail.questions.iter().enumerate() {
        let answer = detail.answer_for(question.id);
        let score = answer
            .and_then(|answer| answer.score)
            .map(|score| format!("{} / {}", format_score(score), format_score(question.score)))
            .unwrap_or_else(|| "not graded".to_string());
        let _ = writeln!(out, "\n{}. {} [{score}]", index + 1, question.content);

        if question.is_essay() {
            let text = answer
                .and_then(|answer| answer.essay_answer.as_deref())
                .filter(|text| !text.trim().is_empty())
                .unwrap_or("not answered");
            let _ = writeln!(out, "   answer: {text}");
            continue;
        }
        let selected = answer.and_then(|answer| answer.selected_option_id);
        for (option_index, option) in question.options.iter().enumerate() {
            let mark = if selected == Some(option.id) { "x" } else { " " };
            let _ = writeln!(
                out,
                "   [{mark}] {}. {}",
                option_letter(option_index),
                option.content
            );
        }
        if selected.is_none() {
            let _ = writeln!(out, "   not answered");
        }
    }
    out
}

/// Answer key and attempts for the exam owner.
pub fn overview(exam: &ExamWithKey, attempts: &[AttemptSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} (exam {}) ==", exam.title, exam.id);
    for (index, question) in exam.questions.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [q{}] {} [{}, {} pt]",
            index + 1,
            question.id,
            question.content,
            question_kind(question),
            format_score(question.score)
        );
        for (option_index, option) in question.options.iter().enumerate() {
            let mark = if option.is_correct { "*" } else { " " };
            let _ = writeln!(
                out,
                "   {mark} {}. [o{}] {}",
                option_letter(option_index),
                option.id,
                option.content
            );
        }
    }

    let _ = writeln!(out, "\nAttempts ({}):", attempts.len());
    out.push_str(&attempt_list(attempts));

    let essays: Vec<_> = exam.questions.iter().filter(|q| q.is_essay()).collect();
    for attempt in attempts {
        for question in &essays {
            let Some(answer) = attempt.answer_for(question.id) else {
                continue;
            };
            let text = answer
                .essay_answer
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or("not answered");
            let score = answer
                .score
                .map(format_score)
                .unwrap_or_else(|| "not graded".to_string());
            let _ = writeln!(
                out,
                "  attempt {} q{}: {text} [{score}]",
                attempt.attempt_id, question.id
            );
        }
    }
    out
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
