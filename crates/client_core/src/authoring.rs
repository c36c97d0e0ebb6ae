//! Local checks run before authoring and grading requests leave the client.

use shared::{
    domain::{ExamId, KeyedOption, OptionId, Question, QuestionType},
    protocol::ExamDraft,
};

use crate::error::ValidationError;

/// Parses the exam code a student types on the home screen.
pub fn parse_exam_code(raw: &str) -> Result<ExamId, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingExamCode);
    }
    match trimmed.parse::<i64>() {
        Ok(id) if id > 0 => Ok(ExamId(id)),
        _ => Err(ValidationError::InvalidExamCode(trimmed.to_string())),
    }
}

/// Checks a draft in authoring order and reports the first problem found.
/// Question and option numbers in errors are 1-based.
pub fn validate_draft(draft: &ExamDraft) -> Result<(), ValidationError> {
    if draft.title.trim().is_empty() {
        return Err(ValidationError::MissingTitle);
    }
    if draft.questions.is_empty() {
        return Err(ValidationError::NoQuestions);
    }

    for (index, question) in draft.questions.iter().enumerate() {
        let number = index + 1;
        if question.content.trim().is_empty() {
            return Err(ValidationError::EmptyQuestion(number));
        }
        if question.question_type != QuestionType::MultipleChoice {
            continue;
        }
        if question.options.len() < 2 {
            return Err(ValidationError::TooFewOptions(number));
        }
        if let Some(empty) = question
            .options
            .iter()
            .position(|option| option.content.trim().is_empty())
        {
            return Err(ValidationError::EmptyOption {
                question: number,
                option: empty + 1,
            });
        }
        if !question.options.iter().any(|option| option.is_correct) {
            return Err(ValidationError::NoCorrectOption(number));
        }
    }
    Ok(())
}

/// A manual essay score must be a finite number within the question's points.
pub fn validate_essay_grade(
    question: &Question<KeyedOption>,
    score: f64,
) -> Result<(), ValidationError> {
    if !question.is_essay() {
        return Err(ValidationError::NotEssay(question.id));
    }
    if !score.is_finite() || score < 0.0 || score > question.score {
        return Err(ValidationError::ScoreOutOfRange {
            score,
            max: question.score,
        });
    }
    Ok(())
}

/// The new correct option must be one of the question's own options.
pub fn validate_answer_key_change(
    question: &Question<KeyedOption>,
    option_id: OptionId,
) -> Result<(), ValidationError> {
    if question.question_type != QuestionType::MultipleChoice {
        return Err(ValidationError::NotMultipleChoice(question.id));
    }
    if !question.has_option(option_id) {
        return Err(ValidationError::ForeignOption {
            question: question.id,
            option: option_id,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/authoring_tests.rs"]
mod tests;
