use serde::{Deserialize, Serialize};
use std::fmt;

/// One data row of the input CSV, resolved through the header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRow {
    pub lesson_name: String,
    /// Raw question text, possibly containing HTML markup
    pub question: String,
    pub answer_id: String,
    /// Student response, possibly non-English
    pub answer: String,
}

/// Token counters reported by the model endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Generated text plus usage for a single call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A role-tagged turn of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which prompt/parse pipeline a run uses; fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptVariant {
    SingleScore,
    /// Sends a follow-up turn when the first reply equals `trigger`
    DoublePrompt { trigger: Option<String> },
    Spanish,
    LegacyCompletion,
}

impl PromptVariant {
    /// Prefix of the report file name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SingleScore => "chat_model_single_prompt",
            Self::DoublePrompt { .. } => "chat_model_double_prompt",
            Self::Spanish => "chat_model_spanish",
            Self::LegacyCompletion => "text_completion_model",
        }
    }

    /// Report header, in column order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::SingleScore => &[
                "lesson_name",
                "question",
                "answer_id",
                "student_answer",
                "latency",
                "score",
                "prompt_tokens",
                "completion_tokens",
                "total_tokens",
            ],
            Self::DoublePrompt { .. } => &[
                "lesson_name",
                "question",
                "answer_id",
                "student_answer",
                "latency",
                "score",
                "followup_score",
                "prompt_tokens",
                "completion_tokens",
                "total_tokens",
            ],
            Self::Spanish => &[
                "lesson_name",
                "question",
                "answer_id",
                "student_answer",
                "answer_english",
                "latency",
                "score",
                "prompt_tokens",
                "completion_tokens",
                "total_tokens",
            ],
            Self::LegacyCompletion => &[
                "lesson_name",
                "question",
                "answer_id",
                "student_answer",
                "score",
                "completion",
                "prompt_tokens",
                "completion_tokens",
                "total_tokens",
                "latency",
            ],
        }
    }
}

/// Integer extracted from a text completion, or `N/A` when nothing matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyScore {
    Scored(u32),
    Unscored,
}

impl fmt::Display for LegacyScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scored(score) => write!(f, "{}", score),
            Self::Unscored => f.write_str("N/A"),
        }
    }
}

/// Variant-specific model output for one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Single {
        score: String,
    },
    Double {
        score: String,
        /// Empty unless the follow-up turn was sent
        followup: String,
    },
    Spanish {
        answer_english: String,
        score: String,
    },
    Legacy {
        score: LegacyScore,
        completion: String,
    },
}

/// One finished report line; never modified after it is appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRow {
    pub lesson_name: String,
    /// Question after HTML stripping
    pub question: String,
    pub answer_id: String,
    pub student_answer: String,
    pub latency_secs: u64,
    pub assessment: Assessment,
    /// Usage of the scoring call
    pub usage: Usage,
}

impl EvaluationRow {
    /// Cells in the column order of the matching `PromptVariant::columns`
    pub fn record(&self) -> Vec<String> {
        let mut cells = vec![
            self.lesson_name.clone(),
            self.question.clone(),
            self.answer_id.clone(),
            self.student_answer.clone(),
        ];
        let latency = self.latency_secs.to_string();
        let tokens = [
            self.usage.prompt_tokens.to_string(),
            self.usage.completion_tokens.to_string(),
            self.usage.total_tokens.to_string(),
        ];

        match &self.assessment {
            Assessment::Single { score } => {
                cells.extend([latency, score.clone()]);
                cells.extend(tokens);
            }
            Assessment::Double { score, followup } => {
                cells.extend([latency, score.clone(), followup.clone()]);
                cells.extend(tokens);
            }
            Assessment::Spanish {
                answer_english,
                score,
            } => {
                cells.extend([answer_english.clone(), latency, score.clone()]);
                cells.extend(tokens);
            }
            Assessment::Legacy { score, completion } => {
                cells.extend([score.to_string(), completion.clone()]);
                cells.extend(tokens);
                cells.push(latency);
            }
        }

        cells
    }
}
