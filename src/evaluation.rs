use crate::client::CompletionClient;
use crate::config::RunConfig;
use crate::error::CompletionError;
use crate::models::{Assessment, ChatTurn, EvaluationRow, InputRow, PromptVariant};
use crate::parser::{PatternScoreParser, ScoreParser, should_follow_up};
use crate::prompts;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Model names and fixed texts an evaluator needs from the run configuration
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub chat_model: String,
    pub translation_model: String,
    pub completion_model: String,
    pub followup_prompt: String,
}

impl From<&RunConfig> for EvaluatorSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            chat_model: config.chat_model.clone(),
            translation_model: config.translation_model.clone(),
            completion_model: config.completion_model.clone(),
            followup_prompt: config.followup_prompt.clone(),
        }
    }
}

/// Grades one row at a time for a fixed prompt variant
pub struct Evaluator<C> {
    client: C,
    variant: PromptVariant,
    settings: EvaluatorSettings,
    parser: Box<dyn ScoreParser>,
}

impl<C: CompletionClient> Evaluator<C> {
    /// Create an evaluator using the `Score: (\d)` parser
    pub fn new(client: C, variant: PromptVariant, settings: EvaluatorSettings) -> Self {
        Self::with_parser(client, variant, settings, Box::new(PatternScoreParser::new()))
    }

    pub fn with_parser(
        client: C,
        variant: PromptVariant,
        settings: EvaluatorSettings,
        parser: Box<dyn ScoreParser>,
    ) -> Self {
        Self {
            client,
            variant,
            settings,
            parser,
        }
    }

    pub fn variant(&self) -> &PromptVariant {
        &self.variant
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Build the prompt, call the model and parse the reply for one row
    pub async fn evaluate_row(&self, row: &InputRow) -> Result<EvaluationRow, CompletionError> {
        let question = prompts::clean_question(&row.question);

        let (student_answer, assessment, usage, latency) = match &self.variant {
            PromptVariant::SingleScore => {
                let prompt = prompts::single_score_prompt(&question, &row.answer);
                let start = Instant::now();
                let completion = self.ask(&[ChatTurn::user(prompt)]).await?;
                let latency = start.elapsed();

                info!(score = %completion.text, "scored");
                let assessment = Assessment::Single {
                    score: completion.text,
                };
                (row.answer.clone(), assessment, completion.usage, latency)
            }
            PromptVariant::DoublePrompt { trigger } => {
                let prompt = prompts::double_prompt(&question, &row.answer);
                let start = Instant::now();
                let first_turn = ChatTurn::user(prompt);
                let completion = self.ask(std::slice::from_ref(&first_turn)).await?;

                let followup = if should_follow_up(&completion.text, trigger.as_deref()) {
                    let turns = [
                        first_turn,
                        ChatTurn::assistant(completion.text.clone()),
                        ChatTurn::user(self.settings.followup_prompt.clone()),
                    ];
                    let explanation = self.ask(&turns).await?;
                    info!(followup = %explanation.text, "follow-up score");
                    explanation.text
                } else {
                    String::new()
                };
                let latency = start.elapsed();

                info!(score = %completion.text, "scored");
                let assessment = Assessment::Double {
                    score: completion.text,
                    followup,
                };
                (row.answer.clone(), assessment, completion.usage, latency)
            }
            PromptVariant::Spanish => {
                let answer_english = self.translate(&row.answer).await?;

                let prompt = prompts::single_score_prompt(&question, &row.answer);
                let start = Instant::now();
                let completion = self.ask(&[ChatTurn::user(prompt)]).await?;
                let latency = start.elapsed();

                info!(score = %completion.text, "scored");
                let assessment = Assessment::Spanish {
                    answer_english,
                    score: completion.text,
                };
                (row.answer.clone(), assessment, completion.usage, latency)
            }
            PromptVariant::LegacyCompletion => {
                let answer = prompts::collapse_newlines(&row.answer);
                let prompt = prompts::legacy_completion_prompt(&question, &answer);
                debug!(%prompt, "completion prompt");

                let start = Instant::now();
                let completion = self
                    .client
                    .complete(&self.settings.completion_model, &prompt)
                    .await?;
                let latency = start.elapsed();

                debug!(completion = %completion.text, "raw completion");
                let score = self.parser.parse(&completion.text);
                info!(%score, "scored");
                let assessment = Assessment::Legacy {
                    score,
                    completion: completion.text,
                };
                (answer, assessment, completion.usage, latency)
            }
        };

        Ok(EvaluationRow {
            lesson_name: row.lesson_name.clone(),
            question,
            answer_id: row.answer_id.clone(),
            student_answer,
            latency_secs: round_secs(latency),
            assessment,
            usage,
        })
    }

    async fn ask(&self, turns: &[ChatTurn]) -> Result<crate::models::Completion, CompletionError> {
        if let Some(last) = turns.last() {
            debug!(prompt = %last.content, "chat prompt");
        }
        self.client.chat(&self.settings.chat_model, turns).await
    }

    /// Spanish to English translation of a student answer
    async fn translate(&self, answer: &str) -> Result<String, CompletionError> {
        debug!(%answer, "translating");
        let turns = [ChatTurn::user(prompts::translation_prompt(answer))];
        let translation = self
            .client
            .chat(&self.settings.translation_model, &turns)
            .await?;
        debug!(translation = %translation.text, "finished translating");
        Ok(translation.text)
    }
}

/// Wall-clock duration rounded to the nearest whole second
pub fn round_secs(elapsed: Duration) -> u64 {
    elapsed.as_secs_f64().round() as u64
}
