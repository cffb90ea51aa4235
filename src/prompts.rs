//! Prompt templates for every grading pipeline.
//!
//! Builders are pure: the same inputs always produce the same prompt. Empty
//! fields are interpolated as empty strings rather than rejected; the source
//! data gives no sign whether blank cells are expected, so rows with a blank
//! question or answer are still sent to the model.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?([A-Za-z][A-Za-z0-9]*)\b[^>]*>").unwrap());

/// `&amp;`, `&lt;` and `&gt;` are left encoded so decoding never creates markup
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(quot|apos|nbsp|#39);").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Tags that separate words when rendered; inline tags are dropped without a gap
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Strip HTML markup from a question and flatten it onto one line.
///
/// The result is a fixed point: cleaning it again returns it unchanged, so a
/// question read back from a report survives another pass intact.
pub fn clean_question(raw: &str) -> String {
    let mut text = clean_pass(raw);
    // stripping can expose new markup, e.g. `<<b>i>`; every pass that still
    // changes something makes the text shorter
    loop {
        let next = clean_pass(&text);
        if next == text {
            return text;
        }
        text = next;
    }
}

fn clean_pass(raw: &str) -> String {
    let text = COMMENT.replace_all(raw, " ");
    let text = TAG.replace_all(&text, |caps: &Captures<'_>| {
        let name = caps[1].to_ascii_lowercase();
        if BLOCK_TAGS.contains(&name.as_str()) { " " } else { "" }
    });
    let text = ENTITY.replace_all(&text, |caps: &Captures<'_>| match &caps[1] {
        "quot" => "\"",
        "apos" | "#39" => "'",
        _ => " ",
    });

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Replace embedded line breaks with single spaces
pub fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Single-score chat prompt
pub fn single_score_prompt(question: &str, answer: &str) -> String {
    format!(r#"Is "{answer}" an adequate response to the question "{question}"?"#)
}

/// First turn of the double-prompt conversation
pub fn double_prompt(question: &str, answer: &str) -> String {
    format!(
        r#"Respond with 1 if "{answer}" an adequate response to the question "{question}". Otherwise respond with 0."#
    )
}

/// Translation request sent before scoring a Spanish answer
pub fn translation_prompt(answer: &str) -> String {
    format!(r#"Translate this text from Spanish to English: "{answer}""#)
}

/// Text-completion prompt; the model is expected to continue with a numeral
pub fn legacy_completion_prompt(question: &str, answer: &str) -> String {
    format!("{question}\nResponse: {answer}\nScore:")
}

/// Prompt stored in fine-tuning exports
pub fn training_prompt(question: &str, answer: &str) -> String {
    format!("Question: {question}\nResponse: {answer}\nScore:")
}
