//! Decisions separated from mutation
//!
//! Steps never prompt. Every yes/no question a plan can raise is answered
//! up front, from (in order of precedence):
//!
//! 1. explicit answers (CLI flags, then the config file)
//! 2. the interactive front end, when one is attached
//! 3. the question's documented unattended default
//!
//! The resulting [`Answers`] is a plain value the runner reads; the engine
//! is fully testable without a terminal or dialog library.

use crate::types::Question;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::process::Command;
use tracing::{debug, info, warn};

/// Resolved or partially resolved answers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    values: BTreeMap<Question, bool>,
}

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<Question, bool>) -> Self {
        Self { values }
    }

    pub fn with(mut self, question: Question, answer: bool) -> Self {
        self.values.insert(question, answer);
        self
    }

    pub fn set(&mut self, question: Question, answer: bool) {
        self.values.insert(question, answer);
    }

    /// Explicit answer, if one was given
    pub fn get(&self, question: Question) -> Option<bool> {
        self.values.get(&question).copied()
    }

    /// Explicit answer or the unattended default
    pub fn answer(&self, question: Question) -> bool {
        self.get(question)
            .unwrap_or_else(|| question.unattended_default())
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts
    pub fn merged_with(mut self, other: &Answers) -> Self {
        self.values.extend(other.values.iter().map(|(q, a)| (*q, *a)));
        self
    }
}

/// Interactive input source
pub trait Frontend {
    /// Ask a yes/no question. `None` means no usable answer (closed stdin,
    /// dismissed dialog, no display) and falls through to the default.
    fn ask(&mut self, question: Question) -> Option<bool>;
}

/// Where an answer came from, for the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Explicit,
    Frontend,
    Default,
}

/// Resolves questions against explicit answers, a front end and defaults
pub struct Decider {
    explicit: Answers,
    frontend: Option<Box<dyn Frontend>>,
    resolved: Answers,
}

impl Decider {
    pub fn new(explicit: Answers, frontend: Option<Box<dyn Frontend>>) -> Self {
        Self {
            explicit,
            frontend,
            resolved: Answers::new(),
        }
    }

    /// Unattended: explicit answers and defaults only
    pub fn unattended(explicit: Answers) -> Self {
        Self::new(explicit, None)
    }

    /// Answer one question; each question is asked at most once
    pub fn decide(&mut self, question: Question) -> bool {
        if let Some(answer) = self.resolved.get(question) {
            return answer;
        }
        let (answer, source) = self.lookup(question);
        info!("Decision {} = {} ({:?})", question, answer, source);
        self.resolved.set(question, answer);
        answer
    }

    /// Answer every question in `questions` and return the full set
    pub fn resolve_all(&mut self, questions: impl IntoIterator<Item = Question>) -> Answers {
        for q in questions {
            self.decide(q);
        }
        self.resolved.clone()
    }

    fn lookup(&mut self, question: Question) -> (bool, AnswerSource) {
        if let Some(answer) = self.explicit.get(question) {
            return (answer, AnswerSource::Explicit);
        }
        if let Some(frontend) = self.frontend.as_mut() {
            if let Some(answer) = frontend.ask(question) {
                return (answer, AnswerSource::Frontend);
            }
            debug!("Front end gave no answer for {}", question);
        }
        (question.unattended_default(), AnswerSource::Default)
    }
}

/// y/N prompts on stdin/stdout
pub struct TerminalFrontend<R, W> {
    input: R,
    output: W,
}

impl TerminalFrontend<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: std::io::stdin().lock(),
            output: std::io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> TerminalFrontend<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Frontend for TerminalFrontend<R, W> {
    fn ask(&mut self, question: Question) -> Option<bool> {
        let hint = if question.unattended_default() { "[Y/n]" } else { "[y/N]" };
        write!(self.output, "{} {} ", question.prompt(), hint).ok()?;
        self.output.flush().ok()?;

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => parse_yes_no(&line),
        }
    }
}

/// Interpret a typed reply. Empty or unrecognised input is no answer.
pub fn parse_yes_no(reply: &str) -> Option<bool> {
    match reply.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// `zenity --question` dialogs
pub struct ZenityFrontend {
    title: String,
}

impl ZenityFrontend {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }
}

impl Frontend for ZenityFrontend {
    fn ask(&mut self, question: Question) -> Option<bool> {
        let status = Command::new("zenity")
            .args(["--question", "--width=420"])
            .arg(format!("--title={}", self.title))
            .arg(format!("--text={}", question.prompt()))
            .status();

        match status.map(|s| s.code()) {
            Ok(Some(0)) => Some(true),
            Ok(Some(1)) => Some(false),
            Ok(code) => {
                warn!("zenity exited with {:?}; using default for {}", code, question);
                None
            }
            Err(e) => {
                warn!("zenity unavailable ({}); using default for {}", e, question);
                None
            }
        }
    }
}
