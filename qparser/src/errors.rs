use std::error::Error;
use std::fmt::{self, Display};

use owo_colors::OwoColorize;
use qparser_grammar::{Grammar, GrammarError, ParseToken};
use qparser_runtime::{AstError, RecognitionError};
use qparser_table::ConstructError;

/// Top-level error for hosts: one of the stage errors, rendered with
/// registry names where tokens are involved. Messages carry the pipeline
/// stage that rejected the input, e.g. `error[recognition]: ...`.
#[derive(Debug)]
pub struct QParserError {
    kind: QParserErrorKind,
}

#[derive(Debug)]
enum QParserErrorKind {
    Grammar(GrammarError),
    Construct(ConstructError),
    Recognition { rendered: String },
    Ast(AstError),
}

impl QParserError {
    pub fn recognition(grammar: &Grammar, error: RecognitionError) -> Self {
        let rendered = match &error {
            RecognitionError::UnexpectedToken {
                found,
                expected,
                lex_index,
            } => {
                let expected_names: Vec<String> = expected
                    .iter()
                    .map(|token| token_name(grammar, *token))
                    .collect();
                format!(
                    "unexpected {} at stream index {}, expected one of: {}",
                    token_name(grammar, *found),
                    lex_index,
                    expected_names.join(" ")
                )
            }
            other => format!("{}", other),
        };
        QParserError {
            kind: QParserErrorKind::Recognition { rendered },
        }
    }

    /// The pipeline stage the error came from.
    pub fn stage(&self) -> &'static str {
        match &self.kind {
            QParserErrorKind::Grammar(_) => "grammar",
            QParserErrorKind::Construct(_) => "table",
            QParserErrorKind::Recognition { .. } => "recognition",
            QParserErrorKind::Ast(_) => "ast",
        }
    }
}

fn token_name(grammar: &Grammar, token: ParseToken) -> String {
    if token == ParseToken::SPECIAL_EOF {
        return String::from("end of input");
    }
    match grammar.registry().token_name(token) {
        Some(name) => format!("'{}'", name),
        None => format!("{}", token),
    }
}

impl From<GrammarError> for QParserError {
    fn from(error: GrammarError) -> Self {
        QParserError {
            kind: QParserErrorKind::Grammar(error),
        }
    }
}

impl From<ConstructError> for QParserError {
    fn from(error: ConstructError) -> Self {
        QParserError {
            kind: QParserErrorKind::Construct(error),
        }
    }
}

impl From<AstError> for QParserError {
    fn from(error: AstError) -> Self {
        QParserError {
            kind: QParserErrorKind::Ast(error),
        }
    }
}

impl Error for QParserError {}

impl Display for QParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: ", "error".bright_red().bold(), self.stage())?;
        match &self.kind {
            QParserErrorKind::Grammar(error) => write!(f, "{}", error),
            QParserErrorKind::Construct(error) => write!(f, "{}", error),
            QParserErrorKind::Recognition { rendered } => write!(f, "{}", rendered),
            QParserErrorKind::Ast(error) => write!(f, "{}", error),
        }
    }
}
