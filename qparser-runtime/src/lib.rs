use qparser_grammar::ParseToken;

mod ast;
mod recognizer;

pub use ast::{AstBuilder, AstError, SyntaxNode, SyntaxTreeBuilder};
pub use recognizer::{LdRecognizer, RecognitionError};

/// One lexical match produced by the upstream tokenizer: the terminal
/// token plus its source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseMatch {
    pub token: ParseToken,
    pub offset: u32,
    pub length: u32,
}

/// A pre-materialized lexical stream. The recognizer never suspends: it
/// walks this buffer to the end and substitutes EOF past it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexStream {
    matches: Vec<ParseMatch>,
}

impl LexStream {
    pub fn new(matches: Vec<ParseMatch>) -> Self {
        LexStream { matches }
    }

    /// Packs bare tokens into a stream with zeroed spans.
    pub fn from_tokens(tokens: &[ParseToken]) -> Self {
        LexStream {
            matches: tokens
                .iter()
                .map(|token| ParseMatch {
                    token: *token,
                    offset: 0,
                    length: 0,
                })
                .collect(),
        }
    }

    pub fn matches(&self) -> &[ParseMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// The token at `index`, or EOF past the end of the stream.
    pub fn token_at(&self, index: usize) -> ParseToken {
        self.matches
            .get(index)
            .map(|m| m.token)
            .unwrap_or(ParseToken::SPECIAL_EOF)
    }
}

/// Recognition output: the input stream, unchanged, plus the reduction
/// sequence in leftmost bottom-up order with every delayed slot patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutput {
    pub lex_stream: LexStream,
    pub rules: Vec<ParseToken>,
}

#[cfg(test)]
mod tests;
