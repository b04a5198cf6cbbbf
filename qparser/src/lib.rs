use std::io::Write;

mod errors;

pub use errors::QParserError;
pub use qparser_grammar::{
    Grammar, GrammarBuilder, GrammarError, ParseToken, TokenError, TokenRegistry,
};
pub use qparser_runtime::{
    AstBuilder, AstError, LdRecognizer, LexStream, ParseMatch, ParseOutput, RecognitionError,
    SyntaxNode, SyntaxTreeBuilder,
};
pub use qparser_table::{ActionTableBuilder, ConstructError, LdConstructor, ParseTable, RowId};

/// Compiles a grammar into its action table, reporting non-fatal
/// findings to `diagnostics`.
pub fn compile(grammar: &Grammar, diagnostics: &mut dyn Write) -> Result<ParseTable, QParserError> {
    Ok(LdConstructor::new(grammar).construct(diagnostics)?)
}

/// A compiled grammar and its recognizer, ready to run over lexical
/// streams.
#[derive(Debug)]
pub struct Parser {
    grammar: Grammar,
    recognizer: LdRecognizer,
}

impl Parser {
    pub fn from_grammar(
        grammar: Grammar,
        diagnostics: &mut dyn Write,
    ) -> Result<Self, QParserError> {
        let table = LdConstructor::new(&grammar).construct(diagnostics)?;
        let recognizer = LdRecognizer::new(table).with_silent_terminals(&grammar);
        Ok(Parser {
            grammar,
            recognizer,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn table(&self) -> &ParseTable {
        self.recognizer.table()
    }

    /// Runs the recognition pass over a lexical stream.
    pub fn parse(&self, stream: LexStream) -> Result<ParseOutput, QParserError> {
        self.recognizer
            .recognize(stream)
            .map_err(|error| QParserError::recognition(&self.grammar, error))
    }

    /// Recognition followed by the reference tree folder.
    pub fn parse_to_tree(&self, stream: LexStream) -> Result<SyntaxNode, QParserError> {
        let output = self.parse(stream)?;
        Ok(SyntaxTreeBuilder::new().build(&self.grammar, &output)?)
    }
}
