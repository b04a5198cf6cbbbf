use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display};

use qparser_grammar::{Grammar, ParseToken};
use qparser_table::ParseTable;

use crate::{LexStream, ParseOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// The table has no actions at all; no grammar was compiled.
    EmptyTable,
    /// The stream token matches none of the terminals accepted here.
    UnexpectedToken {
        found: ParseToken,
        expected: Vec<ParseToken>,
        lex_index: usize,
    },
    /// ACCEPT was reached with stream tokens left over.
    TrailingInput { lex_index: usize },
    /// The table walked out of bounds or violated a stack invariant;
    /// recognition state no longer makes sense.
    CorruptTable,
}

impl Error for RecognitionError {}

impl Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::EmptyTable => write!(f, "parse table is empty"),
            RecognitionError::UnexpectedToken {
                found,
                expected,
                lex_index,
            } => {
                write!(
                    f,
                    "unexpected token {} at stream index {}, expected one of:",
                    found, lex_index
                )?;
                for token in expected {
                    write!(f, " {}", token)?;
                }
                Ok(())
            }
            RecognitionError::TrailingInput { lex_index } => {
                write!(f, "expected end of input at stream index {}", lex_index)
            }
            RecognitionError::CorruptTable => write!(f, "parse table is corrupt"),
        }
    }
}

/// The table-driven LD stack machine.
///
/// A single dispatch loop reads one action word at a time: shifts consume
/// the stream, reduces append to the output rule sequence (IGNORE marks a
/// slot for later patching), REDUCE_PREV patches the most recent
/// unpatched slot, and pivot/goto/return thread control through the flat
/// table. `lookahead_state` remembers the row entered by the most recent
/// pivot; goto actions fire only when their recorded row matches it.
#[derive(Debug)]
pub struct LdRecognizer {
    table: ParseTable,
    silent_terminals: BTreeSet<ParseToken>,
}

impl LdRecognizer {
    pub fn new(table: ParseTable) -> Self {
        LdRecognizer {
            table,
            silent_terminals: BTreeSet::new(),
        }
    }

    /// Adopts the grammar's silent-terminal set; those tokens are read
    /// past without ever being offered to the table.
    pub fn with_silent_terminals(mut self, grammar: &Grammar) -> Self {
        self.silent_terminals = grammar
            .registry()
            .tokens()
            .map(|(token, _)| token)
            .filter(|token| grammar.is_silent_terminal(*token))
            .collect();
        self
    }

    pub fn table(&self) -> &ParseTable {
        &self.table
    }

    pub fn recognize(&self, lex_stream: LexStream) -> Result<ParseOutput, RecognitionError> {
        if self.table.is_empty() {
            return Err(RecognitionError::EmptyTable);
        }
        let actions = self.table.actions();

        let mut parse_state: usize = 0;
        let mut return_states: Vec<usize> = Vec::new();
        let mut lookahead_state: usize = 0;
        let mut delayed_states: Vec<usize> = Vec::new();
        let mut rules: Vec<ParseToken> = Vec::new();

        let mut lex_state: usize = 0;
        let mut current_token = ParseToken::SPECIAL_EOF;
        let mut skip_reading_token = false;

        loop {
            if !skip_reading_token {
                while self.silent_terminals.contains(&lex_stream.token_at(lex_state)) {
                    lex_state += 1;
                }
                current_token = lex_stream.token_at(lex_state);
            }
            skip_reading_token = true;

            let action = *actions
                .get(parse_state)
                .ok_or(RecognitionError::CorruptTable)?;

            // Shift: the action word is the expected terminal itself.
            if action == current_token {
                parse_state += 1;
                lex_state += 1;
                skip_reading_token = false;
                continue;
            }

            if action.raw() < ParseToken::RESERVED_FIRST {
                let flags = ParseToken::FLAG_SHIFT | ParseToken::FLAG_REDUCE_PREV;
                if action.raw() & flags == 0 {
                    // Reduce; an IGNORE slot is remembered for patching.
                    if action == ParseToken::SPECIAL_IGNORE {
                        delayed_states.push(rules.len());
                    }
                    rules.push(action);
                    parse_state += 1;
                    continue;
                }
                if action.raw() & ParseToken::FLAG_REDUCE_PREV != 0 {
                    let slot = delayed_states
                        .pop()
                        .ok_or(RecognitionError::CorruptTable)?;
                    rules[slot] =
                        ParseToken::from_raw(action.raw() & !ParseToken::FLAG_REDUCE_PREV);
                    parse_state += 1;
                    continue;
                }
                // A shift action whose terminal is not the current token.
                return Err(RecognitionError::UnexpectedToken {
                    found: current_token,
                    expected: vec![action],
                    lex_index: lex_state,
                });
            }

            if action == ParseToken::ACTION_PIVOT {
                let count = actions
                    .get(parse_state + 1)
                    .ok_or(RecognitionError::CorruptTable)?
                    .raw() as usize;
                let branches = parse_state + 2;
                let continuation = branches + 2 * count;
                if actions.len() < continuation {
                    return Err(RecognitionError::CorruptTable);
                }
                let mut taken = false;
                for branch in 0..count {
                    if actions[branches + 2 * branch] == current_token {
                        return_states.push(continuation);
                        parse_state = actions[branches + 2 * branch + 1].raw() as usize;
                        lookahead_state = parse_state;
                        lex_state += 1;
                        skip_reading_token = false;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    let expected = (0..count)
                        .map(|branch| actions[branches + 2 * branch])
                        .collect();
                    return Err(RecognitionError::UnexpectedToken {
                        found: current_token,
                        expected,
                        lex_index: lex_state,
                    });
                }
            } else if action == ParseToken::ACTION_RETURN {
                parse_state = return_states
                    .pop()
                    .ok_or(RecognitionError::CorruptTable)?;
            } else if action == ParseToken::ACTION_GOTO {
                let required = actions
                    .get(parse_state + 1)
                    .ok_or(RecognitionError::CorruptTable)?
                    .raw() as usize;
                if lookahead_state == required {
                    // Jump without touching the lookahead state; only
                    // pivots set it.
                    parse_state = actions
                        .get(parse_state + 2)
                        .ok_or(RecognitionError::CorruptTable)?
                        .raw() as usize;
                } else {
                    parse_state += 3;
                }
            } else if action == ParseToken::ACTION_ACCEPT {
                if current_token != ParseToken::SPECIAL_EOF {
                    return Err(RecognitionError::TrailingInput {
                        lex_index: lex_state,
                    });
                }
                if !delayed_states.is_empty() || !return_states.is_empty() {
                    return Err(RecognitionError::CorruptTable);
                }
                return Ok(ParseOutput { lex_stream, rules });
            } else {
                return Err(RecognitionError::CorruptTable);
            }
        }
    }
}
