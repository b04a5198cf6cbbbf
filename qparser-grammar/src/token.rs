use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display};

/// An opaque 32-bit token identifier shared by the lexer, the grammar and
/// the action table.
///
/// The token space is partitioned by reserved ranges and bit flags:
/// terminals carry [`ParseToken::FLAG_SHIFT`], unresolved forward
/// declarations live in a high temporary range, and the very top of the
/// space holds the action opcodes written into parse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParseToken(u32);

impl ParseToken {
    /// High bit carried by every terminal handed out by the lexer.
    pub const FLAG_SHIFT: u32 = 0x8000_0000;
    /// Marks a rule id in an action table as a retroactive reduction.
    pub const FLAG_REDUCE_PREV: u32 = 0x4000_0000;
    /// First id of the range used for unresolved forward declarations.
    pub const TEMPORARY_FIRST: u32 = 0x2000_0000;
    /// Start of the opcode block at the top of the token space.
    pub const RESERVED_FIRST: u32 = 0xffff_ff00;

    /// Branch on the next terminal; followed by a pair count and that many
    /// `(terminal, row)` pairs.
    pub const ACTION_PIVOT: ParseToken = ParseToken(Self::RESERVED_FIRST | 0x01);
    /// Pop the return stack and resume there.
    pub const ACTION_RETURN: ParseToken = ParseToken(Self::RESERVED_FIRST | 0x02);
    /// Conditional jump on the lookahead row; followed by `(lookahead, target)`.
    pub const ACTION_GOTO: ParseToken = ParseToken(Self::RESERVED_FIRST | 0x03);
    /// Recognition succeeded if the stream is exhausted.
    pub const ACTION_ACCEPT: ParseToken = ParseToken(Self::RESERVED_FIRST | 0x04);

    /// Placeholder reduced in place of a rule that is not yet known.
    pub const SPECIAL_IGNORE: ParseToken = ParseToken(0x1fff_ffff);
    /// Synthesized once the lexical stream is exhausted.
    pub const SPECIAL_EOF: ParseToken = ParseToken(0xffff_ffff);

    pub const fn from_raw(raw: u32) -> Self {
        ParseToken(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn terminal(index: u32) -> Self {
        ParseToken(Self::FLAG_SHIFT | index)
    }

    pub const fn nonterminal(index: u32) -> Self {
        ParseToken(index)
    }

    /// Rule ids share the unflagged low range with nonterminal ids; the two
    /// never occur in the same position, so context keeps them apart.
    pub const fn rule(index: u32) -> Self {
        ParseToken(index)
    }

    pub const fn reduce_prev(rule: u32) -> Self {
        ParseToken(Self::FLAG_REDUCE_PREV | rule)
    }

    pub const fn is_terminal(self) -> bool {
        self.0 & Self::FLAG_SHIFT != 0 && self.0 < Self::RESERVED_FIRST
    }

    pub const fn is_temporary(self) -> bool {
        self.0 >= Self::TEMPORARY_FIRST && self.0 < Self::FLAG_REDUCE_PREV
    }

    pub const fn is_nonterminal(self) -> bool {
        self.0 < Self::SPECIAL_IGNORE.0
    }

    pub const fn is_valid(self) -> bool {
        self.is_terminal() || self.is_nonterminal() || self.is_temporary()
    }

    /// The id with partition flags stripped, for display purposes.
    pub const fn index(self) -> u32 {
        self.0 & !(Self::FLAG_SHIFT | Self::FLAG_REDUCE_PREV)
    }
}

impl Display for ParseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::SPECIAL_EOF {
            write!(f, "<eof>")
        } else if self.is_terminal() {
            write!(f, "t{}", self.index())
        } else if self.is_temporary() {
            write!(f, "fwd{}", self.0 - Self::TEMPORARY_FIRST)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum TokenError {
    /// A name was generated twice; generation is a one-shot contract.
    DuplicateName(String),
    /// `resolve_temporary` was called for a name that is not bound to a
    /// temporary token.
    NotTemporary(String),
}

impl Error for TokenError {}

impl Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::DuplicateName(name) => {
                write!(f, "token name '{}' is already bound", name)
            }
            TokenError::NotTemporary(name) => {
                write!(f, "token name '{}' is not a forward declaration", name)
            }
        }
    }
}

/// Allocates and resolves terminal, nonterminal and temporary token ids.
///
/// Name-to-id is a partial function (`get` returns `None` for unknown
/// names); id-to-name is total over allocated ids. The `next_available_*`
/// counters only ever grow.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: BTreeMap<String, ParseToken>,
    names: BTreeMap<ParseToken, String>,
    next_terminal: u32,
    next_nonterminal: u32,
    next_temporary: u32,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ParseToken> {
        self.tokens.get(name).copied()
    }

    pub fn token_name(&self, token: ParseToken) -> Option<&str> {
        self.names.get(&token).map(|s| s.as_str())
    }

    pub fn generate_terminal(&mut self, name: &str) -> Result<ParseToken, TokenError> {
        if self.tokens.contains_key(name) {
            return Err(TokenError::DuplicateName(name.to_string()));
        }
        let token = ParseToken::terminal(self.next_terminal);
        self.next_terminal += 1;
        self.bind(name, token);
        Ok(token)
    }

    pub fn generate_nonterminal(&mut self, name: &str) -> Result<ParseToken, TokenError> {
        if self.tokens.contains_key(name) {
            return Err(TokenError::DuplicateName(name.to_string()));
        }
        let token = ParseToken::nonterminal(self.next_nonterminal);
        self.next_nonterminal += 1;
        self.bind(name, token);
        Ok(token)
    }

    /// Returns the existing binding for `name`, or binds it to a fresh
    /// temporary nonterminal. Idempotent.
    pub fn find_or_generate_temporary_nonterminal(&mut self, name: &str) -> ParseToken {
        if let Some(token) = self.get(name) {
            return token;
        }
        let token = ParseToken::from_raw(ParseToken::TEMPORARY_FIRST + self.next_temporary);
        self.next_temporary += 1;
        self.bind(name, token);
        token
    }

    /// Rebinds a forward-declared name to a fresh permanent nonterminal id.
    ///
    /// The caller owns rewriting prior uses of the temporary id (see
    /// `GrammarBuilder::replace_all_tokens`); the registry forgets it.
    pub fn resolve_temporary(&mut self, name: &str) -> Result<ParseToken, TokenError> {
        match self.get(name) {
            Some(old) if old.is_temporary() => {
                self.tokens.remove(name);
                self.names.remove(&old);
                let token = ParseToken::nonterminal(self.next_nonterminal);
                self.next_nonterminal += 1;
                self.bind(name, token);
                Ok(token)
            }
            _ => Err(TokenError::NotTemporary(name.to_string())),
        }
    }

    pub fn next_available_terminal(&self) -> u32 {
        self.next_terminal
    }

    pub fn next_available_nonterminal(&self) -> u32 {
        self.next_nonterminal
    }

    /// All currently bound tokens, in id order.
    pub fn tokens(&self) -> impl Iterator<Item = (ParseToken, &str)> {
        self.names.iter().map(|(t, n)| (*t, n.as_str()))
    }

    fn bind(&mut self, name: &str, token: ParseToken) {
        self.tokens.insert(name.to_string(), token);
        self.names.insert(token, name.to_string());
    }
}
