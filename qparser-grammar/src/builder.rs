use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{self, Display};

use crate::grammar::{compute_nullability, Grammar, ProductionRule, ProductionSet};
use crate::token::{ParseToken, TokenError, TokenRegistry};

#[derive(Debug, PartialEq)]
pub enum GrammarError {
    /// A production head or start symbol names a terminal.
    TerminalLeftHandSide(String),
    /// `begin_production` while a rule is open, or `end_production` /
    /// `production_token` with none open.
    UnbalancedProduction,
    /// A nonterminal's alternatives must be declared adjacently; its rule
    /// slice is no longer at the tail of the rule array.
    NonContiguousAlternatives(String),
    /// `build` found no rules at all.
    EmptyGrammar,
    /// Forward-declared names that never received a production.
    UnresolvedForwardDeclarations(Vec<String>),
    /// Precedence was directed both ways for the same token pair.
    ContradictoryPrecedence(ParseToken, ParseToken),
    /// A precedence directive names an unknown token.
    UnknownPrecedenceToken(String),
    Token(TokenError),
}

impl Error for GrammarError {}

impl Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::TerminalLeftHandSide(name) => {
                write!(f, "terminal '{}' cannot head a production", name)
            }
            GrammarError::UnbalancedProduction => {
                write!(f, "begin/end production calls are not well nested")
            }
            GrammarError::NonContiguousAlternatives(name) => {
                write!(f, "alternatives of '{}' must be declared adjacently", name)
            }
            GrammarError::EmptyGrammar => write!(f, "grammar has no productions"),
            GrammarError::UnresolvedForwardDeclarations(names) => {
                write!(f, "undeclared nonterminals: {}", names.join(", "))
            }
            GrammarError::ContradictoryPrecedence(a, b) => {
                write!(f, "precedence between {} and {} is directed both ways", a, b)
            }
            GrammarError::UnknownPrecedenceToken(name) => {
                write!(f, "precedence directive names unknown token '{}'", name)
            }
            GrammarError::Token(err) => write!(f, "{}", err),
        }
    }
}

impl From<TokenError> for GrammarError {
    fn from(err: TokenError) -> Self {
        GrammarError::Token(err)
    }
}

/// Accumulates productions, precedence directives and the start symbol,
/// then freezes them into a [`Grammar`].
///
/// Productions are declared through well-nested `begin_production` /
/// `end_production` pairs; symbols referenced by name before their own
/// production exist as temporary tokens until resolved.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    registry: TokenRegistry,
    rules: Vec<(ProductionRule, ParseToken)>,
    production_sets: BTreeMap<ParseToken, ProductionSet>,
    active_rule: Option<usize>,
    active_tokens: Vec<ParseToken>,
    precedence: BTreeMap<ParseToken, BTreeSet<ParseToken>>,
    silent_terminals: BTreeSet<ParseToken>,
    root_nonterminal: Option<ParseToken>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Registers a lexical terminal. Terminals must be registered before a
    /// production refers to them by name, otherwise the name is taken for
    /// a forward-declared nonterminal.
    pub fn terminal(&mut self, name: &str) -> Result<ParseToken, GrammarError> {
        Ok(self.registry.generate_terminal(name)?)
    }

    /// Opens a rule for `name`, creating or resolving the head nonterminal.
    /// Repeated `begin`/`end` pairs for the same name accumulate
    /// alternatives into the same production set.
    pub fn begin_production(&mut self, name: &str) -> Result<ParseToken, GrammarError> {
        if self.active_rule.is_some() {
            return Err(GrammarError::UnbalancedProduction);
        }
        let head = self.construct_nonterminal(name)?;
        match self.production_sets.get_mut(&head) {
            Some(set) => {
                if set.rules_offset + set.rules_length != self.rules.len() {
                    return Err(GrammarError::NonContiguousAlternatives(name.to_string()));
                }
                set.rules_length += 1;
            }
            None => {
                self.production_sets.insert(
                    head,
                    ProductionSet {
                        rules_offset: self.rules.len(),
                        rules_length: 1,
                        nullable: false,
                        visited_count: 0,
                    },
                );
            }
        }
        self.rules.push((ProductionRule::default(), head));
        self.active_rule = Some(self.rules.len() - 1);
        Ok(head)
    }

    /// Freezes the open rule's token sequence and closes the scope.
    pub fn end_production(&mut self) -> Result<(), GrammarError> {
        let rule_index = self
            .active_rule
            .take()
            .ok_or(GrammarError::UnbalancedProduction)?;
        self.rules[rule_index].0.tokens = std::mem::take(&mut self.active_tokens);
        Ok(())
    }

    /// Appends a symbol to the open rule.
    pub fn production_token(&mut self, token: ParseToken) -> Result<(), GrammarError> {
        if self.active_rule.is_none() {
            return Err(GrammarError::UnbalancedProduction);
        }
        self.active_tokens.push(token);
        Ok(())
    }

    /// Appends a symbol by name; an unknown name becomes a forward-declared
    /// nonterminal.
    pub fn production_token_named(&mut self, name: &str) -> Result<ParseToken, GrammarError> {
        let token = match self.registry.get(name) {
            Some(token) => token,
            None => self.declare_production(name),
        };
        self.production_token(token)?;
        Ok(token)
    }

    /// Explicit forward declaration: binds `name` to a temporary
    /// nonterminal until a production for it is begun.
    pub fn declare_production(&mut self, name: &str) -> ParseToken {
        self.registry.find_or_generate_temporary_nonterminal(name)
    }

    /// Records that `second` has precedence over `first` when the two
    /// compete.
    pub fn precedence(&mut self, first: ParseToken, second: ParseToken) {
        self.precedence.entry(first).or_default().insert(second);
    }

    pub fn precedence_named(&mut self, first: &str, second: &str) -> Result<(), GrammarError> {
        let first = self
            .registry
            .get(first)
            .ok_or_else(|| GrammarError::UnknownPrecedenceToken(first.to_string()))?;
        let second = self
            .registry
            .get(second)
            .ok_or_else(|| GrammarError::UnknownPrecedenceToken(second.to_string()))?;
        self.precedence(first, second);
        Ok(())
    }

    pub fn start_symbol(&mut self, nonterminal: ParseToken) -> Result<(), GrammarError> {
        if nonterminal.is_terminal() {
            let name = self
                .registry
                .token_name(nonterminal)
                .unwrap_or("<unnamed>")
                .to_string();
            return Err(GrammarError::TerminalLeftHandSide(name));
        }
        self.root_nonterminal = Some(nonterminal);
        Ok(())
    }

    /// Terminals in this set are dropped when folding parse trees.
    pub fn mark_silent_terminal(&mut self, terminal: ParseToken) {
        self.silent_terminals.insert(terminal);
    }

    /// True iff every nonterminal known to the registry (including
    /// forward declarations) has at least one alternative.
    pub fn check_forward_declarations(&self) -> bool {
        self.registry
            .tokens()
            .filter(|(token, _)| !token.is_terminal())
            .all(|(token, _)| {
                self.production_sets
                    .get(&token)
                    .map(|set| set.rules_length > 0)
                    .unwrap_or(false)
            })
    }

    /// Validates the accumulated grammar and freezes it. The start symbol
    /// defaults to the last-declared nonterminal when none was set.
    pub fn build(mut self) -> Result<Grammar, GrammarError> {
        if self.active_rule.is_some() {
            return Err(GrammarError::UnbalancedProduction);
        }
        if self.rules.is_empty() {
            return Err(GrammarError::EmptyGrammar);
        }
        if !self.check_forward_declarations() {
            let unresolved: Vec<String> = self
                .registry
                .tokens()
                .filter(|(token, _)| !token.is_terminal())
                .filter(|(token, _)| !self.production_sets.contains_key(token))
                .map(|(_, name)| name.to_string())
                .collect();
            return Err(GrammarError::UnresolvedForwardDeclarations(unresolved));
        }
        for (first, seconds) in &self.precedence {
            for second in seconds {
                let reversed = self
                    .precedence
                    .get(second)
                    .map(|s| s.contains(first))
                    .unwrap_or(false);
                if reversed {
                    return Err(GrammarError::ContradictoryPrecedence(*first, *second));
                }
            }
        }
        let root_nonterminal = match self.root_nonterminal {
            Some(root) => root,
            None => ParseToken::nonterminal(self.registry.next_available_nonterminal() - 1),
        };
        compute_nullability(&self.rules, &mut self.production_sets);
        Ok(Grammar {
            registry: self.registry,
            rules: self.rules,
            production_sets: self.production_sets,
            precedence: self.precedence,
            silent_terminals: self.silent_terminals,
            root_nonterminal,
        })
    }

    /// Looks up or creates the permanent nonterminal for a production head.
    /// A temporary binding is resolved here, rewriting its prior uses.
    fn construct_nonterminal(&mut self, name: &str) -> Result<ParseToken, GrammarError> {
        match self.registry.get(name) {
            Some(token) if token.is_temporary() => {
                let resolved = self.registry.resolve_temporary(name)?;
                self.replace_all_tokens(token, resolved);
                Ok(resolved)
            }
            Some(token) if token.is_terminal() => {
                Err(GrammarError::TerminalLeftHandSide(name.to_string()))
            }
            Some(token) => Ok(token),
            None => Ok(self.registry.generate_nonterminal(name)?),
        }
    }

    /// Rewrites every recorded use of `old` (finished rules, the open rule
    /// and the start symbol) to `new`.
    fn replace_all_tokens(&mut self, old: ParseToken, new: ParseToken) {
        for (rule, _) in &mut self.rules {
            for token in &mut rule.tokens {
                if *token == old {
                    *token = new;
                }
            }
        }
        for token in &mut self.active_tokens {
            if *token == old {
                *token = new;
            }
        }
        if self.root_nonterminal == Some(old) {
            self.root_nonterminal = Some(new);
        }
    }
}
