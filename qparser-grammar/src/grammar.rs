use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

use crate::token::{ParseToken, TokenRegistry};

/// The right-hand side of a single production, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionRule {
    pub(crate) tokens: Vec<ParseToken>,
}

impl ProductionRule {
    pub fn tokens(&self) -> &[ParseToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// The set of rules producing one nonterminal: a contiguous slice into the
/// grammar's rule array, plus the nullability scratch used by the fix-point
/// pass.
#[derive(Debug, Clone, Default)]
pub struct ProductionSet {
    pub(crate) rules_offset: usize,
    pub(crate) rules_length: usize,
    pub(crate) nullable: bool,
    pub(crate) visited_count: u8,
}

impl ProductionSet {
    pub fn rule_indices(&self) -> std::ops::Range<usize> {
        self.rules_offset..self.rules_offset + self.rules_length
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// How many fix-point passes examined this set before it settled.
    pub fn visited_count(&self) -> u8 {
        self.visited_count
    }
}

/// A frozen grammar: rules, production sets, precedence directives and the
/// start symbol. Produced by `GrammarBuilder::build`; read-only afterwards.
#[derive(Debug)]
pub struct Grammar {
    pub(crate) registry: TokenRegistry,
    pub(crate) rules: Vec<(ProductionRule, ParseToken)>,
    pub(crate) production_sets: BTreeMap<ParseToken, ProductionSet>,
    pub(crate) precedence: BTreeMap<ParseToken, BTreeSet<ParseToken>>,
    pub(crate) silent_terminals: BTreeSet<ParseToken>,
    pub(crate) root_nonterminal: ParseToken,
}

impl Grammar {
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// The index of a rule in this slice is its rule id, stable for the
    /// grammar's lifetime.
    pub fn rules(&self) -> &[(ProductionRule, ParseToken)] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, index: usize) -> &ProductionRule {
        &self.rules[index].0
    }

    pub fn rule_head(&self, index: usize) -> ParseToken {
        self.rules[index].1
    }

    pub fn rule_token(&self, rule_index: usize, token_index: usize) -> ParseToken {
        self.rules[rule_index].0.tokens[token_index]
    }

    pub fn production_set(&self, nonterminal: ParseToken) -> Option<&ProductionSet> {
        self.production_sets.get(&nonterminal)
    }

    pub fn root_nonterminal(&self) -> ParseToken {
        self.root_nonterminal
    }

    pub fn is_nullable(&self, nonterminal: ParseToken) -> bool {
        self.production_sets
            .get(&nonterminal)
            .map(|set| set.nullable)
            .unwrap_or(false)
    }

    /// A rule is silent iff it is a unit production: a single nonterminal
    /// on the right-hand side.
    pub fn is_silent_rule(&self, rule_index: usize) -> bool {
        let rule = &self.rules[rule_index].0;
        rule.tokens.len() == 1 && !rule.tokens[0].is_terminal()
    }

    pub fn is_silent_terminal(&self, token: ParseToken) -> bool {
        token.is_terminal() && self.silent_terminals.contains(&token)
    }

    /// Whether a directive gives `second` precedence over `first`.
    pub fn has_precedence(&self, first: ParseToken, second: ParseToken) -> bool {
        self.precedence
            .get(&first)
            .map(|seconds| seconds.contains(&second))
            .unwrap_or(false)
    }

    pub fn symbol_name(&self, token: ParseToken) -> String {
        match self.registry.token_name(token) {
            Some(name) => format!("{}({})", name, token),
            None => format!("<unknown>({})", token),
        }
    }

    pub fn display_rule(&self, rule_index: usize) -> RuleDisplay<'_> {
        RuleDisplay {
            grammar: self,
            rule_index,
        }
    }
}

pub struct RuleDisplay<'grammar> {
    grammar: &'grammar Grammar,
    rule_index: usize,
}

impl<'grammar> Display for RuleDisplay<'grammar> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rule, head) = &self.grammar.rules[self.rule_index];
        let rhs: Vec<String> = rule
            .tokens
            .iter()
            .map(|t| self.grammar.symbol_name(*t))
            .collect();
        write!(
            f,
            "{} -> {}",
            self.grammar.symbol_name(*head),
            rhs.join(" ")
        )
    }
}

impl Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Grammar (root: {}) {{",
            self.symbol_name(self.root_nonterminal)
        )?;
        for index in 0..self.rules.len() {
            writeln!(f, "\t{}: {}", index, self.display_rule(index))?;
        }
        write!(f, "}}")
    }
}

/// Fix-point nullability: a set is nullable once any of its rules derives
/// the empty string through nullable nonterminals alone. `visited_count`
/// records how many passes examined a set before it settled.
pub(crate) fn compute_nullability(
    rules: &[(ProductionRule, ParseToken)],
    production_sets: &mut BTreeMap<ParseToken, ProductionSet>,
) {
    loop {
        let nullable: BTreeSet<ParseToken> = production_sets
            .iter()
            .filter(|(_, set)| set.nullable)
            .map(|(head, _)| *head)
            .collect();
        let mut changed = false;
        for set in production_sets.values_mut() {
            set.visited_count = set.visited_count.saturating_add(1);
            if set.nullable {
                continue;
            }
            let derives_empty = set.rule_indices().any(|rule_index| {
                rules[rule_index]
                    .0
                    .tokens
                    .iter()
                    .all(|t| !t.is_terminal() && nullable.contains(t))
            });
            if derives_empty {
                set.nullable = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
