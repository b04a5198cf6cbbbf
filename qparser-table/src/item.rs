use std::fmt::{self, Display};

use qparser_grammar::{Grammar, ParseToken};

/// A production rule with a marked input position (the dot), plus the
/// child rule the dot currently expects.
///
/// `input_position_rule` is `None` while the dot's nonterminal has not
/// been resolved to a specific alternative; expansion duplicates the item
/// once per alternative. Two items are equal iff all four fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Item {
    pub head: ParseToken,
    pub rule_index: usize,
    pub input_position: usize,
    pub input_position_rule: Option<usize>,
}

impl Item {
    pub fn new(head: ParseToken, rule_index: usize) -> Self {
        Item {
            head,
            rule_index,
            input_position: 0,
            input_position_rule: None,
        }
    }

    pub fn is_complete(&self, grammar: &Grammar) -> bool {
        self.input_position >= grammar.rule(self.rule_index).len()
    }

    /// The token at the input position, or `None` when complete.
    pub fn input_token(&self, grammar: &Grammar) -> Option<ParseToken> {
        grammar
            .rule(self.rule_index)
            .tokens()
            .get(self.input_position)
            .copied()
    }

    pub fn display<'a>(&'a self, grammar: &'a Grammar) -> ItemDisplay<'a> {
        ItemDisplay {
            item: self,
            grammar,
        }
    }
}

pub struct ItemDisplay<'a> {
    item: &'a Item,
    grammar: &'a Grammar,
}

impl<'a> Display for ItemDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.grammar.rule(self.item.rule_index).tokens();
        write!(f, "{} ->", self.grammar.symbol_name(self.item.head))?;
        for (index, token) in tokens.iter().enumerate() {
            if index == self.item.input_position {
                write!(f, " .")?;
            }
            write!(f, " {}", self.grammar.symbol_name(*token))?;
        }
        if self.item.input_position >= tokens.len() {
            write!(f, " .")?;
        }
        if let Some(rule) = self.item.input_position_rule {
            write!(f, " [expects rule {}]", rule)?;
        }
        Ok(())
    }
}
