mod builder;
mod grammar;
mod token;

pub use builder::{GrammarBuilder, GrammarError};
pub use grammar::{Grammar, ProductionRule, ProductionSet, RuleDisplay};
pub use token::{ParseToken, TokenError, TokenRegistry};

#[cfg(test)]
mod tests;
