use std::error::Error;
use std::fmt::{self, Display};

use qparser_grammar::{Grammar, ParseToken};

use crate::{ParseMatch, ParseOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstError {
    /// An IGNORE placeholder survived recognition unpatched.
    UnresolvedDelay { position: usize },
    /// A rule id in the stream does not exist in the grammar.
    UnknownRule { token: ParseToken },
    /// A reduction's right-hand side cannot be matched against the built
    /// nodes and the pending lexemes.
    SymbolMismatch { rule_index: usize },
    /// The lexical stream ran out while a rule still expected symbols.
    ExhaustedStream { rule_index: usize },
}

impl Error for AstError {}

impl Display for AstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstError::UnresolvedDelay { position } => {
                write!(f, "unresolved delayed reduction at output position {}", position)
            }
            AstError::UnknownRule { token } => write!(f, "unknown rule id {}", token),
            AstError::SymbolMismatch { rule_index } => {
                write!(f, "rule {} does not match the parsed symbols", rule_index)
            }
            AstError::ExhaustedStream { rule_index } => {
                write!(f, "input ended while folding rule {}", rule_index)
            }
        }
    }
}

/// A folded parse tree node: a terminal leaf with its source span, or a
/// production with its reduced children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxNode {
    Terminal(ParseMatch),
    Production {
        rule_index: usize,
        head: ParseToken,
        children: Vec<SyntaxNode>,
    },
}

impl SyntaxNode {
    /// The grammar symbol this node stands for.
    pub fn symbol(&self) -> ParseToken {
        match self {
            SyntaxNode::Terminal(m) => m.token,
            SyntaxNode::Production { head, .. } => *head,
        }
    }

    /// Leaf terminals in left-to-right order.
    pub fn collect_leaves(&self, leaves: &mut Vec<ParseMatch>) {
        match self {
            SyntaxNode::Terminal(m) => leaves.push(*m),
            SyntaxNode::Production { children, .. } => {
                for child in children {
                    child.collect_leaves(leaves);
                }
            }
        }
    }
}

/// The boundary to the AST stage: anything that folds a recognition
/// output into a host-defined structure.
pub trait AstBuilder {
    type Output;

    fn build(&mut self, grammar: &Grammar, output: &ParseOutput) -> Result<Self::Output, AstError>;
}

/// Reference tree folder.
///
/// The reduction sequence is leftmost bottom-up, so each rule's children
/// are the most recently finished nodes; lexemes are pulled in lazily
/// until the rule's right-hand side matches the node stack's tail.
/// Silent terminals are dropped on the way in.
#[derive(Debug, Default)]
pub struct SyntaxTreeBuilder;

impl SyntaxTreeBuilder {
    pub fn new() -> Self {
        SyntaxTreeBuilder
    }
}

impl AstBuilder for SyntaxTreeBuilder {
    type Output = SyntaxNode;

    fn build(&mut self, grammar: &Grammar, output: &ParseOutput) -> Result<SyntaxNode, AstError> {
        let mut stack: Vec<SyntaxNode> = Vec::new();
        let mut lex_index = 0;
        for (position, rule_token) in output.rules.iter().enumerate() {
            if *rule_token == ParseToken::SPECIAL_IGNORE {
                return Err(AstError::UnresolvedDelay { position });
            }
            let rule_index = rule_token.raw() as usize;
            if rule_index >= grammar.rule_count() {
                return Err(AstError::UnknownRule { token: *rule_token });
            }
            let rhs = grammar.rule(rule_index).tokens();
            while !suffix_matches(&stack, rhs) {
                let lexeme = loop {
                    match output.lex_stream.matches().get(lex_index) {
                        None => return Err(AstError::ExhaustedStream { rule_index }),
                        Some(m) if grammar.is_silent_terminal(m.token) => lex_index += 1,
                        Some(m) => break *m,
                    }
                };
                lex_index += 1;
                stack.push(SyntaxNode::Terminal(lexeme));
            }
            let children = stack.split_off(stack.len() - rhs.len());
            stack.push(SyntaxNode::Production {
                rule_index,
                head: grammar.rule_head(rule_index),
                children,
            });
        }
        if stack.len() == 1 {
            Ok(stack.pop().unwrap())
        } else {
            Err(AstError::SymbolMismatch {
                rule_index: output
                    .rules
                    .last()
                    .map(|t| t.raw() as usize)
                    .unwrap_or(0),
            })
        }
    }
}

fn suffix_matches(stack: &[SyntaxNode], rhs: &[ParseToken]) -> bool {
    if stack.len() < rhs.len() {
        return false;
    }
    stack[stack.len() - rhs.len()..]
        .iter()
        .zip(rhs.iter())
        .all(|(node, symbol)| node.symbol() == *symbol)
}
