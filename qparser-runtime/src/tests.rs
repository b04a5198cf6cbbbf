use qparser_grammar::{Grammar, GrammarBuilder, ParseToken};
use qparser_table::{ActionTableBuilder, LdConstructor, ParseTable};

use crate::{
    AstBuilder, LdRecognizer, LexStream, ParseOutput, RecognitionError, SyntaxTreeBuilder,
};

fn x() -> ParseToken {
    ParseToken::terminal(0)
}
fn y() -> ParseToken {
    ParseToken::terminal(1)
}
fn z() -> ParseToken {
    ParseToken::terminal(2)
}
fn w() -> ParseToken {
    ParseToken::terminal(3)
}

fn rules_of(output: &ParseOutput) -> Vec<u32> {
    output.rules.iter().map(|t| t.raw()).collect()
}

/// The reference left-recursive grammar:
///   A -> x       B -> x       C -> y
///   D -> A C     D -> D A C
///   E -> B C     E -> E B C
///   S -> D z     S -> E w
/// with rule ids A=0, B=1, C=2, D(AC)=3, D(DAC)=4, E(BC)=5, E(EBC)=6,
/// S(Dz)=7, S(Ew)=8.
fn reference_grammar() -> Grammar {
    let mut builder = GrammarBuilder::new();
    for name in ["x", "y", "z", "w"] {
        builder.terminal(name).unwrap();
    }
    for (head, body) in [
        ("A", vec!["x"]),
        ("B", vec!["x"]),
        ("C", vec!["y"]),
        ("D", vec!["A", "C"]),
        ("D", vec!["D", "A", "C"]),
        ("E", vec!["B", "C"]),
        ("E", vec!["E", "B", "C"]),
        ("S", vec!["D", "z"]),
        ("S", vec!["E", "w"]),
    ] {
        builder.begin_production(head).unwrap();
        for symbol in body {
            builder.production_token_named(symbol).unwrap();
        }
        builder.end_production().unwrap();
    }
    builder.build().unwrap()
}

fn reference_table() -> ParseTable {
    let grammar = reference_grammar();
    let mut diagnostics = Vec::new();
    LdConstructor::new(&grammar)
        .construct(&mut diagnostics)
        .unwrap()
}

/// The action table for the reference grammar as hand-assembled in the
/// LD draft, independent of the constructor. Row layout:
///   row0: s(x) r(i) s(y) r(2) r(i) p{x>1, z>2, w>3} g{3>5} rp(3) rp(0) r(7) acc
///   row1: r(i) s(y) r(2) r(i) p{x>1, z>2, w>3} g{3>4} rp(4) rp(0) ret
///   row2: ret
///   row3: ret
///   row4: rp(6) rp(1) ret
///   row5: rp(5) rp(1) r(8) acc
fn hand_assembled_table() -> ParseTable {
    let mut builder = ActionTableBuilder::new();
    let row0 = builder.add_action_row();
    let row1 = builder.add_action_row();
    let row2 = builder.add_action_row();
    let row3 = builder.add_action_row();
    let row4 = builder.add_action_row();
    let row5 = builder.add_action_row();

    builder.add_action_shift(row0, x());
    builder.add_action_reduce(row0, ParseToken::SPECIAL_IGNORE);
    builder.add_action_shift(row0, y());
    builder.add_action_reduce(row0, ParseToken::rule(2));
    builder.add_action_reduce(row0, ParseToken::SPECIAL_IGNORE);
    builder.add_action_pivot(row0, vec![(x(), row1), (z(), row2), (w(), row3)]);
    builder.add_action_goto(row0, row3, row5);
    builder.add_action_reduce_prev(row0, ParseToken::rule(3));
    builder.add_action_reduce_prev(row0, ParseToken::rule(0));
    builder.add_action_reduce(row0, ParseToken::rule(7));
    builder.add_action_accept(row0);

    builder.add_action_reduce(row1, ParseToken::SPECIAL_IGNORE);
    builder.add_action_shift(row1, y());
    builder.add_action_reduce(row1, ParseToken::rule(2));
    builder.add_action_reduce(row1, ParseToken::SPECIAL_IGNORE);
    builder.add_action_pivot(row1, vec![(x(), row1), (z(), row2), (w(), row3)]);
    builder.add_action_goto(row1, row3, row4);
    builder.add_action_reduce_prev(row1, ParseToken::rule(4));
    builder.add_action_reduce_prev(row1, ParseToken::rule(0));
    builder.add_action_return(row1);

    builder.add_action_return(row2);
    builder.add_action_return(row3);

    builder.add_action_reduce_prev(row4, ParseToken::rule(6));
    builder.add_action_reduce_prev(row4, ParseToken::rule(1));
    builder.add_action_return(row4);

    builder.add_action_reduce_prev(row5, ParseToken::rule(5));
    builder.add_action_reduce_prev(row5, ParseToken::rule(1));
    builder.add_action_reduce(row5, ParseToken::rule(8));
    builder.add_action_accept(row5);

    builder.build()
}

fn recognize(table: ParseTable, stream: &[ParseToken]) -> Result<ParseOutput, RecognitionError> {
    LdRecognizer::new(table).recognize(LexStream::from_tokens(stream))
}

#[test]
fn hand_assembled_table_recognizes_reference_streams() {
    let streams: [(&[ParseToken], &[u32]); 3] = [
        (&[x(), y(), x(), y(), x(), y(), z()], &[0, 2, 3, 0, 2, 4, 0, 2, 4, 7]),
        (&[x(), y(), x(), y(), x(), y(), w()], &[1, 2, 5, 1, 2, 6, 1, 2, 6, 8]),
        (&[x(), y(), z()], &[0, 2, 3, 7]),
    ];
    for (stream, expected) in streams {
        let output = recognize(hand_assembled_table(), stream).unwrap();
        assert_eq!(rules_of(&output), expected);
    }
}

#[test]
fn constructed_table_recognizes_reference_streams() {
    let streams: [(&[ParseToken], &[u32]); 3] = [
        (&[x(), y(), x(), y(), x(), y(), z()], &[0, 2, 3, 0, 2, 4, 0, 2, 4, 7]),
        (&[x(), y(), x(), y(), x(), y(), w()], &[1, 2, 5, 1, 2, 6, 1, 2, 6, 8]),
        (&[x(), y(), z()], &[0, 2, 3, 7]),
    ];
    for (stream, expected) in streams {
        let output = recognize(reference_table(), stream).unwrap();
        assert_eq!(rules_of(&output), expected);
    }
}

#[test]
fn deep_left_recursion_keeps_resolving() {
    // ten D extensions before the closing z
    let mut stream = Vec::new();
    for _ in 0..11 {
        stream.push(x());
        stream.push(y());
    }
    stream.push(z());
    let output = recognize(reference_table(), &stream).unwrap();
    let mut expected = vec![0, 2, 3];
    for _ in 0..10 {
        expected.extend_from_slice(&[0, 2, 4]);
    }
    expected.push(7);
    assert_eq!(rules_of(&output), expected);
}

#[test]
fn missing_tail_reports_pivot_terminals() {
    let err = recognize(reference_table(), &[x(), y(), x(), y(), x(), y()]).unwrap_err();
    assert_eq!(
        err,
        RecognitionError::UnexpectedToken {
            found: ParseToken::SPECIAL_EOF,
            expected: vec![x(), z(), w()],
            lex_index: 6,
        }
    );
}

#[test]
fn wrong_terminal_at_shift_reports_expectation() {
    let err = recognize(reference_table(), &[x(), z()]).unwrap_err();
    assert_eq!(
        err,
        RecognitionError::UnexpectedToken {
            found: z(),
            expected: vec![y()],
            lex_index: 1,
        }
    );
}

#[test]
fn doubled_inner_terminal_fails_at_the_pivot() {
    let err = recognize(reference_table(), &[x(), y(), y(), z()]).unwrap_err();
    assert_eq!(
        err,
        RecognitionError::UnexpectedToken {
            found: y(),
            expected: vec![x(), z(), w()],
            lex_index: 2,
        }
    );
}

#[test]
fn empty_input_fails_unless_root_is_nullable() {
    let err = recognize(reference_table(), &[]).unwrap_err();
    assert_eq!(
        err,
        RecognitionError::UnexpectedToken {
            found: ParseToken::SPECIAL_EOF,
            expected: vec![x()],
            lex_index: 0,
        }
    );

    let mut builder = GrammarBuilder::new();
    builder.terminal("x").unwrap();
    builder.begin_production("S").unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();
    let mut diagnostics = Vec::new();
    let table = LdConstructor::new(&grammar)
        .construct(&mut diagnostics)
        .unwrap();
    let output = recognize(table, &[]).unwrap();
    assert_eq!(rules_of(&output), vec![0]);
}

#[test]
fn empty_table_is_rejected() {
    let table = ActionTableBuilder::new().build();
    let err = LdRecognizer::new(table)
        .recognize(LexStream::from_tokens(&[x()]))
        .unwrap_err();
    assert_eq!(err, RecognitionError::EmptyTable);
}

#[test]
fn trailing_input_is_reported_at_accept() {
    let mut builder = GrammarBuilder::new();
    builder.terminal("x").unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token_named("x").unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();
    let mut diagnostics = Vec::new();
    let table = LdConstructor::new(&grammar)
        .construct(&mut diagnostics)
        .unwrap();
    let err = recognize(table, &[x(), x()]).unwrap_err();
    assert_eq!(err, RecognitionError::TrailingInput { lex_index: 1 });
}

#[test]
fn ast_round_trip_preserves_leaf_terminals() {
    let grammar = reference_grammar();
    let stream = [x(), y(), x(), y(), x(), y(), z()];
    let output = recognize(reference_table(), &stream).unwrap();
    let tree = SyntaxTreeBuilder::new().build(&grammar, &output).unwrap();

    assert_eq!(tree.symbol(), grammar.root_nonterminal());
    let mut leaves = Vec::new();
    tree.collect_leaves(&mut leaves);
    let leaf_tokens: Vec<ParseToken> = leaves.iter().map(|m| m.token).collect();
    assert_eq!(leaf_tokens.as_slice(), stream.as_slice());
}

#[test]
fn ast_folds_nested_left_recursion() {
    let grammar = reference_grammar();
    let output = recognize(reference_table(), &[x(), y(), x(), y(), z()]).unwrap();
    let tree = SyntaxTreeBuilder::new().build(&grammar, &output).unwrap();

    // S(Dz) whose D is D(DAC) wrapping the base D(AC)
    let crate::SyntaxNode::Production {
        rule_index: 7,
        children,
        ..
    } = &tree
    else {
        panic!("expected S -> D z at the root, got {:?}", tree);
    };
    assert_eq!(children.len(), 2);
    let crate::SyntaxNode::Production {
        rule_index: 4,
        children: d_children,
        ..
    } = &children[0]
    else {
        panic!("expected D -> D A C, got {:?}", children[0]);
    };
    assert_eq!(d_children.len(), 3);
    assert!(matches!(
        &d_children[0],
        crate::SyntaxNode::Production { rule_index: 3, .. }
    ));
}

#[test]
fn silent_terminals_are_skipped_and_elided() {
    let mut builder = GrammarBuilder::new();
    builder.terminal("x").unwrap();
    let sep = builder.terminal("sep").unwrap();
    builder.mark_silent_terminal(sep);
    builder.begin_production("A").unwrap();
    builder.production_token_named("x").unwrap();
    builder.end_production().unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token_named("A").unwrap();
    builder.production_token_named("A").unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();

    let mut diagnostics = Vec::new();
    let table = LdConstructor::new(&grammar)
        .construct(&mut diagnostics)
        .unwrap();
    let stream = LexStream::from_tokens(&[x(), sep, x()]);
    let output = LdRecognizer::new(table)
        .with_silent_terminals(&grammar)
        .recognize(stream)
        .unwrap();
    assert_eq!(rules_of(&output), vec![0, 0, 1]);

    let tree = SyntaxTreeBuilder::new().build(&grammar, &output).unwrap();
    let mut leaves = Vec::new();
    tree.collect_leaves(&mut leaves);
    let leaf_tokens: Vec<ParseToken> = leaves.iter().map(|m| m.token).collect();
    assert_eq!(leaf_tokens, vec![x(), x()]);
}

#[test]
fn unit_rules_stay_in_the_reduction_stream() {
    // S -> A (a silent unit rule); A -> x
    let mut builder = GrammarBuilder::new();
    builder.terminal("x").unwrap();
    builder.begin_production("A").unwrap();
    builder.production_token_named("x").unwrap();
    builder.end_production().unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token_named("A").unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();
    assert!(grammar.is_silent_rule(1));

    let mut diagnostics = Vec::new();
    let table = LdConstructor::new(&grammar)
        .construct(&mut diagnostics)
        .unwrap();
    let output = recognize(table, &[x()]).unwrap();
    // the unit reduction is emitted; eliding it is the tree builder's call
    assert_eq!(rules_of(&output), vec![0, 1]);
}
