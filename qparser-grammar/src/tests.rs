use crate::{GrammarBuilder, GrammarError, ParseToken, TokenError, TokenRegistry};

#[test]
fn registry_partitions_token_space() {
    let mut registry = TokenRegistry::new();
    let x = registry.generate_terminal("x").unwrap();
    let expr = registry.generate_nonterminal("expr").unwrap();
    let fwd = registry.find_or_generate_temporary_nonterminal("stmt");

    assert!(x.is_terminal());
    assert!(!x.is_temporary());
    assert!(!expr.is_terminal());
    assert!(!expr.is_temporary());
    assert!(fwd.is_temporary());
    assert!(x.is_valid() && expr.is_valid() && fwd.is_valid());
    assert!(!ParseToken::SPECIAL_EOF.is_terminal());
    assert!(!ParseToken::SPECIAL_IGNORE.is_valid());

    assert_eq!(registry.get("x"), Some(x));
    assert_eq!(registry.get("unknown"), None);
    assert_eq!(registry.token_name(expr), Some("expr"));
}

#[test]
fn registry_rejects_duplicate_names() {
    let mut registry = TokenRegistry::new();
    registry.generate_terminal("x").unwrap();
    assert_eq!(
        registry.generate_terminal("x"),
        Err(TokenError::DuplicateName("x".to_string()))
    );
    assert_eq!(
        registry.generate_nonterminal("x"),
        Err(TokenError::DuplicateName("x".to_string()))
    );
}

#[test]
fn registry_counters_are_monotone() {
    let mut registry = TokenRegistry::new();
    registry.generate_terminal("a").unwrap();
    registry.generate_terminal("b").unwrap();
    assert_eq!(registry.next_available_terminal(), 2);
    registry.generate_nonterminal("n").unwrap();
    registry.find_or_generate_temporary_nonterminal("fwd");
    registry.resolve_temporary("fwd").unwrap();
    assert_eq!(registry.next_available_nonterminal(), 2);
}

#[test]
fn temporary_resolution_is_recorded() {
    let mut registry = TokenRegistry::new();
    let fwd = registry.find_or_generate_temporary_nonterminal("stmt");
    assert_eq!(registry.find_or_generate_temporary_nonterminal("stmt"), fwd);
    let resolved = registry.resolve_temporary("stmt").unwrap();
    assert!(!resolved.is_temporary());
    assert_eq!(registry.get("stmt"), Some(resolved));
    assert_eq!(registry.token_name(fwd), None);
    assert_eq!(
        registry.resolve_temporary("stmt"),
        Err(TokenError::NotTemporary("stmt".to_string()))
    );
}

#[test]
fn forward_references_are_rewritten_on_resolution() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();

    builder.begin_production("S").unwrap();
    let fwd = builder.production_token_named("A").unwrap();
    assert!(fwd.is_temporary());
    builder.end_production().unwrap();

    let a = builder.begin_production("A").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    assert!(!a.is_temporary());

    builder.start_symbol(ParseToken::nonterminal(0)).unwrap();
    let grammar = builder.build().unwrap();
    assert_eq!(grammar.rule_token(0, 0), a);
}

#[test]
fn unresolved_forward_declaration_is_fatal() {
    let mut builder = GrammarBuilder::new();
    builder.terminal("x").unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token_named("missing").unwrap();
    builder.end_production().unwrap();
    assert!(!builder.check_forward_declarations());
    assert_eq!(
        builder.build().unwrap_err(),
        GrammarError::UnresolvedForwardDeclarations(vec!["missing".to_string()])
    );
}

#[test]
fn empty_grammar_is_fatal() {
    assert_eq!(
        GrammarBuilder::new().build().unwrap_err(),
        GrammarError::EmptyGrammar
    );
}

#[test]
fn builder_protocol_must_be_well_nested() {
    let mut builder = GrammarBuilder::new();
    assert_eq!(
        builder.end_production(),
        Err(GrammarError::UnbalancedProduction)
    );
    builder.begin_production("S").unwrap();
    assert_eq!(
        builder.begin_production("S"),
        Err(GrammarError::UnbalancedProduction)
    );
}

#[test]
fn alternatives_must_be_contiguous() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();
    builder.begin_production("A").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    builder.begin_production("B").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    assert_eq!(
        builder.begin_production("A"),
        Err(GrammarError::NonContiguousAlternatives("A".to_string()))
    );
}

#[test]
fn contradictory_precedence_is_fatal() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();
    let y = builder.terminal("y").unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    builder.precedence(x, y);
    builder.precedence(y, x);
    assert_eq!(
        builder.build().unwrap_err(),
        GrammarError::ContradictoryPrecedence(x, y)
    );
}

#[test]
fn root_defaults_to_last_declared_nonterminal() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();
    builder.begin_production("A").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    let s = builder.begin_production("S").unwrap();
    builder.production_token_named("A").unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();
    assert_eq!(grammar.root_nonterminal(), s);
}

#[test]
fn silent_rules_are_unit_productions() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();
    builder.begin_production("A").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    builder.begin_production("S").unwrap();
    builder.production_token_named("A").unwrap();
    builder.end_production().unwrap();
    builder.mark_silent_terminal(x);
    let grammar = builder.build().unwrap();

    assert!(!grammar.is_silent_rule(0));
    assert!(grammar.is_silent_rule(1));
    assert!(grammar.is_silent_terminal(x));
}

#[test]
fn nullability_fix_point_handles_chained_derivations() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();

    // A -> <empty>; B -> A A; C -> B x
    let a = builder.begin_production("A").unwrap();
    builder.end_production().unwrap();
    let b = builder.begin_production("B").unwrap();
    builder.production_token_named("A").unwrap();
    builder.production_token_named("A").unwrap();
    builder.end_production().unwrap();
    let c = builder.begin_production("C").unwrap();
    builder.production_token_named("B").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();

    let grammar = builder.build().unwrap();
    assert!(grammar.is_nullable(a));
    assert!(grammar.is_nullable(b));
    assert!(!grammar.is_nullable(c));
}

#[test]
fn grammar_display_names_rules() {
    let mut builder = GrammarBuilder::new();
    let x = builder.terminal("x").unwrap();
    builder.begin_production("A").unwrap();
    builder.production_token(x).unwrap();
    builder.end_production().unwrap();
    let grammar = builder.build().unwrap();
    assert_eq!(format!("{}", grammar.display_rule(0)), "A(0) -> x(t0)");
}
