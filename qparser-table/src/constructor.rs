use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, Write};

use petgraph::graph::NodeIndex;
use petgraph::prelude::DiGraph;
use petgraph::Direction::Incoming;

use qparser_grammar::{Grammar, ParseToken};

use crate::builder::{ActionTableBuilder, ParseTable, RowId};
use crate::item::Item;

#[derive(Debug)]
pub enum ConstructError {
    /// No root nonterminal or no productions to start from.
    EmptyGrammar,
    /// A rule references a nonterminal with no production set.
    UndeclaredNonterminal(ParseToken),
    /// A state completed more than one rule and no precedence directive
    /// singles one out.
    AmbiguousState { rules: Vec<usize> },
    /// A state has incomplete items but nothing can be stepped over;
    /// the grammar cannot derive a terminal here (e.g. a pure cycle).
    StuckState { rules: Vec<usize> },
    /// A state returned to an earlier item configuration without
    /// reaching a pivot or completing, so its action row would repeat
    /// forever. Recursions that only stop at end of input do this; an
    /// explicit end-marking terminal after the recursion avoids it.
    CyclicState { rules: Vec<usize> },
    /// The diagnostics sink failed.
    Diagnostics(io::Error),
}

impl Error for ConstructError {}

impl Display for ConstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructError::EmptyGrammar => write!(f, "grammar has no productions"),
            ConstructError::UndeclaredNonterminal(token) => {
                write!(f, "nonterminal {} has no productions", token)
            }
            ConstructError::AmbiguousState { rules } => {
                write!(f, "grammar is ambiguous: rules ")?;
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", rule)?;
                }
                write!(f, " complete in the same state")
            }
            ConstructError::StuckState { rules } => {
                write!(f, "no terminal can be reached from rules ")?;
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", rule)?;
                }
                Ok(())
            }
            ConstructError::CyclicState { rules } => {
                write!(f, "recognition of rules ")?;
                for (i, rule) in rules.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", rule)?;
                }
                write!(f, " can only end at end of input; add an end-marking terminal")
            }
            ConstructError::Diagnostics(err) => write!(f, "diagnostics sink: {}", err),
        }
    }
}

impl From<io::Error> for ConstructError {
    fn from(err: io::Error) -> Self {
        ConstructError::Diagnostics(err)
    }
}

/// A construction-time state: its item bag, the action row it owns, the
/// stack of delayed-reduction frames recorded while sweeping complete
/// items, and (for leaves) the single rule the state completes on.
///
/// Pivot edges live in the surrounding graph: an edge `parent -> child`
/// weighted with the pivot terminal.
#[derive(Debug)]
struct LdState {
    items: Vec<Item>,
    row: RowId,
    delayed_reductions: Vec<BTreeMap<usize, usize>>,
    completed_rule: Option<usize>,
    /// The resolution stack left over after the leaf's own frames were
    /// patched; back-propagation into predecessors continues from here.
    leaf_stack: Vec<usize>,
}

impl LdState {
    fn new(items: Vec<Item>, row: RowId) -> Self {
        LdState {
            items,
            row,
            delayed_reductions: Vec::new(),
            completed_rule: None,
            leaf_stack: Vec::new(),
        }
    }
}

/// Compiles a grammar into an LD action table.
///
/// The state graph is expanded depth-first from the root's start items.
/// Forking a state along a pivot copies the relevant item subset into a
/// child state; child states are deduplicated by that seed, which is what
/// folds left recursion into a cycle. Once the graph is complete, every
/// leaf back-propagates its reduction through the incoming-pivot edges,
/// appending the goto rows that patch delayed reductions at parse time.
pub struct LdConstructor<'grammar> {
    grammar: &'grammar Grammar,
    builder: ActionTableBuilder,
    graph: DiGraph<LdState, ParseToken>,
    seeds: BTreeMap<Vec<Item>, NodeIndex>,
    leaves: Vec<NodeIndex>,
    left_recursive: BTreeSet<ParseToken>,
}

impl<'grammar> LdConstructor<'grammar> {
    pub fn new(grammar: &'grammar Grammar) -> Self {
        LdConstructor {
            grammar,
            builder: ActionTableBuilder::new(),
            graph: DiGraph::new(),
            seeds: BTreeMap::new(),
            leaves: Vec::new(),
            left_recursive: left_recursive_nonterminals(grammar),
        }
    }

    /// Compiles the grammar. Non-fatal findings (precedence resolutions)
    /// are reported line by line to `diagnostics`.
    pub fn construct(
        mut self,
        diagnostics: &mut dyn Write,
    ) -> Result<ParseTable, ConstructError> {
        let root = self.grammar.root_nonterminal();
        let start_items = self.start_items(root)?;
        let row = self.builder.add_action_row();
        let mut seed = start_items.clone();
        seed.sort();
        let root_node = self.graph.add_node(LdState::new(start_items, row));
        self.seeds.insert(seed, root_node);

        self.construct_state_graph(root_node, diagnostics)?;
        self.resolve_all_delays();
        Ok(self.builder.build())
    }

    fn root_node() -> NodeIndex {
        NodeIndex::new(0)
    }

    fn start_items(&self, root: ParseToken) -> Result<Vec<Item>, ConstructError> {
        let set = self
            .grammar
            .production_set(root)
            .ok_or(ConstructError::EmptyGrammar)?;
        Ok(set
            .rule_indices()
            .map(|rule_index| Item::new(root, rule_index))
            .collect())
    }

    /// Drives one state to its decision: repeatedly close the item set,
    /// step over the one shiftable terminal, and sweep complete items;
    /// fork into child states once several terminals compete. A pivot is
    /// the last decision of a row.
    fn construct_state_graph(
        &mut self,
        node: NodeIndex,
        diagnostics: &mut dyn Write,
    ) -> Result<(), ConstructError> {
        let mut visited_configurations: BTreeSet<Vec<Item>> = BTreeSet::new();
        loop {
            let mut configuration = self.graph[node].items.clone();
            configuration.sort();
            if !visited_configurations.insert(configuration) {
                let rules = self.graph[node]
                    .items
                    .iter()
                    .map(|item| item.rule_index)
                    .collect();
                return Err(ConstructError::CyclicState { rules });
            }
            self.expand_items(node)?;
            let terminals = self.step_over_terminals(node);
            if terminals.len() == 1 {
                let terminal = *terminals.iter().next().unwrap();
                let row = self.graph[node].row;
                self.builder.add_action_shift(row, terminal);
                if self.complete_items(node, diagnostics)? {
                    return Ok(());
                }
            } else if terminals.len() > 1 {
                let mut branches = Vec::new();
                for terminal in terminals {
                    let subset = self.copy_state_using_pivot(node, terminal);
                    let mut seed = subset.clone();
                    seed.sort();
                    if let Some(&existing) = self.seeds.get(&seed) {
                        self.graph.add_edge(node, existing, terminal);
                        branches.push((terminal, self.graph[existing].row));
                    } else {
                        let row = self.builder.add_action_row();
                        let child = self.graph.add_node(LdState::new(subset, row));
                        self.seeds.insert(seed, child);
                        self.graph.add_edge(node, child, terminal);
                        branches.push((terminal, row));
                        if !self.complete_items(child, diagnostics)? {
                            self.construct_state_graph(child, diagnostics)?;
                        }
                    }
                }
                let row = self.graph[node].row;
                self.builder.add_action_pivot(row, branches);
                return Ok(());
            } else {
                // Nothing shiftable: either every item completes here or
                // the state can make no progress at all.
                if self.complete_items(node, diagnostics)? {
                    return Ok(());
                }
                let rules = self.graph[node]
                    .items
                    .iter()
                    .map(|item| item.rule_index)
                    .collect();
                return Err(ConstructError::StuckState { rules });
            }
        }
    }

    /// Closes the state's item bag under expansion: every nonterminal at
    /// an input position contributes start items for each of its
    /// alternatives, and the originating item is duplicated per
    /// alternative with its `input_position_rule` resolved.
    fn expand_items(&mut self, node: NodeIndex) -> Result<(), ConstructError> {
        let mut begin = 0;
        loop {
            let end = self.graph[node].items.len();
            if end <= begin {
                return Ok(());
            }
            for index in begin..end {
                let item = self.graph[node].items[index];
                if item.input_position_rule.is_some() || item.is_complete(self.grammar) {
                    continue;
                }
                let input_token = self
                    .grammar
                    .rule_token(item.rule_index, item.input_position);
                if input_token.is_terminal() {
                    continue;
                }
                let set = self
                    .grammar
                    .production_set(input_token)
                    .ok_or(ConstructError::UndeclaredNonterminal(input_token))?;
                for rule_index in set.rule_indices() {
                    let state = &mut self.graph[node];
                    if state.items[index].input_position_rule.is_none() {
                        state.items[index].input_position_rule = Some(rule_index);
                    } else {
                        let mut duplicate = state.items[index];
                        duplicate.input_position_rule = Some(rule_index);
                        state.items.push(duplicate);
                    }
                    // The duplicate check ignores the expected rule: a
                    // start item for this alternative may already sit in
                    // the state with its own expectation resolved.
                    let start_item = Item::new(input_token, rule_index);
                    let exists = state.items.iter().any(|existing| {
                        existing.head == start_item.head
                            && existing.rule_index == start_item.rule_index
                            && existing.input_position == start_item.input_position
                    });
                    if !exists {
                        state.items.push(start_item);
                    }
                }
            }
            begin = end;
        }
    }

    /// Collects every terminal sitting at an input position, then steps
    /// the dot over it (resetting the expected rule) in each such item.
    fn step_over_terminals(&mut self, node: NodeIndex) -> BTreeSet<ParseToken> {
        let grammar = self.grammar;
        let mut terminals = BTreeSet::new();
        for item in &mut self.graph[node].items {
            if item.input_position >= grammar.rule(item.rule_index).len() {
                continue;
            }
            let token = grammar.rule_token(item.rule_index, item.input_position);
            if token.is_terminal() {
                terminals.insert(token);
                item.input_position += 1;
                item.input_position_rule = None;
            }
        }
        terminals
    }

    /// Sweeps complete items out of the state. Returns true once every
    /// item is complete (the state is a leaf).
    ///
    /// When only some items complete, the reduction cannot be named yet:
    /// an IGNORE placeholder is reduced instead and a delayed-reduction
    /// frame records, per still-incomplete rule, which completion it was
    /// waiting on. Leaf states get their terminator here (RETURN, or the
    /// final reduce + ACCEPT on the root).
    fn complete_items(
        &mut self,
        node: NodeIndex,
        diagnostics: &mut dyn Write,
    ) -> Result<bool, ConstructError> {
        loop {
            let grammar = self.grammar;
            let mut complete_rules: BTreeSet<usize> = BTreeSet::new();
            let mut all_items_complete = true;
            let mut waiting_shift_actions = false;
            for item in &self.graph[node].items {
                if item.is_complete(grammar) {
                    complete_rules.insert(item.rule_index);
                } else {
                    all_items_complete = false;
                    if grammar
                        .rule_token(item.rule_index, item.input_position)
                        .is_terminal()
                    {
                        waiting_shift_actions = true;
                    }
                }
            }
            if complete_rules.is_empty() {
                return Ok(false);
            }

            if all_items_complete {
                let rule = if complete_rules.len() > 1 {
                    self.resolve_ambiguous_leaf(&complete_rules, diagnostics)?
                } else {
                    *complete_rules.iter().next().unwrap()
                };
                // Delays recorded in the leaf itself resolve right here;
                // no goto row is ever taken for the leaf's own frames.
                let (reductions, leaf_stack, _) =
                    walk_delayed_frames(&self.graph[node].delayed_reductions, vec![rule]);
                let row = self.graph[node].row;
                for resolved in &reductions {
                    self.builder
                        .add_action_reduce_prev(row, ParseToken::rule(*resolved as u32));
                }
                if node == Self::root_node() {
                    self.builder
                        .add_action_reduce(row, ParseToken::rule(rule as u32));
                    self.builder.add_action_accept(row);
                } else {
                    self.builder.add_action_return(row);
                }
                self.graph[node].completed_rule = Some(rule);
                self.graph[node].leaf_stack = leaf_stack;
                self.leaves.push(node);
                return Ok(true);
            }

            let row = self.graph[node].row;
            if complete_rules.len() > 1 || waiting_shift_actions {
                self.builder
                    .add_action_reduce(row, ParseToken::SPECIAL_IGNORE);
                let mut frame: BTreeMap<usize, usize> = BTreeMap::new();
                for item in &self.graph[node].items {
                    if item.is_complete(grammar) {
                        continue;
                    }
                    if let Some(expected) = item.input_position_rule {
                        if complete_rules.contains(&expected) {
                            frame.entry(item.rule_index).or_insert(expected);
                        }
                    }
                }
                self.graph[node].delayed_reductions.push(frame);
            } else {
                let rule = *complete_rules.iter().next().unwrap();
                self.builder
                    .add_action_reduce(row, ParseToken::rule(rule as u32));
            }

            // Drop the completed items, then step the remaining items
            // over the completions they were waiting for. An item whose
            // completed nonterminal is left-recursive stays behind as
            // well: the completion it saw may grow into a longer
            // derivation of the same nonterminal, so the state must keep
            // expecting it. Advancing a copy instead of the item itself
            // is what lets a recursive pivot fork back into its own
            // state.
            let left_recursive = &self.left_recursive;
            let state = &mut self.graph[node];
            state.items.retain(|item| !item.is_complete(grammar));
            let mut advanced: Vec<Item> = Vec::new();
            for item in &mut state.items {
                if let Some(expected) = item.input_position_rule {
                    if complete_rules.contains(&expected) {
                        if left_recursive.contains(&grammar.rule_head(expected)) {
                            let mut copy = *item;
                            copy.input_position += 1;
                            copy.input_position_rule = None;
                            advanced.push(copy);
                        } else {
                            item.input_position += 1;
                            item.input_position_rule = None;
                        }
                    }
                }
            }
            for item in advanced {
                if !state.items.contains(&item) {
                    state.items.push(item);
                }
            }
        }
    }

    /// Several rules completed at once: a precedence directive set that
    /// makes exactly one of them dominate every other resolves the
    /// ambiguity, otherwise it is fatal.
    fn resolve_ambiguous_leaf(
        &self,
        complete_rules: &BTreeSet<usize>,
        diagnostics: &mut dyn Write,
    ) -> Result<usize, ConstructError> {
        let rules: Vec<usize> = complete_rules.iter().copied().collect();
        let dominators: Vec<usize> = rules
            .iter()
            .copied()
            .filter(|&candidate| {
                rules.iter().all(|&other| {
                    let (first, second) = self.distinguishing_tokens(other, candidate);
                    other == candidate || self.grammar.has_precedence(first, second)
                })
            })
            .collect();
        match dominators.as_slice() {
            [rule] => {
                writeln!(
                    diagnostics,
                    "warning: ambiguous completion resolved by precedence, keeping {}",
                    self.grammar.display_rule(*rule)
                )?;
                Ok(*rule)
            }
            _ => Err(ConstructError::AmbiguousState { rules }),
        }
    }

    /// The token pair a precedence directive must name to prefer
    /// `candidate` over `other`: the rule heads when they differ, else
    /// the first position where the right-hand sides diverge.
    fn distinguishing_tokens(&self, other: usize, candidate: usize) -> (ParseToken, ParseToken) {
        let other_head = self.grammar.rule_head(other);
        let candidate_head = self.grammar.rule_head(candidate);
        if other_head != candidate_head {
            return (other_head, candidate_head);
        }
        let other_tokens = self.grammar.rule(other).tokens();
        let candidate_tokens = self.grammar.rule(candidate).tokens();
        for (a, b) in other_tokens.iter().zip(candidate_tokens.iter()) {
            if a != b {
                return (*a, *b);
            }
        }
        (other_head, candidate_head)
    }

    /// The item subset carried into the child state forked along
    /// `pivot_terminal`: every item that just stepped over the terminal,
    /// closed under "my expected rule is already included".
    fn copy_state_using_pivot(&self, node: NodeIndex, pivot_terminal: ParseToken) -> Vec<Item> {
        let items = &self.graph[node].items;
        let mut in_subset = vec![false; items.len()];
        let mut copy_rule_indexes: BTreeSet<usize> = BTreeSet::new();
        for (index, item) in items.iter().enumerate() {
            if item.input_position > 0
                && self
                    .grammar
                    .rule_token(item.rule_index, item.input_position - 1)
                    == pivot_terminal
            {
                in_subset[index] = true;
                copy_rule_indexes.insert(item.rule_index);
            }
        }
        loop {
            let mut changed = false;
            for (index, item) in items.iter().enumerate() {
                if in_subset[index] {
                    continue;
                }
                match item.input_position_rule {
                    Some(expected) if copy_rule_indexes.contains(&expected) => {}
                    _ => continue,
                }
                copy_rule_indexes.insert(item.rule_index);
                in_subset[index] = true;
                changed = true;
            }
            if !changed {
                break;
            }
        }
        items
            .iter()
            .enumerate()
            .filter(|(index, _)| in_subset[*index])
            .map(|(_, item)| *item)
            .collect()
    }

    /// Back-propagates every leaf's reduction through the incoming-pivot
    /// graph. Runs after the graph is complete so pivot edges added to
    /// deduplicated states are all visible.
    fn resolve_all_delays(&mut self) {
        for leaf in self.leaves.clone() {
            let leaf_row = self.graph[leaf].row;
            let Some(leaf_rule) = self.graph[leaf].completed_rule else {
                continue;
            };
            let stack = self.graph[leaf].leaf_stack.clone();
            let mut emitted: BTreeSet<(NodeIndex, Vec<usize>)> = BTreeSet::new();
            let predecessors: BTreeSet<NodeIndex> =
                self.graph.neighbors_directed(leaf, Incoming).collect();
            for predecessor in predecessors {
                self.resolve_from(predecessor, leaf_row, leaf_rule, stack.clone(), &mut emitted);
            }
        }
    }

    /// Emits the goto row that patches `node`'s delayed reductions when
    /// the recognizer returns here after reducing in the leaf row, then
    /// recurses into `node`'s own predecessors.
    ///
    /// Each branch walks a copy of the resolution stack; sibling branches
    /// consume it independently. A branch whose goto row would repeat one
    /// already emitted at this node for this leaf is pruned, which is
    /// what terminates the walk over pivot cycles.
    fn resolve_from(
        &mut self,
        node: NodeIndex,
        leaf_row: RowId,
        leaf_rule: usize,
        stack: Vec<usize>,
        emitted: &mut BTreeSet<(NodeIndex, Vec<usize>)>,
    ) {
        let (reductions, stack, exhausted) =
            walk_delayed_frames(&self.graph[node].delayed_reductions, stack);
        if !emitted.insert((node, reductions.clone())) {
            return;
        }
        let goto_row = self.builder.add_action_row();
        let row = self.graph[node].row;
        self.builder.add_action_goto(row, leaf_row, goto_row);
        for rule in &reductions {
            self.builder
                .add_action_reduce_prev(goto_row, ParseToken::rule(*rule as u32));
        }
        if node == Self::root_node() {
            // Unwinding ends at the root: the leaf's own reduction lands
            // here, after every delayed slot has been patched.
            self.builder
                .add_action_reduce(goto_row, ParseToken::rule(leaf_rule as u32));
            self.builder.add_action_accept(goto_row);
        } else {
            self.builder.add_action_return(goto_row);
        }
        if exhausted {
            return;
        }
        let predecessors: BTreeSet<NodeIndex> =
            self.graph.neighbors_directed(node, Incoming).collect();
        for predecessor in predecessors {
            self.resolve_from(predecessor, leaf_row, leaf_rule, stack.clone(), emitted);
        }
    }
}

/// Nonterminals that can derive a string beginning with themselves,
/// found by closing the leftmost-symbol relation (nullable prefixes let
/// the left corner pass through).
fn left_recursive_nonterminals(grammar: &Grammar) -> BTreeSet<ParseToken> {
    let mut reachable: BTreeMap<ParseToken, BTreeSet<ParseToken>> = BTreeMap::new();
    for (rule, head) in grammar.rules() {
        let corners = reachable.entry(*head).or_default();
        for token in rule.tokens() {
            if token.is_terminal() {
                break;
            }
            corners.insert(*token);
            if !grammar.is_nullable(*token) {
                break;
            }
        }
    }
    loop {
        let mut changed = false;
        let snapshot = reachable.clone();
        for corners in reachable.values_mut() {
            for corner in corners.clone() {
                if let Some(transitive) = snapshot.get(&corner) {
                    for token in transitive {
                        changed |= corners.insert(*token);
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    reachable
        .into_iter()
        .filter(|(head, corners)| corners.contains(head))
        .map(|(head, _)| head)
        .collect()
}

/// Walks the delayed frames newest to oldest. A frame maps a rule that
/// was still incomplete when the delay was emitted to the completion it
/// was waiting on; resolving a frame pushes the completion so older
/// frames (and predecessor states) key on it. Returns the REDUCE_PREV
/// rules to emit, the remaining stack, and whether the stack ran dry.
fn walk_delayed_frames(
    frames: &[BTreeMap<usize, usize>],
    mut stack: Vec<usize>,
) -> (Vec<usize>, Vec<usize>, bool) {
    let mut reductions = Vec::new();
    for frame in frames.iter().rev() {
        loop {
            let Some(&top) = stack.last() else {
                return (reductions, stack, true);
            };
            if let Some(&child) = frame.get(&top) {
                reductions.push(child);
                stack.push(child);
                break;
            }
            stack.pop();
        }
    }
    (reductions, stack, false)
}
