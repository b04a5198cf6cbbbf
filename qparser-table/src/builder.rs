use std::fmt::{self, Display};

use qparser_grammar::ParseToken;

/// Stable handle to an action row under construction. The flat offset of
/// a row is only fixed once the whole table is built; until then rows are
/// addressed through their handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowId(usize);

impl RowId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Shift(ParseToken),
    Reduce(ParseToken),
    ReducePrev(ParseToken),
    Pivot(Vec<(ParseToken, RowId)>),
    Goto { lookahead: RowId, target: RowId },
    Return,
    Accept,
}

impl Action {
    fn width(&self) -> u32 {
        match self {
            Action::Shift(_) | Action::Reduce(_) | Action::ReducePrev(_) => 1,
            Action::Pivot(branches) => 2 + 2 * branches.len() as u32,
            Action::Goto { .. } => 3,
            Action::Return | Action::Accept => 1,
        }
    }
}

/// Append-only assembler for the flat action table.
///
/// Rows are independent append targets; opening a new row never moves or
/// invalidates a previously handed-out handle. Flattening resolves every
/// pivot and goto row handle to its final offset.
#[derive(Debug, Default)]
pub struct ActionTableBuilder {
    rows: Vec<Vec<Action>>,
}

impl ActionTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action_row(&mut self) -> RowId {
        self.rows.push(Vec::new());
        RowId(self.rows.len() - 1)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn add_action_shift(&mut self, row: RowId, terminal: ParseToken) {
        self.rows[row.0].push(Action::Shift(terminal));
    }

    pub fn add_action_reduce(&mut self, row: RowId, rule: ParseToken) {
        self.rows[row.0].push(Action::Reduce(rule));
    }

    pub fn add_action_reduce_prev(&mut self, row: RowId, rule: ParseToken) {
        self.rows[row.0].push(Action::ReducePrev(rule));
    }

    /// Appends the row's pivot. A pivot is the last decision of a row;
    /// every branch pairs a terminal with its target row.
    pub fn add_action_pivot(&mut self, row: RowId, branches: Vec<(ParseToken, RowId)>) {
        self.rows[row.0].push(Action::Pivot(branches));
    }

    pub fn add_action_goto(&mut self, row: RowId, lookahead: RowId, target: RowId) {
        self.rows[row.0].push(Action::Goto { lookahead, target });
    }

    pub fn add_action_return(&mut self, row: RowId) {
        self.rows[row.0].push(Action::Return);
    }

    pub fn add_action_accept(&mut self, row: RowId) {
        self.rows[row.0].push(Action::Accept);
    }

    /// Flattens the rows, in handle order, into the final word sequence.
    pub fn build(self) -> ParseTable {
        let mut row_offsets = Vec::with_capacity(self.rows.len());
        let mut offset = 0u32;
        for row in &self.rows {
            row_offsets.push(offset);
            offset += row.iter().map(Action::width).sum::<u32>();
        }
        let mut actions = Vec::with_capacity(offset as usize);
        for row in &self.rows {
            for action in row {
                match action {
                    Action::Shift(terminal) => actions.push(*terminal),
                    Action::Reduce(rule) => actions.push(*rule),
                    Action::ReducePrev(rule) => {
                        actions.push(ParseToken::reduce_prev(rule.raw()));
                    }
                    Action::Pivot(branches) => {
                        actions.push(ParseToken::ACTION_PIVOT);
                        actions.push(ParseToken::from_raw(branches.len() as u32));
                        for (terminal, target) in branches {
                            actions.push(*terminal);
                            actions.push(ParseToken::from_raw(row_offsets[target.0]));
                        }
                    }
                    Action::Goto { lookahead, target } => {
                        actions.push(ParseToken::ACTION_GOTO);
                        actions.push(ParseToken::from_raw(row_offsets[lookahead.0]));
                        actions.push(ParseToken::from_raw(row_offsets[target.0]));
                    }
                    Action::Return => actions.push(ParseToken::ACTION_RETURN),
                    Action::Accept => actions.push(ParseToken::ACTION_ACCEPT),
                }
            }
        }
        ParseTable {
            actions,
            row_offsets,
        }
    }
}

/// The compiled action table: a flat sequence of tagged 32-bit words,
/// dispatched by value range and flag tests alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseTable {
    actions: Vec<ParseToken>,
    row_offsets: Vec<u32>,
}

impl ParseTable {
    pub fn actions(&self) -> &[ParseToken] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.row_offsets.len()
    }

    pub fn row_offset(&self, row: usize) -> u32 {
        self.row_offsets[row]
    }
}

impl Display for ParseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.row_offsets.len() {
            let start = self.row_offsets[row] as usize;
            let end = self
                .row_offsets
                .get(row + 1)
                .map(|o| *o as usize)
                .unwrap_or(self.actions.len());
            write!(f, "{:>4}:", start)?;
            let mut index = start;
            while index < end {
                let action = self.actions[index];
                if action == ParseToken::ACTION_PIVOT {
                    let count = self.actions[index + 1].raw() as usize;
                    write!(f, " p{{")?;
                    for branch in 0..count {
                        let terminal = self.actions[index + 2 + 2 * branch];
                        let target = self.actions[index + 3 + 2 * branch];
                        if branch > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{} > {}", terminal, target.raw())?;
                    }
                    write!(f, "}}")?;
                    index += 2 + 2 * count;
                } else if action == ParseToken::ACTION_GOTO {
                    write!(
                        f,
                        " g{{{} > {}}}",
                        self.actions[index + 1].raw(),
                        self.actions[index + 2].raw()
                    )?;
                    index += 3;
                } else if action == ParseToken::ACTION_RETURN {
                    write!(f, " ret")?;
                    index += 1;
                } else if action == ParseToken::ACTION_ACCEPT {
                    write!(f, " acc")?;
                    index += 1;
                } else if action.is_terminal() {
                    write!(f, " s({})", action.index())?;
                    index += 1;
                } else if action.raw() & ParseToken::FLAG_REDUCE_PREV != 0 {
                    write!(f, " rp({})", action.index())?;
                    index += 1;
                } else if action == ParseToken::SPECIAL_IGNORE {
                    write!(f, " r(i)")?;
                    index += 1;
                } else {
                    write!(f, " r({})", action.raw())?;
                    index += 1;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
