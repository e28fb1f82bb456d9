//! # Linearized Expression Programs
//!
//! [`ActionsDag::build_expressions`] turns a DAG into an
//! [`ExpressionProgram`]: a straight-line sequence of slot-based actions.
//! The linearizer is a Kahn-style topological sort with two ready queues —
//! array joins are deferred until everything that does not depend on them
//! has been scheduled, so sibling expressions are materialized before the
//! row cardinality changes.
//!
//! ## Slots
//!
//! Every value lives in a numbered slot. A free-slot stack recycles the
//! slot of a column after its last consumer: the linearizer counts created
//! parents per node and tags the final consumption with `remove`, which
//! both clears the slot at run time and returns it to the stack at plan
//! time. `num_slots` is therefore the peak number of simultaneously live
//! columns, which is what the plan-time budget checks.
//!
//! ## Execution
//!
//! `execute` materializes required inputs out of the block into their
//! slots, runs the actions in order, enforces the non-const column budget
//! after each one, erases consumed inputs, and publishes every action
//! marked `is_used_in_result` into the block by name.

use std::collections::VecDeque;

use eyre::WrapErr;
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_128;

use crate::block::{Block, ColumnWithTypeAndName, NameAndType};
use crate::dag::{ActionsDag, Node, NodeId, NodeKind};
use crate::error::{ExprError, Result};
use crate::settings::ExecutionSettings;
use crate::types::Column;

/// One argument of a linearized action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argument {
    /// Slot the argument lives in.
    pub pos: usize,
    /// Set on the last consumption of a column that is not part of the
    /// result; the slot is cleared and recycled afterwards.
    pub remove: bool,
}

/// One linearized action.
#[derive(Debug, Clone)]
pub struct Action {
    pub node: NodeId,
    pub arguments: SmallVec<[Argument; 2]>,
    pub result_position: usize,
    pub is_used_in_result: bool,
}

/// The linearized, slot-assigned form of a DAG, immutable after build and
/// safely shareable across threads. All per-invocation state of `execute`
/// is stack-local.
pub struct ExpressionProgram {
    pub(crate) nodes: Vec<Node>,
    pub(crate) actions: Vec<Action>,
    pub(crate) required_columns: Vec<NameAndType>,
    /// Slot assigned to each required column, parallel to
    /// `required_columns`.
    pub(crate) input_positions: Vec<usize>,
    pub(crate) sample_block: Block,
    pub(crate) num_slots: usize,
    pub(crate) settings: ExecutionSettings,
    pub(crate) project_input: bool,
}

#[derive(Default)]
struct NodeState {
    num_created_children: usize,
    num_expected_children: usize,
    parents: Vec<NodeId>,
    renamed_child: Option<NodeId>,
    position: Option<usize>,
    num_created_parents: usize,
    used_in_result: bool,
}

impl ActionsDag {
    /// Linearizes the DAG into an executable program, consuming the node
    /// arena. Fails with TOO_MANY_TEMPORARY_COLUMNS when the peak slot
    /// count exceeds the configured budget.
    pub fn build_expressions(self) -> Result<ExpressionProgram> {
        let node_count = self.nodes.len();
        let mut state: Vec<NodeState> = Vec::with_capacity(node_count);
        state.resize_with(node_count, NodeState::default);

        for id in 0..node_count {
            let node = &self.nodes[id];
            state[id].num_expected_children += node.children.len();
            state[id].used_in_result =
                node.renaming_parent.is_none() && self.index.contains_key(&node.result_name);

            for &child in &node.children {
                state[child].parents.push(id);
            }

            // A replacement node waits for the node it displaced, so the
            // displaced column is computed (and its slot retired) first.
            if let Some(parent) = node.renaming_parent {
                state[parent].renamed_child = Some(id);
                state[parent].num_expected_children += 1;
            }
        }

        let mut ready: VecDeque<NodeId> = VecDeque::new();
        let mut ready_array_joins: VecDeque<NodeId> = VecDeque::new();

        for id in 0..node_count {
            if self.nodes[id].children.is_empty() && state[id].renamed_child.is_none() {
                ready.push_back(id);
            }
        }

        fn mark_child_created(
            nodes: &[Node],
            state: &mut [NodeState],
            ready: &mut VecDeque<NodeId>,
            ready_array_joins: &mut VecDeque<NodeId>,
            parent: NodeId,
        ) {
            let parent_state = &mut state[parent];
            parent_state.num_created_children += 1;
            if parent_state.num_created_children == parent_state.num_expected_children {
                if nodes[parent].kind == NodeKind::ArrayJoin {
                    ready_array_joins.push_back(parent);
                } else {
                    ready.push_back(parent);
                }
            }
        }

        let mut actions: Vec<Action> = Vec::new();
        let mut required_columns: Vec<NameAndType> = Vec::new();
        let mut input_positions: Vec<usize> = Vec::new();
        let mut sample_block = Block::default();
        let mut free_positions: Vec<usize> = Vec::new();
        let mut num_slots = 0usize;

        while let Some(id) = ready.pop_front().or_else(|| ready_array_joins.pop_front()) {
            let position = free_positions.pop().unwrap_or_else(|| {
                num_slots += 1;
                num_slots - 1
            });
            state[id].position = Some(position);

            let mut arguments: SmallVec<[Argument; 2]> =
                SmallVec::with_capacity(self.nodes[id].children.len());
            let mut freed: SmallVec<[usize; 2]> = SmallVec::new();

            for &child in &self.nodes[id].children {
                let child_state = &mut state[child];
                let pos = child_state.position.ok_or_else(|| {
                    ExprError::logical(format!(
                        "argument was not calculated for {}",
                        self.nodes[child].result_name
                    ))
                })?;

                child_state.num_created_parents += 1;
                let remove = !child_state.used_in_result
                    && child_state.num_created_parents == child_state.parents.len();
                if remove {
                    freed.push(pos);
                }
                arguments.push(Argument { pos, remove });
            }
            // Recycled only now, so the freed slots cannot collide with this
            // action's own result position.
            free_positions.extend(freed);

            let node = &self.nodes[id];
            if node.kind == NodeKind::Input {
                required_columns.push(NameAndType::new(
                    node.result_name.clone(),
                    node.result_type.clone(),
                ));
                input_positions.push(position);
            } else {
                actions.push(Action {
                    node: id,
                    arguments,
                    result_position: position,
                    is_used_in_result: state[id].used_in_result,
                });
            }

            if state[id].used_in_result {
                sample_block.insert(ColumnWithTypeAndName::new(
                    node.column.clone(),
                    node.result_type.clone(),
                    node.result_name.clone(),
                ));
            }

            let parents = std::mem::take(&mut state[id].parents);
            for &parent in &parents {
                mark_child_created(
                    &self.nodes,
                    &mut state,
                    &mut ready,
                    &mut ready_array_joins,
                    parent,
                );
            }
            state[id].parents = parents;

            if let Some(renaming_parent) = self.nodes[id].renaming_parent {
                mark_child_created(
                    &self.nodes,
                    &mut state,
                    &mut ready,
                    &mut ready_array_joins,
                    renaming_parent,
                );
            }
        }

        if self.settings.max_temporary_columns != 0
            && num_slots > self.settings.max_temporary_columns
        {
            return Err(eyre::Report::new(ExprError::TooManyTemporaryColumns {
                names: self.dump_names(),
                limit: self.settings.max_temporary_columns,
            }));
        }

        debug!(
            actions = actions.len(),
            inputs = required_columns.len(),
            num_slots,
            "linearized expression dag"
        );

        Ok(ExpressionProgram {
            nodes: self.nodes,
            actions,
            required_columns,
            input_positions,
            sample_block,
            num_slots,
            settings: self.settings,
            project_input: false,
        })
    }
}

impl ExpressionProgram {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Schema of the inputs the program consumes, in schedule order.
    pub fn required_columns(&self) -> &[NameAndType] {
        &self.required_columns
    }

    pub fn required_column_names(&self) -> Vec<String> {
        self.required_columns
            .iter()
            .map(|column| column.name.clone())
            .collect()
    }

    /// Output schema. Column payloads are present only for folded
    /// constants.
    pub fn sample_block(&self) -> &Block {
        &self.sample_block
    }

    /// Peak number of simultaneously live slots.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn settings(&self) -> ExecutionSettings {
        self.settings
    }

    pub fn has_array_join(&self) -> bool {
        self.actions
            .iter()
            .any(|action| self.nodes[action.node].kind == NodeKind::ArrayJoin)
    }

    /// Makes the program drop every input column from the block instead of
    /// only the consumed ones.
    pub fn prepend_project_input(&mut self) {
        self.project_input = true;
    }

    pub fn projects_input(&self) -> bool {
        self.project_input
    }

    fn check_limits(&self, slots: &[Option<ColumnWithTypeAndName>]) -> Result<()> {
        let limit = self.settings.max_temporary_non_const_columns;
        if limit == 0 {
            return Ok(());
        }

        let is_non_const = |cwt: &&ColumnWithTypeAndName| {
            cwt.column.as_ref().is_some_and(|column| !column.is_const())
        };
        let non_const = slots.iter().flatten().filter(is_non_const).count();
        if non_const > limit {
            let mut names = String::new();
            for cwt in slots.iter().flatten().filter(is_non_const) {
                names.push('\n');
                names.push_str(&cwt.name);
            }
            return Err(eyre::Report::new(
                ExprError::TooManyTemporaryNonConstColumns { names, limit },
            ));
        }
        Ok(())
    }

    /// Runs the program over `block`, mutating it to carry the result
    /// schema. `dry_run` is forwarded to function execution.
    pub fn execute(&self, block: &mut Block, dry_run: bool) -> Result<()> {
        let mut num_rows = block.rows();
        let mut slots: Vec<Option<ColumnWithTypeAndName>> = vec![None; self.num_slots];

        let mut inputs_to_remove: Vec<usize> = Vec::with_capacity(self.required_columns.len());
        for (required, &slot) in self.required_columns.iter().zip(&self.input_positions) {
            let pos = block.position_by_name(&required.name).ok_or_else(|| {
                eyre::Report::new(ExprError::UnknownIdentifier(format!(
                    "required column '{}' is missing from the block",
                    required.name
                )))
            })?;
            let column = block.take_column_at(pos)?;
            slots[slot] = Some(ColumnWithTypeAndName::new(
                Some(column),
                required.data_type.clone(),
                required.name.clone(),
            ));
            if !self.sample_block.has(&required.name) {
                inputs_to_remove.push(pos);
            }
        }

        for action in &self.actions {
            self.execute_action(action, &mut slots, block, &mut num_rows, dry_run)
                .and_then(|()| self.check_limits(&slots))
                .wrap_err_with(|| format!("while executing '{}'", self.action_to_string(action)))?;
        }

        if self.project_input {
            block.clear();
        } else {
            // Reverse order keeps the recorded positions stable while
            // erasing, including duplicates of a redefined name.
            inputs_to_remove.sort_unstable_by(|a, b| b.cmp(a));
            for pos in inputs_to_remove {
                block.erase(pos);
            }
        }

        // Required inputs that are part of the output schema were moved
        // into slots (and possibly replicated by an array join there);
        // hand them back to the block before the action results land.
        for (required, &slot) in self.required_columns.iter().zip(&self.input_positions) {
            if !self.sample_block.has(&required.name) {
                continue;
            }
            if let Some(cwt) = slots[slot].take() {
                block.insert_or_replace(ColumnWithTypeAndName::new(
                    cwt.column,
                    required.data_type.clone(),
                    required.name.clone(),
                ));
            }
        }

        for action in &self.actions {
            if !action.is_used_in_result {
                continue;
            }
            let node = &self.nodes[action.node];
            let slot = slots[action.result_position].take().ok_or_else(|| {
                ExprError::logical(format!(
                    "result column {} was lost during execution",
                    node.result_name
                ))
            })?;
            block.insert_or_replace(ColumnWithTypeAndName::new(
                slot.column,
                node.result_type.clone(),
                node.result_name.clone(),
            ));
        }

        trace!(rows = block.rows(), columns = block.num_columns(), "executed program");
        Ok(())
    }

    fn execute_action(
        &self,
        action: &Action,
        slots: &mut [Option<ColumnWithTypeAndName>],
        block: &mut Block,
        num_rows: &mut usize,
        dry_run: bool,
    ) -> Result<()> {
        let node = &self.nodes[action.node];
        match node.kind {
            NodeKind::Function => {
                if slots[action.result_position].is_some() {
                    return Err(ExprError::logical("result column is not empty"));
                }

                let mut args: Vec<ColumnWithTypeAndName> =
                    Vec::with_capacity(action.arguments.len());
                for (i, argument) in action.arguments.iter().enumerate() {
                    let taken = match slots[argument.pos].take() {
                        Some(value) => value,
                        None => {
                            // The same slot can feed one call twice, e.g.
                            // plus(x, x); the first take emptied it.
                            let earlier = action.arguments[..i]
                                .iter()
                                .position(|a| a.pos == argument.pos);
                            match earlier {
                                Some(j) => args[j].clone(),
                                None => {
                                    return Err(ExprError::logical(format!(
                                        "argument in slot {} was not calculated",
                                        argument.pos
                                    )))
                                }
                            }
                        }
                    };
                    args.push(taken);
                }

                let function = node
                    .function
                    .as_ref()
                    .ok_or_else(|| ExprError::logical("FUNCTION node has no prepared function"))?;
                let column = function.execute(&args, &node.result_type, *num_rows, dry_run)?;

                for (argument, value) in action.arguments.iter().zip(args) {
                    if !argument.remove {
                        slots[argument.pos] = Some(value);
                    }
                }
                // Removal wins over a restore of the same slot.
                for argument in &action.arguments {
                    if argument.remove {
                        slots[argument.pos] = None;
                    }
                }

                slots[action.result_position] = Some(ColumnWithTypeAndName::new(
                    Some(column),
                    node.result_type.clone(),
                    node.result_name.clone(),
                ));
            }

            NodeKind::ArrayJoin => {
                let key_argument = action.arguments[0];
                let key = slots[key_argument.pos].clone().ok_or_else(|| {
                    ExprError::logical("array join argument was not calculated")
                })?;

                // The key slot is cleared up front when removable, so the
                // array itself is not pointlessly replicated below.
                if key_argument.remove {
                    slots[key_argument.pos] = None;
                }

                let key_column = key
                    .column
                    .ok_or_else(|| ExprError::logical("array join argument has no data"))?
                    .convert_to_full_column_if_const()?;

                let (offsets, values, element) =
                    key_column.as_array().ok_or_else(|| {
                        eyre::Report::new(ExprError::TypeMismatch(format!(
                            "ARRAY JOIN of not array: {}",
                            node.result_name
                        )))
                    })?;
                let offsets = offsets.clone();
                let flat = Column::Full(values.clone());
                let element = element.clone();

                for slot in slots.iter_mut() {
                    if let Some(cwt) = slot {
                        if let Some(column) = &cwt.column {
                            cwt.column = Some(column.replicate(&offsets)?);
                        }
                    }
                }
                for cwt in block.columns_mut() {
                    if let Some(column) = &cwt.column {
                        cwt.column = Some(column.replicate(&offsets)?);
                    }
                }

                *num_rows = flat.len();
                slots[action.result_position] = Some(ColumnWithTypeAndName::new(
                    Some(flat),
                    element,
                    node.result_name.clone(),
                ));
            }

            NodeKind::Column => {
                let column = node
                    .column
                    .as_ref()
                    .ok_or_else(|| ExprError::logical("COLUMN node has no data"))?
                    .clone_resized(*num_rows)?;
                slots[action.result_position] = Some(ColumnWithTypeAndName::new(
                    Some(column),
                    node.result_type.clone(),
                    node.result_name.clone(),
                ));
            }

            NodeKind::Alias => {
                let argument = action.arguments[0];
                if action.result_position != argument.pos {
                    slots[action.result_position] = slots[argument.pos].clone();
                }
                let renamed = slots[action.result_position].as_mut().ok_or_else(|| {
                    ExprError::logical("alias argument was not calculated")
                })?;
                renamed.name = node.result_name.clone();
                renamed.data_type = node.result_type.clone();

                if argument.remove {
                    slots[argument.pos] = None;
                }
            }

            NodeKind::Input => {
                return Err(ExprError::logical("cannot execute INPUT action"));
            }
        }
        Ok(())
    }

    /// Human-readable rendering of one action, as used by `dump_actions`
    /// and by error annotation.
    pub fn action_to_string(&self, action: &Action) -> String {
        let node = &self.nodes[action.node];
        match node.kind {
            NodeKind::Column => format!(
                "COLUMN {} {} {}",
                node.result_name,
                node.result_type.name(),
                node.column
                    .as_ref()
                    .map_or_else(|| "(no column)".to_string(), Column::kind_name)
            ),
            NodeKind::Alias => {
                let source = &self.nodes[node.children[0]].result_name;
                let removing = if action.arguments[0].remove {
                    " (removing)"
                } else {
                    ""
                };
                format!("ALIAS {} = {}{}", node.result_name, source, removing)
            }
            NodeKind::Function => {
                let compiled = if node.is_function_compiled {
                    "[compiled] "
                } else {
                    ""
                };
                let function = node
                    .function_base
                    .as_ref()
                    .map_or("(no function)", |base| base.name());
                let args = node
                    .children
                    .iter()
                    .map(|&child| self.nodes[child].result_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "FUNCTION {} {}{} = {}({})",
                    node.result_name,
                    compiled,
                    node.result_type.name(),
                    function,
                    args
                )
            }
            NodeKind::ArrayJoin => format!(
                "ARRAY JOIN {} -> {}",
                self.nodes[node.children[0]].result_name, node.result_name
            ),
            NodeKind::Input => String::new(),
        }
    }

    /// EXPLAIN rendering: inputs, actions in execution order, outputs.
    pub fn dump_actions(&self) -> String {
        let mut out = String::from("input:\n");
        for column in &self.required_columns {
            out.push_str(&format!("{} {}\n", column.name, column.data_type.name()));
        }

        out.push_str("\nactions:\n");
        for action in &self.actions {
            out.push_str(&self.action_to_string(action));
            out.push('\n');
        }

        out.push_str("\noutput:\n");
        for column in self.sample_block.names_and_types() {
            out.push_str(&format!("{} {}\n", column.name, column.data_type.name()));
        }

        out
    }

    /// True iff `column_name` is the output of `in`/`globalIn` whose
    /// right-hand side is a COLUMN carrying a created, empty set. Upstream
    /// filters use this to short-circuit to an empty result.
    pub fn check_column_is_always_false(&self, column_name: &str) -> bool {
        let mut set_to_check: Option<&str> = None;

        for action in self.actions.iter().rev() {
            let node = &self.nodes[action.node];
            if node.kind == NodeKind::Function
                && node.result_name == column_name
                && node.children.len() > 1
            {
                if let Some(base) = &node.function_base {
                    let name = base.name();
                    if name == "in" || name == "globalIn" {
                        set_to_check = Some(&self.nodes[node.children[1]].result_name);
                        break;
                    }
                }
            }
        }

        let Some(set_name) = set_to_check else {
            return false;
        };

        for action in &self.actions {
            let node = &self.nodes[action.node];
            if node.kind == NodeKind::Column && node.result_name == set_name {
                if let Some(set) = node.column.as_ref().and_then(Column::as_set) {
                    if set.is_created() && set.total_row_count() == 0 {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// 128-bit structural fingerprint of one action. Collisions are
    /// tolerated; `actions_equal` decides.
    pub fn action_hash(&self, action: &Action) -> u128 {
        let node = &self.nodes[action.node];
        let mut buffer: Vec<u8> = Vec::new();

        buffer.push(match node.kind {
            NodeKind::Input => 0,
            NodeKind::Column => 1,
            NodeKind::Alias => 2,
            NodeKind::Function => 3,
            NodeKind::ArrayJoin => 4,
        });
        buffer.push(node.is_function_compiled as u8);

        let mut feed = |piece: &str| {
            buffer.extend_from_slice(piece.as_bytes());
            buffer.push(0);
        };

        match node.kind {
            NodeKind::Column => {
                feed(&node.result_name);
                feed(&node.result_type.name());
                if let Some(column) = &node.column {
                    feed(&column.kind_name());
                }
            }
            NodeKind::Alias | NodeKind::ArrayJoin => {
                feed(&node.result_name);
                feed(&self.nodes[node.children[0]].result_name);
            }
            NodeKind::Function => {
                feed(&node.result_name);
                feed(&node.result_type.name());
                if let Some(base) = &node.function_base {
                    feed(base.name());
                    for data_type in base.argument_types() {
                        feed(&data_type.name());
                    }
                }
                for &child in &node.children {
                    feed(&self.nodes[child].result_name);
                }
            }
            NodeKind::Input => {
                feed(&node.result_name);
                feed(&node.result_type.name());
            }
        }

        xxh3_128(&buffer)
    }

    /// Structural equality of two actions, usable as the key check of a
    /// compiled-expression cache. FUNCTION actions are equal iff the
    /// function name, the ordered argument types (deeply), the argument
    /// names, and the compiled flag all match.
    pub fn actions_equal(&self, action: &Action, other: &ExpressionProgram, other_action: &Action) -> bool {
        let a = &self.nodes[action.node];
        let b = &other.nodes[other_action.node];

        if a.kind != b.kind
            || a.result_name != b.result_name
            || a.result_type != b.result_type
            || a.is_function_compiled != b.is_function_compiled
        {
            return false;
        }

        let argument_names_match = a.children.len() == b.children.len()
            && a.children.iter().zip(&b.children).all(|(&x, &y)| {
                self.nodes[x].result_name == other.nodes[y].result_name
            });
        if !argument_names_match {
            return false;
        }

        match a.kind {
            NodeKind::Function => match (&a.function_base, &b.function_base) {
                (Some(fa), Some(fb)) => {
                    fa.name() == fb.name() && fa.argument_types() == fb.argument_types()
                }
                (None, None) => true,
                _ => false,
            },
            NodeKind::Column => {
                let kind_of = |node: &Node| node.column.as_ref().map(Column::kind_name);
                kind_of(a) == kind_of(b)
            }
            _ => true,
        }
    }
}

/// Picks the cheapest column to keep when any one of `columns` would do,
/// by the type's memory-size hint. Unbounded types are costed at 100 bytes.
pub fn get_smallest_column(columns: &[NameAndType]) -> Result<String> {
    let mut smallest: Option<(usize, &NameAndType)> = None;
    for column in columns {
        let size = column.data_type.max_size_in_memory().unwrap_or(100);
        if smallest.map_or(true, |(best, _)| size < best) {
            smallest = Some((size, column));
        }
    }
    smallest
        .map(|(_, column)| column.name.clone())
        .ok_or_else(|| ExprError::logical("no available columns"))
}

impl ExpressionProgram {
    /// Splits the program into a prefix that can run before an array join
    /// over `array_joined_columns` and a suffix (this program, rewritten)
    /// that must run after it.
    ///
    /// An action lands in the suffix iff any of its transitive inputs
    /// depends on an array-joined column. The prefix's outputs are the
    /// columns the suffix consumes plus the original outputs it computes;
    /// concatenated with the array-joined inputs they form the suffix's
    /// input schema.
    ///
    /// Returns `None` (leaving the program untouched) when nothing can be
    /// moved: every input is array-joined, or every action depends on one.
    pub fn split_before_array_join(
        &mut self,
        array_joined_columns: &HashSet<String>,
    ) -> Result<Option<ExpressionProgram>> {
        let prefix_inputs: Vec<NameAndType> = self
            .required_columns
            .iter()
            .filter(|column| !array_joined_columns.contains(&column.name))
            .cloned()
            .collect();
        if prefix_inputs.is_empty() {
            return Ok(None);
        }

        // Partition actions by transitive array-join dependency, in
        // execution order so dependence propagates forward.
        let mut dependent: HashSet<String> = array_joined_columns.clone();
        let mut dependent_arguments: HashSet<String> = HashSet::new();
        let mut prefix_action_nodes: Vec<NodeId> = Vec::new();
        let mut suffix_action_nodes: Vec<NodeId> = Vec::new();

        for action in &self.actions {
            let node = &self.nodes[action.node];
            let depends = node
                .children
                .iter()
                .any(|&child| dependent.contains(&self.nodes[child].result_name));
            if depends {
                dependent.insert(node.result_name.clone());
                for &child in &node.children {
                    dependent_arguments.insert(self.nodes[child].result_name.clone());
                }
                suffix_action_nodes.push(action.node);
            } else {
                prefix_action_nodes.push(action.node);
            }
        }

        if prefix_action_nodes.is_empty() {
            return Ok(None);
        }

        let original_outputs: HashSet<String> =
            self.sample_block.names().into_iter().collect();

        // Prefix DAG: surviving inputs plus the non-dependent actions.
        let mut prefix = ActionsDag::new().with_settings(self.settings);
        let mut prefix_remap: HashMap<NodeId, NodeId> = HashMap::new();

        for (id, node) in self.nodes.iter().enumerate() {
            if node.kind == NodeKind::Input && !array_joined_columns.contains(&node.result_name) {
                let new_id = prefix.push_raw_node(node.clone_shallow());
                prefix_remap.insert(id, new_id);
            }
        }
        for &id in &prefix_action_nodes {
            let node = &self.nodes[id];
            let mut clone = node.clone_shallow();
            for child in clone.children.iter_mut() {
                *child = *prefix_remap.get(child).ok_or_else(|| {
                    ExprError::logical(format!(
                        "prefix action {} depends on an unscheduled column",
                        node.result_name
                    ))
                })?;
            }
            let new_id = prefix.push_raw_node(clone);
            prefix_remap.insert(id, new_id);
        }

        // The prefix publishes what the suffix reads, plus any original
        // output it happens to compute. With a renamed column both holders
        // share a name; the later node wins, like everywhere else.
        let mut prefix_output_ids: Vec<NodeId> = Vec::new();
        for (&old_id, &new_id) in prefix_remap.iter() {
            let name = &self.nodes[old_id].result_name;
            if dependent_arguments.contains(name) || original_outputs.contains(name) {
                prefix_output_ids.push(new_id);
            }
        }
        prefix_output_ids.sort_unstable();
        for &id in &prefix_output_ids {
            prefix.expose_as_output(id);
        }
        let mut prefix_outputs = prefix.live_outputs();
        prefix_outputs.sort_unstable_by_key(|(_, id)| *id);

        // Suffix DAG: prefix outputs and array-joined columns as inputs,
        // then the dependent actions on top.
        let mut suffix = ActionsDag::new().with_settings(self.settings);
        let mut suffix_inputs_by_name: HashMap<String, NodeId> = HashMap::new();

        for (name, id) in &prefix_outputs {
            let node = prefix.node(*id);
            let mut input = Node::input_like(node);
            input.column = node.column.clone();
            let new_id = suffix.push_raw_node(input);
            suffix_inputs_by_name.insert(name.clone(), new_id);
        }
        for node in &self.nodes {
            if node.kind == NodeKind::Input && array_joined_columns.contains(&node.result_name) {
                let new_id = suffix.push_raw_node(node.clone_shallow());
                suffix_inputs_by_name.insert(node.result_name.clone(), new_id);
            }
        }

        let mut suffix_remap: HashMap<NodeId, NodeId> = HashMap::new();
        for &id in &suffix_action_nodes {
            let node = &self.nodes[id];
            let mut clone = node.clone_shallow();
            for child in clone.children.iter_mut() {
                *child = if let Some(&mapped) = suffix_remap.get(child) {
                    mapped
                } else {
                    let child_name = &self.nodes[*child].result_name;
                    *suffix_inputs_by_name.get(child_name).ok_or_else(|| {
                        ExprError::logical(format!(
                            "suffix action {} reads {} which neither side provides",
                            node.result_name, child_name
                        ))
                    })?
                };
            }
            let new_id = suffix.push_raw_node(clone);
            suffix_remap.insert(id, new_id);
        }

        // The suffix keeps the original output schema: every original
        // output is either computed by a suffix action or passed through
        // one of the suffix inputs.
        for (id, node) in self.nodes.iter().enumerate() {
            if node.renaming_parent.is_some() || !original_outputs.contains(&node.result_name) {
                continue;
            }
            let target = if let Some(&mapped) = suffix_remap.get(&id) {
                Some(mapped)
            } else {
                suffix_inputs_by_name.get(&node.result_name).copied()
            };
            if let Some(target) = target {
                suffix.expose_as_output(target);
            }
        }

        debug!(
            prefix_actions = prefix_action_nodes.len(),
            suffix_actions = suffix_action_nodes.len(),
            "split program before array join"
        );

        let prefix_program = prefix.build_expressions()?;
        let mut suffix_program = suffix.build_expressions()?;
        suffix_program.project_input = self.project_input;
        *self = suffix_program;
        Ok(Some(prefix_program))
    }
}

impl Node {
    /// Copy of the node without its back-link; children still carry the
    /// old arena's ids and must be remapped by the caller.
    pub(crate) fn clone_shallow(&self) -> Node {
        let mut clone = self.clone();
        clone.renaming_parent = None;
        clone
    }

    /// An INPUT node with the same name and type as `node`.
    pub(crate) fn input_like(node: &Node) -> Node {
        Node {
            kind: NodeKind::Input,
            result_name: node.result_name.clone(),
            result_type: node.result_type.clone(),
            column: None,
            children: SmallVec::new(),
            function_base: None,
            function: None,
            allow_constant_folding: true,
            is_function_compiled: false,
            renaming_parent: None,
        }
    }
}

impl ActionsDag {
    /// Appends an already-wired node, registering its name. Used by the
    /// split rebuild, which transplants nodes between DAGs without running
    /// the builders again.
    pub(crate) fn push_raw_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    /// Marks a node as part of the DAG's live output set.
    pub(crate) fn expose_as_output(&mut self, id: NodeId) {
        let name = self.nodes[id].result_name.clone();
        self.index.insert(name, id);
    }

    /// The current live output set as (name, id) pairs.
    pub(crate) fn live_outputs(&self) -> Vec<(String, NodeId)> {
        self.index
            .iter()
            .map(|(name, &id)| (name.clone(), id))
            .collect()
    }
}

impl std::fmt::Debug for ExpressionProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionProgram")
            .field("actions", &self.actions.len())
            .field("required_columns", &self.required_columns)
            .field("num_slots", &self.num_slots)
            .field("project_input", &self.project_input)
            .finish()
    }
}
