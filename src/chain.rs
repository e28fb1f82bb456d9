//! # Expression Chains
//!
//! A chain sequences several expression programs with cardinality-changing
//! barriers (array join, join) between them. Finalization walks the steps
//! right to left so every step learns which of its columns the next step
//! still needs, prunes the rest, and then a left-to-right pass inserts
//! input projection wherever a step receives more columns than it consumes.
//!
//! Step kinds are a closed sum: expression steps wrap a DAG (built lazily
//! into a program), array-join steps wrap an [`ArrayJoinOperator`], and
//! join steps wrap a [`JoinDescriptor`] plus an executor supplied by the
//! join subsystem.

use std::sync::Arc;

use hashbrown::HashSet;
use tracing::debug;

use crate::block::{Block, ColumnWithTypeAndName, NameAndType};
use crate::dag::ActionsDag;
use crate::error::{ExprError, Result};
use crate::program::ExpressionProgram;
use crate::types::{Column, DataType, Offsets};

/// Multi-column array unnest used between chain stages. All joined columns
/// must hold arrays with identical offsets; every other column is
/// replicated row-wise.
#[derive(Debug, Clone)]
pub struct ArrayJoinOperator {
    columns: HashSet<String>,
}

impl ArrayJoinOperator {
    pub fn new(columns: HashSet<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &HashSet<String> {
        &self.columns
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Unnests the joined columns in place. Arrays that are empty on every
    /// row produce a zero-row block.
    pub fn execute(&self, block: &mut Block) -> Result<()> {
        let mut shared_offsets: Option<Offsets> = None;
        let mut unnested: Vec<(String, Column, DataType)> = Vec::new();

        for cwt in block.columns() {
            if !self.columns.contains(&cwt.name) {
                continue;
            }
            let column = cwt
                .column
                .as_ref()
                .ok_or_else(|| {
                    ExprError::logical(format!("ARRAY JOIN column {} has no data", cwt.name))
                })?
                .convert_to_full_column_if_const()?;
            let (offsets, values, element) = column.as_array().ok_or_else(|| {
                eyre::Report::new(ExprError::TypeMismatch(format!(
                    "ARRAY JOIN of not array: {}",
                    cwt.name
                )))
            })?;

            match &shared_offsets {
                None => shared_offsets = Some(offsets.clone()),
                Some(existing) => {
                    if existing != offsets {
                        return Err(eyre::Report::new(ExprError::TypeMismatch(format!(
                            "sizes of ARRAY JOINed arrays do not match for {}",
                            cwt.name
                        ))));
                    }
                }
            }
            unnested.push((cwt.name.clone(), Column::Full(values.clone()), element.clone()));
        }

        let offsets = shared_offsets
            .ok_or_else(|| ExprError::logical("no columns in block to ARRAY JOIN"))?;

        for cwt in block.columns_mut() {
            if let Some(pos) = unnested.iter().position(|(name, _, _)| name == &cwt.name) {
                let (_, flat, element) = unnested.swap_remove(pos);
                cwt.column = Some(flat);
                cwt.data_type = element;
            } else if let Some(column) = &cwt.column {
                cwt.column = Some(column.replicate(&offsets)?);
            }
        }
        Ok(())
    }
}

/// Structural description of a join: what it matches on and what it adds.
/// Equality is structural, which is what a compiled-plan cache compares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinDescriptor {
    pub key_names_left: Vec<String>,
    pub columns_added_by_join: Vec<NameAndType>,
}

/// The executable side of a join, supplied by the join subsystem.
pub trait JoinExecutor: Send + Sync {
    fn join_block(&self, block: &mut Block) -> Result<()>;
}

/// A chain step wrapping an expression DAG; the DAG is built into a
/// program once the chain is finalized.
pub struct ExpressionStep {
    dag: Option<ActionsDag>,
    program: Option<Arc<ExpressionProgram>>,
    project_input_pending: bool,
    pub required_output: Vec<String>,
    pub can_remove_required_output: Vec<bool>,
    pub additional_input: HashSet<String>,
}

impl ExpressionStep {
    pub fn new(dag: ActionsDag) -> Self {
        Self {
            dag: Some(dag),
            program: None,
            project_input_pending: false,
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        }
    }

    /// Declares a column this step must still expose after finalization.
    pub fn add_required_output(&mut self, name: impl Into<String>) {
        self.required_output.push(name.into());
        self.can_remove_required_output.push(true);
    }

    pub fn dag_mut(&mut self) -> Result<&mut ActionsDag> {
        self.dag
            .as_mut()
            .ok_or_else(|| ExprError::logical("expression step was already built"))
    }

    /// Builds (once) and returns the program.
    pub fn build_program(&mut self) -> Result<Arc<ExpressionProgram>> {
        if self.program.is_none() {
            let dag = self
                .dag
                .take()
                .ok_or_else(|| ExprError::logical("expression step has no dag to build"))?;
            let mut program = dag.build_expressions()?;
            if self.project_input_pending {
                program.prepend_project_input();
            }
            self.program = Some(Arc::new(program));
        }
        Ok(self.program.clone().expect("just built"))
    }

    fn required_columns(&self) -> Vec<NameAndType> {
        match (&self.dag, &self.program) {
            (Some(dag), _) => dag.inputs(),
            (None, Some(program)) => program.required_columns().to_vec(),
            (None, None) => Vec::new(),
        }
    }

    fn result_columns(&self) -> Vec<ColumnWithTypeAndName> {
        match (&self.dag, &self.program) {
            (Some(dag), _) => dag.result_columns(),
            (None, Some(program)) => program.sample_block().columns().to_vec(),
            (None, None) => Vec::new(),
        }
    }

    fn finalize(&mut self, required_output: &[String]) -> Result<()> {
        if let Some(dag) = &mut self.dag {
            let names: Vec<&str> = required_output.iter().map(String::as_str).collect();
            dag.remove_unused_actions(&names)?;
        }
        Ok(())
    }
}

/// A chain step that unnests a fixed set of array columns.
pub struct ArrayJoinStep {
    array_join: Arc<ArrayJoinOperator>,
    required_columns: Vec<NameAndType>,
    result_columns: Vec<ColumnWithTypeAndName>,
    pub required_output: Vec<String>,
    pub can_remove_required_output: Vec<bool>,
    pub additional_input: HashSet<String>,
}

impl ArrayJoinStep {
    /// `input_columns` is the schema arriving from the previous step;
    /// joined columns switch to their element type and lose any constant
    /// payload, since arrays are materialized by the join.
    pub fn new(
        array_join: Arc<ArrayJoinOperator>,
        input_columns: Vec<ColumnWithTypeAndName>,
    ) -> Result<Self> {
        let mut required_columns = Vec::with_capacity(input_columns.len());
        let mut result_columns = Vec::with_capacity(input_columns.len());

        for mut column in input_columns {
            required_columns.push(NameAndType::new(column.name.clone(), column.data_type.clone()));

            if array_join.contains(&column.name) {
                let element = column.data_type.element().cloned().ok_or_else(|| {
                    eyre::Report::new(ExprError::TypeMismatch(format!(
                        "ARRAY JOIN requires an array argument, {} is {}",
                        column.name,
                        column.data_type.name()
                    )))
                })?;
                column.data_type = element;
                column.column = None;
            }
            result_columns.push(column);
        }

        Ok(Self {
            array_join,
            required_columns,
            result_columns,
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        })
    }

    pub fn operator(&self) -> &Arc<ArrayJoinOperator> {
        &self.array_join
    }

    fn finalize(&mut self, required_output: &[String]) {
        let names: HashSet<&str> = required_output.iter().map(String::as_str).collect();
        let array_join = Arc::clone(&self.array_join);

        self.result_columns
            .retain(|column| array_join.contains(&column.name) || names.contains(column.name.as_str()));
        self.required_columns
            .retain(|column| array_join.contains(&column.name) || names.contains(column.name.as_str()));
    }
}

/// A chain step that runs a join; the joined columns appear in its result.
pub struct JoinStep {
    descriptor: Arc<JoinDescriptor>,
    join: Arc<dyn JoinExecutor>,
    required_columns: Vec<NameAndType>,
    result_columns: Vec<ColumnWithTypeAndName>,
    pub required_output: Vec<String>,
    pub can_remove_required_output: Vec<bool>,
    pub additional_input: HashSet<String>,
}

impl JoinStep {
    pub fn new(
        descriptor: Arc<JoinDescriptor>,
        join: Arc<dyn JoinExecutor>,
        input_columns: Vec<ColumnWithTypeAndName>,
    ) -> Self {
        let mut required_columns = Vec::with_capacity(input_columns.len());
        let mut result_columns = input_columns;

        for column in &result_columns {
            required_columns.push(NameAndType::new(column.name.clone(), column.data_type.clone()));
        }
        for added in &descriptor.columns_added_by_join {
            result_columns.push(ColumnWithTypeAndName::schema(
                added.data_type.clone(),
                added.name.clone(),
            ));
        }

        Self {
            descriptor,
            join,
            required_columns,
            result_columns,
            required_output: Vec::new(),
            can_remove_required_output: Vec::new(),
            additional_input: HashSet::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<JoinDescriptor> {
        &self.descriptor
    }

    pub fn executor(&self) -> &Arc<dyn JoinExecutor> {
        &self.join
    }

    fn finalize(&mut self, required_output: &[String]) {
        // Join keys stay required even when nothing downstream reads them.
        let mut required_names: HashSet<String> =
            required_output.iter().cloned().collect();
        for key in &self.descriptor.key_names_left {
            required_names.insert(key.clone());
        }

        self.required_columns
            .retain(|column| required_names.contains(&column.name));

        for added in &self.descriptor.columns_added_by_join {
            required_names.insert(added.name.clone());
        }
        self.result_columns
            .retain(|column| required_names.contains(&column.name));
    }
}

/// The closed set of chain step kinds.
pub enum ChainStep {
    Expression(ExpressionStep),
    ArrayJoin(ArrayJoinStep),
    Join(JoinStep),
}

impl ChainStep {
    pub fn required_columns(&self) -> Vec<NameAndType> {
        match self {
            ChainStep::Expression(step) => step.required_columns(),
            ChainStep::ArrayJoin(step) => step.required_columns.clone(),
            ChainStep::Join(step) => step.required_columns.clone(),
        }
    }

    pub fn result_columns(&self) -> Vec<ColumnWithTypeAndName> {
        match self {
            ChainStep::Expression(step) => step.result_columns(),
            ChainStep::ArrayJoin(step) => step.result_columns.clone(),
            ChainStep::Join(step) => step.result_columns.clone(),
        }
    }

    pub fn required_output(&self) -> &[String] {
        match self {
            ChainStep::Expression(step) => &step.required_output,
            ChainStep::ArrayJoin(step) => &step.required_output,
            ChainStep::Join(step) => &step.required_output,
        }
    }

    pub fn additional_input(&self) -> &HashSet<String> {
        match self {
            ChainStep::Expression(step) => &step.additional_input,
            ChainStep::ArrayJoin(step) => &step.additional_input,
            ChainStep::Join(step) => &step.additional_input,
        }
    }

    fn can_remove_required_output_mut(&mut self) -> &mut Vec<bool> {
        match self {
            ChainStep::Expression(step) => &mut step.can_remove_required_output,
            ChainStep::ArrayJoin(step) => &mut step.can_remove_required_output,
            ChainStep::Join(step) => &mut step.can_remove_required_output,
        }
    }

    fn finalize(&mut self, required_output: &[String]) -> Result<()> {
        match self {
            ChainStep::Expression(step) => step.finalize(required_output)?,
            ChainStep::ArrayJoin(step) => step.finalize(required_output),
            ChainStep::Join(step) => step.finalize(required_output),
        }
        Ok(())
    }

    fn prepend_project_input(&mut self) {
        if let ChainStep::Expression(step) = self {
            step.project_input_pending = true;
            // Normally the program is not built yet and the flag is applied
            // at build time; patch an already-built, still-unshared one.
            if let Some(program) = step.program.take() {
                step.program = Some(match Arc::try_unwrap(program) {
                    Ok(mut owned) => {
                        owned.prepend_project_input();
                        Arc::new(owned)
                    }
                    Err(shared) => shared,
                });
            }
        }
    }

    fn dump(&self) -> String {
        match self {
            ChainStep::Expression(step) => match (&step.dag, &step.program) {
                (Some(dag), _) => format!("expression dag: {}", dag.dump_names()),
                (None, Some(program)) => program.dump_actions(),
                (None, None) => "empty expression step".to_string(),
            },
            ChainStep::ArrayJoin(step) => {
                let mut names: Vec<&str> = step
                    .array_join
                    .columns()
                    .iter()
                    .map(String::as_str)
                    .collect();
                names.sort_unstable();
                format!("array join: {}", names.join(", "))
            }
            ChainStep::Join(step) => {
                format!("join keys: {}", step.descriptor.key_names_left.join(", "))
            }
        }
    }
}

/// An ordered list of steps with dependency-aware pruning across their
/// boundaries.
#[derive(Default)]
pub struct ExpressionChain {
    pub steps: Vec<ChainStep>,
}

impl ExpressionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn push_step(&mut self, step: ChainStep) {
        self.steps.push(step);
    }

    pub fn last_step_mut(&mut self) -> Result<&mut ChainStep> {
        self.steps
            .last_mut()
            .ok_or_else(|| ExprError::logical("expression chain is empty"))
    }

    /// Opens a new expression step over the previous step's result
    /// columns. Programs are built on demand after `finalize`, so the
    /// previous step's DAG stays prunable until then; its result schema
    /// (constants included) is visible without building.
    pub fn add_step(&mut self) -> Result<&mut ExpressionStep> {
        if self.steps.is_empty() {
            return Err(ExprError::logical(
                "cannot add a step to an empty expression chain",
            ));
        }

        let columns = self.steps.last().expect("checked non-empty").result_columns();
        let dag = ActionsDag::with_input_columns(columns)?;
        self.steps.push(ChainStep::Expression(ExpressionStep::new(dag)));

        match self.steps.last_mut() {
            Some(ChainStep::Expression(step)) => Ok(step),
            _ => unreachable!("just pushed an expression step"),
        }
    }

    /// Two-pass finalization; idempotent.
    ///
    /// Right to left: each step's required output is extended with every
    /// column the next step needs that is not part of the next step's
    /// additional input; columns the step had already declared get their
    /// remove flag forced off. Left to right: a step that consumes strictly
    /// fewer columns than the previous step produces gets an input
    /// projection prepended, unless it produces no columns at all (that
    /// projection would erase the row-count witness).
    pub fn finalize(&mut self) -> Result<()> {
        for i in (0..self.steps.len()).rev() {
            let mut required_output: Vec<String> = self.steps[i].required_output().to_vec();
            let mut positions: hashbrown::HashMap<&str, usize> = hashbrown::HashMap::new();
            for (j, name) in required_output.iter().enumerate() {
                positions.insert(name.as_str(), j);
            }

            let mut forced_keep: Vec<usize> = Vec::new();
            let mut appended: Vec<String> = Vec::new();
            if i + 1 < self.steps.len() {
                let additional_input = self.steps[i + 1].additional_input().clone();
                for column in self.steps[i + 1].required_columns() {
                    if additional_input.contains(&column.name) {
                        continue;
                    }
                    match positions.get(column.name.as_str()) {
                        None => appended.push(column.name),
                        Some(&j) => forced_keep.push(j),
                    }
                }
            }
            drop(positions);
            required_output.extend(appended);

            let can_remove = self.steps[i].can_remove_required_output_mut();
            if !can_remove.is_empty() {
                for j in forced_keep {
                    can_remove[j] = false;
                }
            }

            self.steps[i].finalize(&required_output)?;
        }

        for i in 1..self.steps.len() {
            let columns_from_previous = self.steps[i - 1].result_columns().len();
            if !self.steps[i].result_columns().is_empty()
                && columns_from_previous > self.steps[i].required_columns().len()
            {
                self.steps[i].prepend_project_input();
            }
        }

        debug!(steps = self.steps.len(), "finalized expression chain");
        Ok(())
    }

    pub fn dump_chain(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("step {}\n", i));
            out.push_str("required output:\n");
            for name in step.required_output() {
                out.push_str(name);
                out.push('\n');
            }
            out.push('\n');
            out.push_str(&step.dump());
            out.push_str("\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::types::Value;

    fn input_block_columns() -> Vec<ColumnWithTypeAndName> {
        vec![
            ColumnWithTypeAndName::schema(DataType::Int4, "a"),
            ColumnWithTypeAndName::schema(DataType::Text, "s"),
        ]
    }

    fn first_step(registry: &FunctionRegistry) -> ExpressionStep {
        let mut dag = ActionsDag::with_input_columns(input_block_columns()).unwrap();
        dag.add_function(&*registry.get("negate").unwrap(), &["a"], Some("neg"))
            .unwrap();
        dag.add_function(&*registry.get("upper").unwrap(), &["s"], Some("u"))
            .unwrap();
        ExpressionStep::new(dag)
    }

    #[test]
    fn finalize_propagates_needs_right_to_left() {
        let registry = FunctionRegistry::with_builtins();
        let mut chain = ExpressionChain::new();

        let mut step = first_step(&registry);
        step.add_required_output("neg");
        chain.push_step(ChainStep::Expression(step));

        // Second step only consumes the uppercased column.
        let next = chain.add_step().unwrap();
        let dag = next.dag_mut().unwrap();
        dag.add_function(&*registry.get("lower").unwrap(), &["u"], Some("l"))
            .unwrap();
        next.add_required_output("l");

        // Pruning the second step to {l} leaves inputs {u}; the first step
        // must then keep u in addition to its own neg.
        chain.finalize().unwrap();

        let first_results: Vec<String> = chain.steps[0]
            .result_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(first_results.contains(&"neg".to_string()));
        assert!(first_results.contains(&"u".to_string()));
        assert!(!first_results.contains(&"l".to_string()));
    }

    #[test]
    fn finalize_is_idempotent() {
        let registry = FunctionRegistry::with_builtins();
        let mut chain = ExpressionChain::new();

        let mut step = first_step(&registry);
        step.add_required_output("neg");
        step.add_required_output("u");
        chain.push_step(ChainStep::Expression(step));

        chain.finalize().unwrap();
        let once: Vec<String> = chain.steps[0]
            .result_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();

        chain.finalize().unwrap();
        let twice: Vec<String> = chain.steps[0]
            .result_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();

        assert_eq!(once, twice);
    }

    #[test]
    fn array_join_step_unnests_result_types() {
        let operator = Arc::new(ArrayJoinOperator::new(
            ["arr".to_string()].into_iter().collect(),
        ));
        let columns = vec![
            ColumnWithTypeAndName::schema(DataType::array(DataType::Int4), "arr"),
            ColumnWithTypeAndName::schema(DataType::Text, "tag"),
        ];
        let step = ArrayJoinStep::new(operator, columns).unwrap();

        let arr = step
            .result_columns
            .iter()
            .find(|c| c.name == "arr")
            .unwrap();
        assert_eq!(arr.data_type, DataType::Int4);
        // Required side still expects the array form.
        let required = step
            .required_columns
            .iter()
            .find(|c| c.name == "arr")
            .unwrap();
        assert_eq!(required.data_type, DataType::array(DataType::Int4));
    }

    #[test]
    fn array_join_step_finalize_keeps_joined_columns() {
        let operator = Arc::new(ArrayJoinOperator::new(
            ["arr".to_string()].into_iter().collect(),
        ));
        let columns = vec![
            ColumnWithTypeAndName::schema(DataType::array(DataType::Int4), "arr"),
            ColumnWithTypeAndName::schema(DataType::Text, "tag"),
            ColumnWithTypeAndName::schema(DataType::Int8, "unused"),
        ];
        let mut step = ArrayJoinStep::new(operator, columns).unwrap();
        step.finalize(&["tag".to_string()]);

        let names: Vec<&str> = step
            .result_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["arr", "tag"]);
    }

    #[test]
    fn array_join_operator_execute() {
        let operator = ArrayJoinOperator::new(["arr".to_string()].into_iter().collect());
        let mut block = Block::new(vec![
            ColumnWithTypeAndName::new(
                Some(
                    Column::array(
                        DataType::Int4,
                        vec![
                            vec![Value::Int4(1), Value::Int4(2)],
                            vec![],
                            vec![Value::Int4(3)],
                        ],
                    )
                    .unwrap(),
                ),
                DataType::array(DataType::Int4),
                "arr",
            ),
            ColumnWithTypeAndName::new(
                Some(Column::text(vec!["x", "y", "z"])),
                DataType::Text,
                "tag",
            ),
        ]);

        operator.execute(&mut block).unwrap();
        assert_eq!(block.rows(), 3);
        let arr = block.by_name("arr").unwrap();
        assert_eq!(arr.data_type, DataType::Int4);
        assert_eq!(
            arr.column.as_ref().unwrap().value_at(2).unwrap(),
            Value::Int4(3)
        );
        let tag = block.by_name("tag").unwrap().column.as_ref().unwrap();
        assert_eq!(tag.value_at(0).unwrap(), Value::Text("x".into()));
        assert_eq!(tag.value_at(1).unwrap(), Value::Text("x".into()));
        assert_eq!(tag.value_at(2).unwrap(), Value::Text("z".into()));
    }

    #[test]
    fn join_step_finalize_keeps_keys_and_added_columns() {
        struct NopJoin;
        impl JoinExecutor for NopJoin {
            fn join_block(&self, _block: &mut Block) -> Result<()> {
                Ok(())
            }
        }

        let descriptor = Arc::new(JoinDescriptor {
            key_names_left: vec!["k".to_string()],
            columns_added_by_join: vec![NameAndType::new("joined", DataType::Text)],
        });
        let columns = vec![
            ColumnWithTypeAndName::schema(DataType::Int4, "k"),
            ColumnWithTypeAndName::schema(DataType::Int4, "dropme"),
        ];
        let mut step = JoinStep::new(descriptor, Arc::new(NopJoin), columns);

        assert!(step.result_columns.iter().any(|c| c.name == "joined"));

        step.finalize(&[]);
        let required: Vec<&str> = step
            .required_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(required, vec!["k"]);
        assert!(step.result_columns.iter().any(|c| c.name == "joined"));
        assert!(!step.result_columns.iter().any(|c| c.name == "dropme"));
    }

    #[test]
    fn project_input_is_prepended_for_narrowing_steps() {
        let registry = FunctionRegistry::with_builtins();
        let mut chain = ExpressionChain::new();

        let mut step = first_step(&registry);
        step.add_required_output("neg");
        step.add_required_output("u");
        chain.push_step(ChainStep::Expression(step));

        let next = chain.add_step().unwrap();
        let dag = next.dag_mut().unwrap();
        dag.add_function(&*registry.get("lower").unwrap(), &["u"], Some("l"))
            .unwrap();
        next.add_required_output("l");

        chain.finalize().unwrap();

        // First step produces {neg, u} (plus surviving inputs); the second
        // consumes only {u}, so it projects its input.
        match &mut chain.steps[1] {
            ChainStep::Expression(step) => {
                let program = step.build_program().unwrap();
                assert!(program.projects_input());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn add_step_requires_a_chain() {
        let mut chain = ExpressionChain::new();
        assert!(chain.add_step().is_err());
    }
}
