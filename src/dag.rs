//! # Expression DAG
//!
//! [`ActionsDag`] holds expression nodes in an arena (`Vec<Node>` addressed
//! by [`NodeId`]) with a name index on top. Five builders add nodes: inputs,
//! standalone columns, aliases, array joins, and function applications.
//! Function application performs constant folding when every argument is a
//! materialized constant.
//!
//! ## Name Replacement
//!
//! Only one node per name is live. Re-adding a name with `can_replace` set
//! rewires the index to the new node and points the displaced node's
//! `renaming_parent` at its replacement. A node with `renaming_parent` set
//! is dead for output purposes but is kept while a live node still consumes
//! it, preserving lineage. The arena representation keeps these back-links
//! as plain ids, so there is no ownership cycle to break.
//!
//! ## Lifecycle
//!
//! Nodes are immutable after insertion apart from `renaming_parent`
//! rewiring and the `column` payload attached during folding.
//! [`ActionsDag::build_expressions`] (in the `program` module) consumes the
//! DAG, moving the arena into the linearized program.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

use crate::block::{ColumnWithTypeAndName, NameAndType};
use crate::cache::CompiledExpressionCache;
use crate::error::{ExprError, Result};
use crate::functions::{FunctionBase, FunctionResolver, PreparedFunction};
use crate::settings::ExecutionSettings;
use crate::types::{Column, DataType};

/// Arena index of a node.
pub type NodeId = usize;

/// The closed set of node kinds. New kinds require linearizer support, so
/// this is deliberately an enum rather than an open trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A column taken from the input block.
    Input,
    /// A column carried by the DAG itself, independent of the input.
    Column,
    /// A rename of an existing node.
    Alias,
    /// A function application.
    Function,
    /// Unnest of an array column; changes row cardinality.
    ArrayJoin,
}

/// One expression node. Fields are fixed at construction; see the module
/// docs for the two exceptions.
#[derive(Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub result_name: String,
    pub result_type: DataType,
    /// Materialized value: set for COLUMN nodes and for folded constants.
    pub column: Option<Column>,
    pub children: SmallVec<[NodeId; 2]>,
    pub function_base: Option<Arc<dyn FunctionBase>>,
    pub function: Option<Arc<dyn PreparedFunction>>,
    /// Conjunctive over children; cleared by always-constant functions.
    pub allow_constant_folding: bool,
    pub is_function_compiled: bool,
    /// Set when a later node took over this node's name.
    pub renaming_parent: Option<NodeId>,
}

impl Node {
    fn new(kind: NodeKind, result_name: String, result_type: DataType) -> Self {
        Self {
            kind,
            result_name,
            result_type,
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

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("result_name", &self.result_name)
            .field("result_type", &self.result_type.name())
            .field("children", &self.children)
            .field("has_column", &self.column.is_some())
            .field("renaming_parent", &self.renaming_parent)
            .finish()
    }
}

/// DAG of expression nodes with a live-name index.
#[derive(Default)]
pub struct ActionsDag {
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: HashMap<String, NodeId>,
    pub(crate) settings: ExecutionSettings,
    pub(crate) compilation_cache: Option<Arc<CompiledExpressionCache>>,
}

impl ActionsDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a DAG whose inputs are the given schema.
    pub fn with_inputs(inputs: &[NameAndType]) -> Result<Self> {
        let mut dag = Self::new();
        for input in inputs {
            dag.add_input(&input.name, input.data_type.clone())?;
        }
        Ok(dag)
    }

    /// Builds a DAG whose inputs are the given columns, keeping any
    /// constant payloads so folding can see through them.
    pub fn with_input_columns(inputs: Vec<ColumnWithTypeAndName>) -> Result<Self> {
        let mut dag = Self::new();
        for input in inputs {
            dag.add_input_column(input)?;
        }
        Ok(dag)
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_compilation_cache(mut self, cache: Arc<CompiledExpressionCache>) -> Self {
        self.compilation_cache = Some(cache);
        self
    }

    pub fn settings(&self) -> ExecutionSettings {
        self.settings
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Id of the live node with this name.
    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| eyre::Report::new(ExprError::UnknownIdentifier(name.to_string())))
    }

    fn add_node(&mut self, node: Node, can_replace: bool) -> Result<NodeId> {
        let displaced = self.index.get(node.result_name.as_str()).copied();
        if displaced.is_some() && !can_replace {
            return Err(eyre::Report::new(ExprError::DuplicateColumn(
                node.result_name.clone(),
            )));
        }

        let id = self.nodes.len();
        let name = node.result_name.clone();
        self.nodes.push(node);

        if let Some(old) = displaced {
            self.nodes[old].renaming_parent = Some(id);
        }
        self.index.insert(name, id);
        Ok(id)
    }

    /// Adds an INPUT node: a column the program will require from the block.
    pub fn add_input(&mut self, name: &str, data_type: DataType) -> Result<NodeId> {
        let node = Node::new(NodeKind::Input, name.to_string(), data_type);
        self.add_node(node, false)
    }

    /// Adds an INPUT node carrying a sample column (e.g. a constant from an
    /// upstream stage).
    pub fn add_input_column(&mut self, column: ColumnWithTypeAndName) -> Result<NodeId> {
        let mut node = Node::new(NodeKind::Input, column.name, column.data_type);
        node.column = column.column;
        self.add_node(node, false)
    }

    /// Adds a COLUMN node: a source of values independent of the input
    /// block. The payload must be present.
    pub fn add_column(&mut self, column: ColumnWithTypeAndName) -> Result<NodeId> {
        if column.column.is_none() {
            return Err(ExprError::logical(format!(
                "cannot add column {} because it has no data",
                column.name
            )));
        }
        let mut node = Node::new(NodeKind::Column, column.name, column.data_type);
        node.column = column.column;
        self.add_node(node, false)
    }

    /// Adds an ALIAS over an existing node. With `can_replace`, an existing
    /// holder of `alias` is displaced via `renaming_parent`.
    pub fn add_alias(&mut self, name: &str, alias: &str, can_replace: bool) -> Result<NodeId> {
        let child_id = self.node_id(name)?;
        let child = &self.nodes[child_id];

        let mut node = Node::new(
            NodeKind::Alias,
            alias.to_string(),
            child.result_type.clone(),
        );
        node.column = child.column.clone();
        node.allow_constant_folding = child.allow_constant_folding;
        node.children.push(child_id);

        self.add_node(node, can_replace)
    }

    /// Adds an ARRAY JOIN node unnesting `source_name` into `result_name`.
    pub fn add_array_join(&mut self, source_name: &str, result_name: &str) -> Result<NodeId> {
        let child_id = self.node_id(source_name)?;
        let child = &self.nodes[child_id];

        let element = child.result_type.element().cloned().ok_or_else(|| {
            eyre::Report::new(ExprError::TypeMismatch(format!(
                "ARRAY JOIN requires an array argument, {} is {}",
                source_name,
                child.result_type.name()
            )))
        })?;

        let mut node = Node::new(NodeKind::ArrayJoin, result_name.to_string(), element);
        node.children.push(child_id);
        self.add_node(node, false)
    }

    /// Resolves `resolver` against the named arguments, adds a FUNCTION
    /// node, and folds it to a constant when possible.
    ///
    /// With no `result_name`, the name is synthesized as
    /// `fn(arg1, arg2, …)`, canonicalizing shared subexpressions.
    pub fn add_function(
        &mut self,
        resolver: &dyn FunctionResolver,
        argument_names: &[&str],
        result_name: Option<&str>,
    ) -> Result<NodeId> {
        let mut children: SmallVec<[NodeId; 2]> = SmallVec::with_capacity(argument_names.len());
        let mut arguments = Vec::with_capacity(argument_names.len());
        let mut allow_constant_folding = true;
        let mut all_const = true;

        for name in argument_names {
            let child_id = self.node_id(name)?;
            let child = &self.nodes[child_id];
            children.push(child_id);
            allow_constant_folding = allow_constant_folding && child.allow_constant_folding;

            let argument = ColumnWithTypeAndName::new(
                child.column.clone(),
                child.result_type.clone(),
                child.result_name.clone(),
            );
            if !argument.column.as_ref().is_some_and(Column::is_const) {
                all_const = false;
            }
            arguments.push(argument);
        }

        let function_base = resolver.build(&arguments)?;
        let result_type = function_base.result_type().clone();
        let mut function = function_base.prepare(&arguments);
        let mut is_function_compiled = false;

        if self.settings.compile_expressions {
            if let Some(cache) = &self.compilation_cache {
                let fingerprint = compiled_fingerprint(&*function_base, &arguments);
                if let Some(hit) = cache.get(fingerprint) {
                    function = hit;
                    is_function_compiled = true;
                } else {
                    cache.insert(fingerprint, function.clone());
                }
            }
        }

        // Fold when every argument is a materialized constant. A cached
        // compiled body may outlive this query, so non-deterministic
        // functions are left unfolded when compilation is on.
        let mut column = None;
        if all_const
            && allow_constant_folding
            && function_base.is_suitable_for_constant_folding()
            && (!self.settings.compile_expressions || function_base.is_deterministic())
        {
            let fold_rows = arguments
                .first()
                .and_then(|a| a.column.as_ref())
                .map_or(0, Column::len);
            let folded = function.execute(&arguments, &result_type, fold_rows, true)?;

            // A non-constant result means the fold is off the table.
            if folded.is_const() {
                // Literal columns enter the DAG with one row; a call with no
                // argument rows would otherwise produce an empty constant.
                let folded = if folded.is_empty() {
                    folded.clone_resized(1)?
                } else {
                    folded
                };
                debug!(function = function_base.name(), "folded to a constant");
                column = Some(folded);
            }
        }

        // Functions like ignore() return a constant no matter the argument
        // values. Record the constant in the sample but stop folding from
        // propagating through it.
        if column.is_none() && function_base.is_suitable_for_constant_folding() {
            if let Some(constant) =
                function_base.result_if_always_returns_constant_and_has_arguments(&arguments)
            {
                column = Some(constant);
                allow_constant_folding = false;
            }
        }

        let result_name = match result_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let mut synthesized = format!("{}(", function_base.name());
                for (i, name) in argument_names.iter().enumerate() {
                    if i > 0 {
                        synthesized.push_str(", ");
                    }
                    synthesized.push_str(name);
                }
                synthesized.push(')');
                synthesized
            }
        };

        let mut node = Node::new(NodeKind::Function, result_name, result_type);
        node.children = children;
        node.column = column;
        node.function_base = Some(function_base);
        node.function = Some(function);
        node.allow_constant_folding = allow_constant_folding;
        node.is_function_compiled = is_function_compiled;

        self.add_node(node, false)
    }

    /// The live output columns: every node not displaced by a rename.
    pub fn result_columns(&self) -> Vec<ColumnWithTypeAndName> {
        self.nodes
            .iter()
            .filter(|node| node.renaming_parent.is_none())
            .map(|node| {
                ColumnWithTypeAndName::new(
                    node.column.clone(),
                    node.result_type.clone(),
                    node.result_name.clone(),
                )
            })
            .collect()
    }

    pub fn names_and_types(&self) -> Vec<NameAndType> {
        self.nodes
            .iter()
            .filter(|node| node.renaming_parent.is_none())
            .map(|node| NameAndType::new(node.result_name.clone(), node.result_type.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.renaming_parent.is_none())
            .map(|node| node.result_name.clone())
            .collect()
    }

    /// Schema of the INPUT nodes, in arena order.
    pub fn inputs(&self) -> Vec<NameAndType> {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Input)
            .map(|node| NameAndType::new(node.result_name.clone(), node.result_type.clone()))
            .collect()
    }

    /// Every node name in arena order, for diagnostics.
    pub fn dump_names(&self) -> String {
        self.nodes
            .iter()
            .map(|node| node.result_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Keeps only nodes reachable from `required_names`, compacting the
    /// arena and rebuilding the index. `renaming_parent` links into pruned
    /// nodes are cleared.
    pub fn remove_unused_actions(&mut self, required_names: &[&str]) -> Result<()> {
        let mut new_index: HashMap<String, NodeId> = HashMap::new();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = Vec::new();

        for &name in required_names {
            let id = self.index.get(name).copied().ok_or_else(|| {
                eyre::Report::new(ExprError::UnknownIdentifier(format!(
                    "{}, there are only columns {}",
                    name,
                    self.dump_names()
                )))
            })?;
            new_index.insert(name.to_string(), id);
            if !visited[id] {
                visited[id] = true;
                stack.push(id);
            }
        }
        self.index = new_index;

        while let Some(id) = stack.pop() {
            for &child in &self.nodes[id].children {
                if !visited[child] {
                    visited[child] = true;
                    stack.push(child);
                }
            }
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut kept = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.drain(..).enumerate() {
            if visited[id] {
                remap[id] = kept.len();
                kept.push(node);
            }
        }

        let pruned = visited.len() - kept.len();
        for node in &mut kept {
            for child in node.children.iter_mut() {
                *child = remap[*child];
            }
            node.renaming_parent = node
                .renaming_parent
                .filter(|&parent| remap[parent] != usize::MAX)
                .map(|parent| remap[parent]);
        }
        for id in self.index.values_mut() {
            *id = remap[*id];
        }
        self.nodes = kept;

        debug!(pruned, remaining = self.nodes.len(), "removed unused actions");
        Ok(())
    }
}

impl fmt::Debug for ActionsDag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionsDag")
            .field("nodes", &self.nodes)
            .field("live", &self.index.len())
            .finish()
    }
}

/// Cache key for a compiled function body: the function identity plus its
/// argument schema. Collisions only cost a wrong "compiled" reuse of a
/// semantically identical signature, which equality checks still guard.
fn compiled_fingerprint(base: &dyn FunctionBase, args: &[ColumnWithTypeAndName]) -> u128 {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(base.name().as_bytes());
    for data_type in base.argument_types() {
        buffer.push(0);
        buffer.extend_from_slice(data_type.name().as_bytes());
    }
    for arg in args {
        buffer.push(1);
        buffer.extend_from_slice(arg.name.as_bytes());
    }
    xxh3_128(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::types::Value;

    fn literal(value: i32, name: &str) -> ColumnWithTypeAndName {
        ColumnWithTypeAndName::new(
            Some(Column::constant(Value::Int4(value), &DataType::Int4, 1).unwrap()),
            DataType::Int4,
            name,
        )
    }

    #[test]
    fn duplicate_input_is_rejected() {
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        let err = dag.add_input("x", DataType::Int4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExprError>(),
            Some(ExprError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn unknown_identifier_in_alias() {
        let mut dag = ActionsDag::new();
        let err = dag.add_alias("missing", "m", false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExprError>(),
            Some(ExprError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn alias_copies_type_and_constant() {
        let mut dag = ActionsDag::new();
        dag.add_column(literal(5, "lit")).unwrap();
        let id = dag.add_alias("lit", "renamed", false).unwrap();
        let node = dag.node(id);
        assert_eq!(node.kind, NodeKind::Alias);
        assert_eq!(node.result_type, DataType::Int4);
        assert!(node.column.is_some());
    }

    #[test]
    fn replacement_sets_renaming_parent() {
        let mut dag = ActionsDag::new();
        let first = dag.add_input("a", DataType::Int4).unwrap();
        dag.add_column(literal(1, "b")).unwrap();
        let second = dag.add_alias("b", "a", true).unwrap();

        assert_eq!(dag.node(first).renaming_parent, Some(second));
        assert_eq!(dag.node_id("a").unwrap(), second);
        // The displaced node is no longer part of the results.
        let names: Vec<_> = dag
            .result_columns()
            .into_iter()
            .map(|cwt| cwt.name)
            .collect();
        assert_eq!(names.iter().filter(|n| *n == "a").count(), 1);
    }

    #[test]
    fn array_join_requires_array() {
        let mut dag = ActionsDag::new();
        dag.add_input("n", DataType::Int4).unwrap();
        let err = dag.add_array_join("n", "e").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExprError>(),
            Some(ExprError::TypeMismatch(_))
        ));

        dag.add_input("arr", DataType::array(DataType::Text)).unwrap();
        let id = dag.add_array_join("arr", "e").unwrap();
        assert_eq!(dag.node(id).result_type, DataType::Text);
    }

    #[test]
    fn function_with_input_stays_unfolded() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        dag.add_column(literal(1, "lit")).unwrap();
        let id = dag
            .add_function(&*registry.get("plus").unwrap(), &["x", "lit"], Some("y"))
            .unwrap();
        assert!(dag.node(id).column.is_none());
        assert_eq!(dag.node(id).result_type, DataType::Int4);
    }

    #[test]
    fn function_over_constants_folds() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_column(literal(10, "a")).unwrap();
        dag.add_column(literal(1, "b")).unwrap();
        let id = dag
            .add_function(&*registry.get("plus").unwrap(), &["a", "b"], Some("sum"))
            .unwrap();
        let column = dag.node(id).column.as_ref().expect("folded");
        assert!(column.is_const());
        assert_eq!(column.const_value(), Some(Value::Int4(11)));
    }

    #[test]
    fn folding_is_blocked_through_always_constant_functions() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        let ignore_id = dag
            .add_function(&*registry.get("ignore").unwrap(), &["x"], Some("ig"))
            .unwrap();
        // ignore() has a constant result even over a non-constant input,
        // but folding must not continue through it.
        let node = dag.node(ignore_id);
        assert!(node.column.is_some());
        assert!(!node.allow_constant_folding);

        dag.add_column(literal(1, "one")).unwrap();
        let sum = dag
            .add_function(&*registry.get("plus").unwrap(), &["ig", "one"], None)
            .unwrap();
        assert!(dag.node(sum).column.is_none());
    }

    #[test]
    fn synthesized_names_are_canonical() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        dag.add_column(literal(1, "lit")).unwrap();
        let id = dag
            .add_function(&*registry.get("plus").unwrap(), &["x", "lit"], None)
            .unwrap();
        assert_eq!(dag.node(id).result_name, "plus(x, lit)");
    }

    #[test]
    fn prune_keeps_reachable_and_clears_dangling_renames() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Text).unwrap();
        dag.add_alias("a", "b", false).unwrap();
        dag.add_function(&*registry.get("upper").unwrap(), &["b"], Some("c"))
            .unwrap();
        dag.add_input("unused", DataType::Int4).unwrap();

        dag.remove_unused_actions(&["c"]).unwrap();
        assert_eq!(dag.node_count(), 3);
        assert!(dag.has("c"));
        assert!(!dag.has("unused"));
        // Children were remapped consistently.
        let c = dag.node(dag.node_id("c").unwrap());
        let b = dag.node(c.children[0]);
        assert_eq!(b.result_name, "b");
        assert_eq!(dag.node(b.children[0]).result_name, "a");
    }

    #[test]
    fn prune_rejects_unknown_names() {
        let mut dag = ActionsDag::new();
        dag.add_input("a", DataType::Int4).unwrap();
        let err = dag.remove_unused_actions(&["zzz"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExprError>(),
            Some(ExprError::UnknownIdentifier(_))
        ));
    }

    #[derive(Debug)]
    struct DiceResolver;

    impl FunctionResolver for DiceResolver {
        fn name(&self) -> &str {
            "rollDice"
        }

        fn build(&self, _args: &[ColumnWithTypeAndName]) -> crate::error::Result<Arc<dyn FunctionBase>> {
            Ok(Arc::new(DiceFunction {
                result_type: DataType::Int8,
            }))
        }
    }

    #[derive(Debug)]
    struct DiceFunction {
        result_type: DataType,
    }

    impl FunctionBase for DiceFunction {
        fn name(&self) -> &str {
            "rollDice"
        }

        fn argument_types(&self) -> &[DataType] {
            &[]
        }

        fn result_type(&self) -> &DataType {
            &self.result_type
        }

        fn is_deterministic(&self) -> bool {
            false
        }

        fn prepare(&self, _args: &[ColumnWithTypeAndName]) -> Arc<dyn PreparedFunction> {
            Arc::new(PreparedDice)
        }
    }

    struct PreparedDice;

    impl PreparedFunction for PreparedDice {
        fn execute(
            &self,
            _args: &[ColumnWithTypeAndName],
            result_type: &DataType,
            num_rows: usize,
            _dry_run: bool,
        ) -> crate::error::Result<Column> {
            // Chosen by fair dice roll.
            Column::constant(crate::types::Value::Int8(4), result_type, num_rows)
        }
    }

    #[test]
    fn non_deterministic_functions_fold_only_without_compilation() {
        use crate::settings::ExecutionSettings;

        let mut plain = ActionsDag::new();
        let id = plain.add_function(&DiceResolver, &[], Some("roll")).unwrap();
        assert!(plain.node(id).column.is_some());

        // A cached compiled body may be reused by later queries, so the
        // value must not be baked in.
        let mut compiled = ActionsDag::new().with_settings(ExecutionSettings {
            compile_expressions: true,
            ..ExecutionSettings::default()
        });
        let id = compiled.add_function(&DiceResolver, &[], Some("roll")).unwrap();
        assert!(compiled.node(id).column.is_none());
    }

    #[test]
    fn compilation_cache_marks_repeated_fingerprints() {
        use crate::cache::CompiledExpressionCache;
        use crate::settings::ExecutionSettings;

        let registry = FunctionRegistry::with_builtins();
        let cache = Arc::new(CompiledExpressionCache::new());
        let mut dag = ActionsDag::new()
            .with_settings(ExecutionSettings {
                compile_expressions: true,
                ..ExecutionSettings::default()
            })
            .with_compilation_cache(cache.clone());

        dag.add_input("a", DataType::Int4).unwrap();
        dag.add_input("b", DataType::Int4).unwrap();
        let first = dag
            .add_function(&*registry.get("plus").unwrap(), &["a", "b"], Some("s1"))
            .unwrap();
        let second = dag
            .add_function(&*registry.get("plus").unwrap(), &["a", "b"], Some("s2"))
            .unwrap();

        assert!(!dag.node(first).is_function_compiled);
        assert!(dag.node(second).is_function_compiled);
        assert_eq!(cache.len(), 1);
    }
}
