//! # Integration Tests for Chains and Program Splitting
//!
//! Covers multi-stage orchestration (expression steps around an array-join
//! barrier) and splitting a single program at its array join, including
//! the observational-equivalence property: prefix then suffix must compute
//! exactly what the unsplit program computes.

use std::sync::Arc;

use hashbrown::HashSet;

use colexpr::chain::{ArrayJoinOperator, ArrayJoinStep, ChainStep, ExpressionChain, ExpressionStep};
use colexpr::functions::FunctionRegistry;
use colexpr::types::{Column, DataType, Value};
use colexpr::{ActionsDag, Block, ColumnWithTypeAndName};

fn column_values(block: &Block, name: &str) -> Vec<Value> {
    let column = block
        .by_name(name)
        .unwrap_or_else(|| panic!("column {} missing from block", name))
        .column
        .as_ref()
        .unwrap_or_else(|| panic!("column {} has no data", name));
    (0..column.len())
        .map(|row| column.value_at(row).unwrap())
        .collect()
}

fn int_array(rows: Vec<Vec<i32>>) -> Column {
    Column::array(
        DataType::Int4,
        rows.into_iter()
            .map(|row| row.into_iter().map(Value::Int4).collect())
            .collect(),
    )
    .unwrap()
}

mod split_tests {
    use super::*;

    /// x and arr in, f_x = negate(x), g_arr = identity(arr),
    /// e = array join of arr, h = plus(e, f_x); outputs {h, g_arr}.
    fn mixed_dag(registry: &FunctionRegistry) -> ActionsDag {
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        dag.add_input("arr", DataType::array(DataType::Int4)).unwrap();
        dag.add_function(&*registry.get("negate").unwrap(), &["x"], Some("f_x"))
            .unwrap();
        dag.add_function(&*registry.get("identity").unwrap(), &["arr"], Some("g_arr"))
            .unwrap();
        dag.add_array_join("arr", "e").unwrap();
        dag.add_function(&*registry.get("plus").unwrap(), &["e", "f_x"], Some("h"))
            .unwrap();
        dag.remove_unused_actions(&["h", "g_arr"]).unwrap();
        dag
    }

    fn sample_input() -> Block {
        Block::new(vec![
            ColumnWithTypeAndName::new(Some(Column::int4(vec![5, 7])), DataType::Int4, "x"),
            ColumnWithTypeAndName::new(
                Some(int_array(vec![vec![1, 2], vec![3]])),
                DataType::array(DataType::Int4),
                "arr",
            ),
        ])
    }

    #[test]
    fn split_partitions_by_array_join_dependency() {
        let registry = FunctionRegistry::with_builtins();
        let mut program = mixed_dag(&registry).build_expressions().unwrap();

        let array_joined: HashSet<String> = ["arr".to_string()].into_iter().collect();
        let prefix = program
            .split_before_array_join(&array_joined)
            .unwrap()
            .expect("program should split");

        // The prefix computes only what does not depend on the join.
        assert_eq!(prefix.required_column_names(), vec!["x".to_string()]);
        assert_eq!(prefix.sample_block().names(), vec!["f_x".to_string()]);
        assert!(!prefix.has_array_join());

        // The suffix reads the prefix output plus the joined column.
        let mut suffix_inputs = program.required_column_names();
        suffix_inputs.sort_unstable();
        assert_eq!(
            suffix_inputs,
            vec!["arr".to_string(), "f_x".to_string()]
        );
        assert!(program.has_array_join());
    }

    #[test]
    fn split_is_observationally_equivalent() {
        let registry = FunctionRegistry::with_builtins();

        let unsplit = mixed_dag(&registry).build_expressions().unwrap();
        let mut whole = sample_input();
        unsplit.execute(&mut whole, false).unwrap();

        let mut suffix = mixed_dag(&registry).build_expressions().unwrap();
        let array_joined: HashSet<String> = ["arr".to_string()].into_iter().collect();
        let prefix = suffix
            .split_before_array_join(&array_joined)
            .unwrap()
            .expect("program should split");

        let mut staged = sample_input();
        prefix.execute(&mut staged, false).unwrap();
        suffix.execute(&mut staged, false).unwrap();

        for name in ["h", "g_arr"] {
            assert_eq!(
                column_values(&whole, name),
                column_values(&staged, name),
                "column {} differs between split and unsplit execution",
                name
            );
        }
        assert_eq!(whole.rows(), staged.rows());

        // Hand-checked expectations: e = [1, 2, 3], f_x replicated to
        // [-5, -5, -7], h = e + f_x.
        assert_eq!(
            column_values(&whole, "h"),
            vec![Value::Int4(-4), Value::Int4(-3), Value::Int4(-4)]
        );
    }

    #[test]
    fn split_returns_none_when_all_inputs_are_joined() {
        let mut dag = ActionsDag::new();
        dag.add_input("arr", DataType::array(DataType::Int4)).unwrap();
        dag.add_array_join("arr", "e").unwrap();
        dag.remove_unused_actions(&["e"]).unwrap();
        let mut program = dag.build_expressions().unwrap();

        let array_joined: HashSet<String> = ["arr".to_string()].into_iter().collect();
        assert!(program
            .split_before_array_join(&array_joined)
            .unwrap()
            .is_none());

        // The program is untouched and still runs.
        let mut block = Block::new(vec![ColumnWithTypeAndName::new(
            Some(int_array(vec![vec![4], vec![5]])),
            DataType::array(DataType::Int4),
            "arr",
        )]);
        program.execute(&mut block, false).unwrap();
        assert_eq!(
            column_values(&block, "e"),
            vec![Value::Int4(4), Value::Int4(5)]
        );
    }

    #[test]
    fn split_returns_none_when_no_action_can_move() {
        let registry = FunctionRegistry::with_builtins();
        let mut dag = ActionsDag::new();
        dag.add_input("x", DataType::Int4).unwrap();
        dag.add_input("arr", DataType::array(DataType::Int4)).unwrap();
        dag.add_array_join("arr", "e").unwrap();
        dag.add_function(&*registry.get("plus").unwrap(), &["e", "x"], Some("h"))
            .unwrap();
        dag.remove_unused_actions(&["h"]).unwrap();
        let mut program = dag.build_expressions().unwrap();

        let array_joined: HashSet<String> = ["arr".to_string()].into_iter().collect();
        assert!(program
            .split_before_array_join(&array_joined)
            .unwrap()
            .is_none());
    }
}

mod chain_tests {
    use super::*;

    /// Stage 1 uppercases the tag, stage 2 unnests arr, stage 3 negates
    /// the unnested elements.
    #[test]
    fn chain_runs_expression_array_join_expression() {
        let registry = FunctionRegistry::with_builtins();
        let mut chain = ExpressionChain::new();

        let mut dag = ActionsDag::with_input_columns(vec![
            ColumnWithTypeAndName::schema(DataType::array(DataType::Int4), "arr"),
            ColumnWithTypeAndName::schema(DataType::Text, "tag"),
        ])
        .unwrap();
        dag.add_function(&*registry.get("upper").unwrap(), &["tag"], Some("tag_u"))
            .unwrap();
        let mut first = ExpressionStep::new(dag);
        first.add_required_output("tag_u");
        chain.push_step(ChainStep::Expression(first));

        let operator = Arc::new(ArrayJoinOperator::new(
            ["arr".to_string()].into_iter().collect(),
        ));
        let join_step = ArrayJoinStep::new(
            Arc::clone(&operator),
            chain.steps.last().unwrap().result_columns(),
        )
        .unwrap();
        chain.push_step(ChainStep::ArrayJoin(join_step));

        let step = chain.add_step().unwrap();
        let dag = step.dag_mut().unwrap();
        dag.add_function(&*registry.get("negate").unwrap(), &["arr"], Some("na"))
            .unwrap();
        step.add_required_output("na");
        step.add_required_output("tag_u");

        chain.finalize().unwrap();

        // Drive a block through all three stages.
        let mut block = Block::new(vec![
            ColumnWithTypeAndName::new(
                Some(int_array(vec![vec![1, 2], vec![3]])),
                DataType::array(DataType::Int4),
                "arr",
            ),
            ColumnWithTypeAndName::new(Some(Column::text(vec!["a", "b"])), DataType::Text, "tag"),
        ]);

        let first_program = match &mut chain.steps[0] {
            ChainStep::Expression(step) => step.build_program().unwrap(),
            _ => unreachable!(),
        };
        first_program.execute(&mut block, false).unwrap();
        assert!(block.has("arr"));
        assert!(block.has("tag_u"));
        assert!(!block.has("tag"));

        operator.execute(&mut block).unwrap();
        assert_eq!(block.rows(), 3);

        let last_program = match &mut chain.steps[2] {
            ChainStep::Expression(step) => step.build_program().unwrap(),
            _ => unreachable!(),
        };
        last_program.execute(&mut block, false).unwrap();

        assert_eq!(
            column_values(&block, "na"),
            vec![Value::Int4(-1), Value::Int4(-2), Value::Int4(-3)]
        );
        assert_eq!(
            column_values(&block, "tag_u"),
            vec![
                Value::Text("A".into()),
                Value::Text("A".into()),
                Value::Text("B".into())
            ]
        );
    }

    #[test]
    fn chain_finalize_then_finalize_is_stable() {
        let registry = FunctionRegistry::with_builtins();
        let mut chain = ExpressionChain::new();

        let mut dag = ActionsDag::with_input_columns(vec![
            ColumnWithTypeAndName::schema(DataType::Int4, "a"),
            ColumnWithTypeAndName::schema(DataType::Int4, "b"),
        ])
        .unwrap();
        dag.add_function(&*registry.get("plus").unwrap(), &["a", "b"], Some("sum"))
            .unwrap();
        dag.add_function(&*registry.get("negate").unwrap(), &["a"], Some("neg"))
            .unwrap();
        let mut step = ExpressionStep::new(dag);
        step.add_required_output("sum");
        chain.push_step(ChainStep::Expression(step));

        chain.finalize().unwrap();
        let once = chain.dump_chain();
        chain.finalize().unwrap();
        let twice = chain.dump_chain();

        assert_eq!(once, twice);
        // neg was never required and is gone from the step's results.
        let names: Vec<String> = chain.steps[0]
            .result_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"sum".to_string()));
        assert!(!names.contains(&"neg".to_string()));
    }
}
