//! # colexpr - Columnar Expression Execution Core
//!
//! colexpr compiles symbolic expression trees into linear, slot-based
//! programs over columnar data blocks and evaluates them. It is the
//! expression engine of a columnar analytical database, without the
//! database around it: no SQL parser, no storage, no network.
//!
//! ## Quick Start
//!
//! ```ignore
//! use colexpr::{ActionsDag, Block, ColumnWithTypeAndName};
//! use colexpr::functions::FunctionRegistry;
//! use colexpr::types::{Column, DataType, Value};
//!
//! let registry = FunctionRegistry::with_builtins();
//! let mut dag = ActionsDag::new();
//! dag.add_input("x", DataType::Int4)?;
//! dag.add_column(ColumnWithTypeAndName::new(
//!     Some(Column::constant(Value::Int4(1), &DataType::Int4, 1)?),
//!     DataType::Int4,
//!     "one",
//! ))?;
//! dag.add_function(&*registry.get("plus")?, &["x", "one"], Some("y"))?;
//! dag.remove_unused_actions(&["y"])?;
//!
//! let program = dag.build_expressions()?;
//! let mut block = Block::new(vec![ColumnWithTypeAndName::new(
//!     Some(Column::int4(vec![10, 20, 30])),
//!     DataType::Int4,
//!     "x",
//! )]);
//! program.execute(&mut block, false)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Chain (multi-stage orchestration)    │
//! ├─────────────────────────────────────────┤
//! │  Program (linearize / execute / split)   │
//! ├─────────────────────────────────────────┤
//! │  ActionsDag (build, fold, prune, hash)   │
//! ├──────────────────────┬──────────────────┤
//! │  Functions (registry) │  Types / Blocks  │
//! └──────────────────────┴──────────────────┘
//! ```
//!
//! A client builds a DAG of inputs, constants, aliases, function
//! applications, and array unnests; constant subexpressions fold at build
//! time. [`ActionsDag::build_expressions`] linearizes the DAG into an
//! [`ExpressionProgram`]: a topologically ordered action list where every
//! intermediate value lives in a reusable numbered slot, with last-use
//! analysis deciding when a slot is recycled. The program then runs
//! against [`Block`]s; an array-join action changes the row cardinality
//! mid-pipeline and replicates every live sibling column coherently.
//!
//! Programs are immutable after build and shareable across threads; every
//! `execute` keeps its state on the stack.
//!
//! ## Module Overview
//!
//! - [`types`]: data types, scalar values, immutable columns
//! - [`block`]: named, typed column batches
//! - [`functions`]: resolver/base/prepared traits, registry, builtins
//! - [`dag`]: expression DAG with folding and pruning
//! - [`program`]: linearizer, executor, split-before-array-join
//! - [`chain`]: multi-stage sequencing with cross-stage pruning
//! - [`cache`]: injected compiled-expression cache handle
//! - [`settings`]: resource limits
//! - [`error`]: classified error kinds

pub mod block;
pub mod cache;
pub mod chain;
pub mod dag;
pub mod error;
pub mod functions;
pub mod program;
pub mod settings;
pub mod types;

pub use block::{Block, ColumnWithTypeAndName, NameAndType};
pub use cache::CompiledExpressionCache;
pub use dag::{ActionsDag, NodeId, NodeKind};
pub use error::{ExprError, Result};
pub use program::{get_smallest_column, Action, Argument, ExpressionProgram};
pub use settings::ExecutionSettings;
