//! Syntax module: the parse tree produced by the parser.
//!
//! Nodes live in a flat arena and refer to each other by `NodeId`. A
//! `SyntaxListener` observes a document-order walk of the tree: statements
//! are announced on entry, every expression-producing node on exit, so a
//! listener sees all children of a node before the node itself.

use serde::{Deserialize, Serialize};

use crate::expr::{OperatorType, UnaryOperator};
use crate::Result;

/// Stable index of a node inside its `SyntaxTree`.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierKind {
    Guid,
    MeasurementKey,
    PointTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierLiteral {
    pub kind: IdentifierKind,
    /// Literal text with delimiters removed (point tag quotes), braces kept
    /// on GUIDs as written.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingTermSyntax {
    pub column: String,
    pub ascending: bool,
    pub exact_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStatementSyntax {
    pub table: String,
    pub top_limit: Option<i32>,
    pub order_by: Vec<OrderingTermSyntax>,
    pub expression: NodeId,
}

/// Literal tokens as written; typed by the binder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteralSyntax {
    Null,
    Boolean(bool),
    Integer(String),
    Numeric(String),
    String(String),
    Guid(String),
    DateTime(String),
    MeasurementKey(String),
    PointTag(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyntaxNode {
    StatementList {
        statements: Vec<NodeId>,
    },
    IdentifierStatement(IdentifierLiteral),
    FilterStatement(FilterStatementSyntax),
    ExpressionStatement {
        expression: NodeId,
    },
    NotExpression {
        operand: NodeId,
    },
    LogicalExpression {
        op: OperatorType,
        left: NodeId,
        right: NodeId,
    },
    /// Comparison and LIKE predicates.
    OperatorPredicate {
        op: OperatorType,
        left: NodeId,
        right: NodeId,
    },
    InPredicate {
        operand: NodeId,
        list: Vec<NodeId>,
        negated: bool,
        exact_match: bool,
    },
    IsNullPredicate {
        operand: NodeId,
        negated: bool,
    },
    UnaryValue {
        op: UnaryOperator,
        operand: NodeId,
    },
    /// Math and bitwise operators.
    BinaryValue {
        op: OperatorType,
        left: NodeId,
        right: NodeId,
    },
    Literal(LiteralSyntax),
    ColumnName(String),
    FunctionCall {
        name: String,
        arguments: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    positions: Vec<SourcePosition>,
    root: NodeId,
}

impl SyntaxTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            positions: Vec::new(),
            root: 0,
        }
    }

    pub(crate) fn push(&mut self, node: SyntaxNode, line: usize, column: usize) -> NodeId {
        self.nodes.push(node);
        self.positions.push(SourcePosition { line, column });
        self.nodes.len() - 1
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id]
    }

    pub fn position(&self, id: NodeId) -> SourcePosition {
        self.positions[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top level statements in document order.
    pub fn statements(&self) -> &[NodeId] {
        match self.nodes.get(self.root) {
            Some(SyntaxNode::StatementList { statements }) => statements,
            _ => &[],
        }
    }

    /// Walks every statement in document order, stopping at the first error
    /// returned by the listener.
    pub fn walk<L: SyntaxListener + ?Sized>(&self, listener: &mut L) -> Result<()> {
        for &statement in self.statements() {
            listener.enter_statement(self, statement)?;
            self.walk_node(statement, listener)?;
            listener.exit_statement(self, statement)?;
        }
        Ok(())
    }

    fn walk_node<L: SyntaxListener + ?Sized>(&self, id: NodeId, listener: &mut L) -> Result<()> {
        match &self.nodes[id] {
            SyntaxNode::StatementList { statements } => {
                for &statement in statements {
                    self.walk_node(statement, listener)?;
                }
            }
            SyntaxNode::IdentifierStatement(_) => listener.exit_identifier_statement(self, id)?,
            SyntaxNode::FilterStatement(filter) => {
                listener.enter_filter_statement(self, id)?;
                self.walk_node(filter.expression, listener)?;
            }
            SyntaxNode::ExpressionStatement { expression } => self.walk_node(*expression, listener)?,
            SyntaxNode::NotExpression { operand } => {
                self.walk_node(*operand, listener)?;
                listener.exit_expression(self, id)?;
            }
            SyntaxNode::LogicalExpression { left, right, .. } => {
                self.walk_node(*left, listener)?;
                self.walk_node(*right, listener)?;
                listener.exit_expression(self, id)?;
            }
            SyntaxNode::OperatorPredicate { left, right, .. } => {
                self.walk_node(*left, listener)?;
                self.walk_node(*right, listener)?;
                listener.exit_predicate_expression(self, id)?;
            }
            SyntaxNode::InPredicate { operand, list, .. } => {
                self.walk_node(*operand, listener)?;
                for &item in list {
                    self.walk_node(item, listener)?;
                }
                listener.exit_predicate_expression(self, id)?;
            }
            SyntaxNode::IsNullPredicate { operand, .. } => {
                self.walk_node(*operand, listener)?;
                listener.exit_predicate_expression(self, id)?;
            }
            SyntaxNode::UnaryValue { operand, .. } => {
                self.walk_node(*operand, listener)?;
                listener.exit_value_expression(self, id)?;
            }
            SyntaxNode::BinaryValue { left, right, .. } => {
                self.walk_node(*left, listener)?;
                self.walk_node(*right, listener)?;
                listener.exit_value_expression(self, id)?;
            }
            SyntaxNode::Literal(_) => listener.exit_literal_value(self, id)?,
            SyntaxNode::ColumnName(_) => listener.exit_column_name(self, id)?,
            SyntaxNode::FunctionCall { arguments, .. } => {
                for &argument in arguments {
                    self.walk_node(argument, listener)?;
                }
                listener.exit_function_expression(self, id)?;
            }
        }
        Ok(())
    }
}

/// Callbacks fired by `SyntaxTree::walk`. All default to no-ops.
pub trait SyntaxListener {
    fn enter_statement(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_statement(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn enter_filter_statement(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_identifier_statement(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_expression(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_predicate_expression(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_value_expression(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_literal_value(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_column_name(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
    fn exit_function_expression(&mut self, _tree: &SyntaxTree, _id: NodeId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl SyntaxListener for Recorder {
        fn enter_statement(&mut self, _tree: &SyntaxTree, id: NodeId) -> Result<()> {
            self.events.push(format!("enter_statement {}", id));
            Ok(())
        }
        fn exit_statement(&mut self, _tree: &SyntaxTree, id: NodeId) -> Result<()> {
            self.events.push(format!("exit_statement {}", id));
            Ok(())
        }
        fn exit_predicate_expression(&mut self, _tree: &SyntaxTree, id: NodeId) -> Result<()> {
            self.events.push(format!("predicate {}", id));
            Ok(())
        }
        fn exit_literal_value(&mut self, _tree: &SyntaxTree, id: NodeId) -> Result<()> {
            self.events.push(format!("literal {}", id));
            Ok(())
        }
        fn exit_column_name(&mut self, _tree: &SyntaxTree, id: NodeId) -> Result<()> {
            self.events.push(format!("column {}", id));
            Ok(())
        }
    }

    #[test]
    fn test_walk_visits_children_before_parents() {
        let mut tree = SyntaxTree::new();
        let column = tree.push(SyntaxNode::ColumnName("Adder".into()), 1, 1);
        let literal = tree.push(SyntaxNode::Literal(LiteralSyntax::Integer("1".into())), 1, 9);
        let predicate = tree.push(
            SyntaxNode::OperatorPredicate {
                op: OperatorType::Equal,
                left: column,
                right: literal,
            },
            1,
            1,
        );
        let statement = tree.push(SyntaxNode::ExpressionStatement { expression: predicate }, 1, 1);
        let root = tree.push(
            SyntaxNode::StatementList {
                statements: vec![statement],
            },
            1,
            1,
        );
        tree.set_root(root);

        let mut recorder = Recorder::default();
        tree.walk(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec!["enter_statement 3", "column 0", "literal 1", "predicate 2", "exit_statement 3"]
        );
    }

    #[test]
    fn test_empty_tree_has_no_statements() {
        let tree = SyntaxTree::new();
        assert!(tree.is_empty());
        assert!(tree.statements().is_empty());
        let mut recorder = Recorder::default();
        tree.walk(&mut recorder).unwrap();
        assert!(recorder.events.is_empty());
    }
}
