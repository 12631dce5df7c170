//! Parser module: hand-written recursive descent parser for filter expressions.
//!
//! Produces a `SyntaxTree`. Operator precedence, loosest first: OR, AND,
//! prefix NOT, predicates (comparison, LIKE, IN, IS NULL), bitwise, additive,
//! multiplicative, unary.

use crate::expr::{OperatorType, UnaryOperator};
use crate::lexer::{Keyword, Lexer, Symbol, Token, TokenKind};
use crate::syntax::{
    FilterStatementSyntax, IdentifierKind, IdentifierLiteral, LiteralSyntax, NodeId,
    OrderingTermSyntax, SyntaxNode, SyntaxTree,
};
use crate::{FilterExpressionError, Result};

/// Bound on parse tree depth. Parentheses, prefix operators and every
/// operator of a left-associative chain each take one level.
const MAX_NESTING_DEPTH: usize = 128;

pub struct SyntaxParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    tree: SyntaxTree,
}

impl SyntaxParser {
    pub fn new(input: &str) -> Result<Self> {
        Ok(Self {
            tokens: Lexer::tokenize(input)?,
            pos: 0,
            depth: 0,
            tree: SyntaxTree::new(),
        })
    }

    /// Parses a complete filter expression: zero or more statements
    /// separated by semicolons.
    pub fn parse(input: &str) -> Result<SyntaxTree> {
        let mut parser = SyntaxParser::new(input)?;
        let (line, column) = parser.location();
        let mut statements = Vec::new();
        parser.skip_semicolons();
        while !parser.at_eof() {
            statements.push(parser.parse_statement()?);
            if !parser.at_eof() && !parser.peek().is_symbol(Symbol::Semicolon) {
                return Err(parser.unexpected("';' or end of input"));
            }
            parser.skip_semicolons();
        }
        let root = parser
            .tree
            .push(SyntaxNode::StatementList { statements }, line, column);
        parser.tree.set_root(root);
        Ok(parser.tree)
    }

    fn parse_statement(&mut self) -> Result<NodeId> {
        let (line, column) = self.location();
        if self.peek().is_keyword(Keyword::Filter) {
            return self.parse_filter_statement();
        }
        if self.at_identifier_statement() {
            let token = self.advance();
            let literal = match token.kind {
                TokenKind::GuidLiteral(text) => IdentifierLiteral {
                    kind: IdentifierKind::Guid,
                    text,
                },
                TokenKind::MeasurementKeyLiteral(text) => IdentifierLiteral {
                    kind: IdentifierKind::MeasurementKey,
                    text,
                },
                TokenKind::PointTagLiteral(text) => IdentifierLiteral {
                    kind: IdentifierKind::PointTag,
                    text,
                },
                _ => return Err(self.syntax_error("expected identifier literal", line, column)),
            };
            return Ok(self
                .tree
                .push(SyntaxNode::IdentifierStatement(literal), line, column));
        }
        let expression = self.parse_expression()?;
        Ok(self
            .tree
            .push(SyntaxNode::ExpressionStatement { expression }, line, column))
    }

    fn at_identifier_statement(&self) -> bool {
        let is_identifier = matches!(
            self.peek().kind,
            TokenKind::GuidLiteral(_)
                | TokenKind::MeasurementKeyLiteral(_)
                | TokenKind::PointTagLiteral(_)
        );
        let next = self.peek_nth(1);
        is_identifier && (next.kind == TokenKind::Eof || next.is_symbol(Symbol::Semicolon))
    }

    fn parse_filter_statement(&mut self) -> Result<NodeId> {
        let (line, column) = self.location();
        self.advance(); // FILTER

        let mut top_limit = None;
        if self.consume_keyword(Keyword::Top) {
            let negative = if self.consume_symbol(Symbol::Minus) {
                true
            } else {
                self.consume_symbol(Symbol::Plus);
                false
            };
            let token = self.advance();
            let limit = match &token.kind {
                TokenKind::IntegerLiteral(text) => parse_integer(text)
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| {
                        self.syntax_error(
                            &format!("TOP limit {} is out of range", text),
                            token.line,
                            token.column,
                        )
                    })?,
                _ => return Err(self.unexpected_token(&token, "integer TOP limit")),
            };
            top_limit = Some(if negative { -limit } else { limit });
        }

        let table = self.expect_identifier("table name")?;
        if !self.consume_keyword(Keyword::Where) {
            return Err(self.unexpected("WHERE"));
        }
        let expression = self.parse_expression()?;

        let mut order_by = Vec::new();
        if self.consume_keyword(Keyword::Order) {
            if !self.consume_keyword(Keyword::By) {
                return Err(self.unexpected("BY"));
            }
            loop {
                order_by.push(self.parse_ordering_term()?);
                if !self.consume_symbol(Symbol::Comma) {
                    break;
                }
            }
        }

        let filter = FilterStatementSyntax {
            table,
            top_limit,
            order_by,
            expression,
        };
        Ok(self
            .tree
            .push(SyntaxNode::FilterStatement(filter), line, column))
    }

    fn parse_ordering_term(&mut self) -> Result<OrderingTermSyntax> {
        let exact_match = self.consume_exact_match_modifier();
        let column = self.expect_identifier("column name")?;
        let ascending = if self.consume_keyword(Keyword::Desc) {
            false
        } else {
            self.consume_keyword(Keyword::Asc);
            true
        };
        Ok(OrderingTermSyntax {
            column,
            ascending,
            exact_match,
        })
    }

    fn parse_expression(&mut self) -> Result<NodeId> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_and()?;
        loop {
            let (line, column) = self.location();
            if self.consume_keyword(Keyword::Or) || self.consume_symbol(Symbol::PipePipe) {
                self.descend()?;
                let right = self.parse_and()?;
                left = self.tree.push(
                    SyntaxNode::LogicalExpression {
                        op: OperatorType::Or,
                        left,
                        right,
                    },
                    line,
                    column,
                );
            } else {
                break;
            }
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_not()?;
        loop {
            let (line, column) = self.location();
            if self.consume_keyword(Keyword::And) || self.consume_symbol(Symbol::AmpAmp) {
                self.descend()?;
                let right = self.parse_not()?;
                left = self.tree.push(
                    SyntaxNode::LogicalExpression {
                        op: OperatorType::And,
                        left,
                        right,
                    },
                    line,
                    column,
                );
            } else {
                break;
            }
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<NodeId> {
        let (line, column) = self.location();
        if self.consume_keyword(Keyword::Not) || self.consume_symbol(Symbol::Bang) {
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            Ok(self
                .tree
                .push(SyntaxNode::NotExpression { operand }, line, column))
        } else {
            self.parse_predicate()
        }
    }

    fn parse_predicate(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_bitwise()?;
        loop {
            let (line, column) = self.location();
            if let Some(op) = self.comparison_operator() {
                self.advance();
                self.descend()?;
                let right = self.parse_bitwise()?;
                left = self.tree.push(
                    SyntaxNode::OperatorPredicate { op, left, right },
                    line,
                    column,
                );
                continue;
            }

            let negated = self.at_negated_membership();
            if negated {
                self.advance(); // NOT or !
            }
            if self.consume_keyword(Keyword::Like) {
                self.descend()?;
                let exact_match = self.consume_exact_match_modifier();
                let op = match (negated, exact_match) {
                    (false, false) => OperatorType::Like,
                    (false, true) => OperatorType::LikeExactMatch,
                    (true, false) => OperatorType::NotLike,
                    (true, true) => OperatorType::NotLikeExactMatch,
                };
                let right = self.parse_bitwise()?;
                left = self.tree.push(
                    SyntaxNode::OperatorPredicate { op, left, right },
                    line,
                    column,
                );
            } else if self.consume_keyword(Keyword::In) {
                self.descend()?;
                let exact_match = self.consume_exact_match_modifier();
                if !self.consume_symbol(Symbol::LeftParen) {
                    return Err(self.unexpected("'('"));
                }
                let list = self.parse_expression_list()?;
                if !self.consume_symbol(Symbol::RightParen) {
                    return Err(self.unexpected("')'"));
                }
                left = self.tree.push(
                    SyntaxNode::InPredicate {
                        operand: left,
                        list,
                        negated,
                        exact_match,
                    },
                    line,
                    column,
                );
            } else if !negated && self.consume_keyword(Keyword::Is) {
                self.descend()?;
                let negated =
                    self.consume_keyword(Keyword::Not) || self.consume_symbol(Symbol::Bang);
                if !self.consume_keyword(Keyword::Null) {
                    return Err(self.unexpected("NULL"));
                }
                left = self.tree.push(
                    SyntaxNode::IsNullPredicate {
                        operand: left,
                        negated,
                    },
                    line,
                    column,
                );
            } else if negated {
                return Err(self.unexpected("LIKE or IN"));
            } else {
                break;
            }
        }
        self.depth = depth;
        Ok(left)
    }

    fn at_negated_membership(&self) -> bool {
        let token = self.peek();
        let next = self.peek_nth(1);
        (token.is_keyword(Keyword::Not) || token.is_symbol(Symbol::Bang))
            && (next.is_keyword(Keyword::Like) || next.is_keyword(Keyword::In))
    }

    fn comparison_operator(&self) -> Option<OperatorType> {
        let op = match self.peek().kind {
            TokenKind::Symbol(Symbol::Less) => OperatorType::LessThan,
            TokenKind::Symbol(Symbol::LessEqual) => OperatorType::LessThanOrEqual,
            TokenKind::Symbol(Symbol::Greater) => OperatorType::GreaterThan,
            TokenKind::Symbol(Symbol::GreaterEqual) => OperatorType::GreaterThanOrEqual,
            TokenKind::Symbol(Symbol::Equal | Symbol::DoubleEqual) => OperatorType::Equal,
            TokenKind::Symbol(Symbol::TripleEqual) => OperatorType::EqualExactMatch,
            TokenKind::Symbol(Symbol::NotEqual | Symbol::LessGreater) => OperatorType::NotEqual,
            TokenKind::Symbol(Symbol::NotDoubleEqual) => OperatorType::NotEqualExactMatch,
            _ => return None,
        };
        Some(op)
    }

    fn parse_bitwise(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let (line, column) = self.location();
            let op = match self.peek().kind {
                TokenKind::Symbol(Symbol::Amp) => OperatorType::BitwiseAnd,
                TokenKind::Symbol(Symbol::Pipe) => OperatorType::BitwiseOr,
                TokenKind::Symbol(Symbol::Caret) | TokenKind::Keyword(Keyword::Xor) => {
                    OperatorType::BitwiseXor
                }
                TokenKind::Symbol(Symbol::ShiftLeft) => OperatorType::BitShiftLeft,
                TokenKind::Symbol(Symbol::ShiftRight) => OperatorType::BitShiftRight,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_additive()?;
            left = self
                .tree
                .push(SyntaxNode::BinaryValue { op, left, right }, line, column);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let (line, column) = self.location();
            let op = match self.peek().kind {
                TokenKind::Symbol(Symbol::Plus) => OperatorType::Add,
                TokenKind::Symbol(Symbol::Minus) => OperatorType::Subtract,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = self
                .tree
                .push(SyntaxNode::BinaryValue { op, left, right }, line, column);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let (line, column) = self.location();
            let op = match self.peek().kind {
                TokenKind::Symbol(Symbol::Star) => OperatorType::Multiply,
                TokenKind::Symbol(Symbol::Slash) => OperatorType::Divide,
                TokenKind::Symbol(Symbol::Percent) => OperatorType::Modulus,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_unary()?;
            left = self
                .tree
                .push(SyntaxNode::BinaryValue { op, left, right }, line, column);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<NodeId> {
        let (line, column) = self.location();
        let op = match self.peek().kind {
            TokenKind::Symbol(Symbol::Minus) => UnaryOperator::Minus,
            TokenKind::Symbol(Symbol::Plus) => UnaryOperator::Plus,
            TokenKind::Symbol(Symbol::Tilde) => UnaryOperator::BitwiseNot,
            TokenKind::Symbol(Symbol::Bang) | TokenKind::Keyword(Keyword::Not) => UnaryOperator::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(self
            .tree
            .push(SyntaxNode::UnaryValue { op, operand }, line, column))
    }

    fn parse_primary(&mut self) -> Result<NodeId> {
        let (line, column) = self.location();
        if self.consume_symbol(Symbol::LeftParen) {
            self.descend()?;
            let inner = self.parse_expression()?;
            self.depth -= 1;
            if !self.consume_symbol(Symbol::RightParen) {
                return Err(self.unexpected("')'"));
            }
            return Ok(inner);
        }

        let literal = match &self.peek().kind {
            TokenKind::Keyword(Keyword::Null) => Some(LiteralSyntax::Null),
            TokenKind::Keyword(Keyword::True) => Some(LiteralSyntax::Boolean(true)),
            TokenKind::Keyword(Keyword::False) => Some(LiteralSyntax::Boolean(false)),
            TokenKind::IntegerLiteral(text) => Some(LiteralSyntax::Integer(text.clone())),
            TokenKind::NumericLiteral(text) => Some(LiteralSyntax::Numeric(text.clone())),
            TokenKind::StringLiteral(text) => Some(LiteralSyntax::String(text.clone())),
            TokenKind::GuidLiteral(text) => Some(LiteralSyntax::Guid(text.clone())),
            TokenKind::DateTimeLiteral(text) => Some(LiteralSyntax::DateTime(text.clone())),
            TokenKind::MeasurementKeyLiteral(text) => {
                Some(LiteralSyntax::MeasurementKey(text.clone()))
            }
            TokenKind::PointTagLiteral(text) => Some(LiteralSyntax::PointTag(text.clone())),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(self.tree.push(SyntaxNode::Literal(literal), line, column));
        }

        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            if self.consume_symbol(Symbol::LeftParen) {
                let arguments = if self.peek().is_symbol(Symbol::RightParen) {
                    Vec::new()
                } else {
                    self.parse_expression_list()?
                };
                if !self.consume_symbol(Symbol::RightParen) {
                    return Err(self.unexpected("')'"));
                }
                return Ok(self
                    .tree
                    .push(SyntaxNode::FunctionCall { name, arguments }, line, column));
            }
            return Ok(self.tree.push(SyntaxNode::ColumnName(name), line, column));
        }

        Err(self.unexpected("expression"))
    }

    fn parse_expression_list(&mut self) -> Result<Vec<NodeId>> {
        let mut items = vec![self.parse_expression()?];
        while self.consume_symbol(Symbol::Comma) {
            items.push(self.parse_expression()?);
        }
        Ok(items)
    }

    fn consume_exact_match_modifier(&mut self) -> bool {
        self.consume_keyword(Keyword::Binary) || self.consume_symbol(Symbol::TripleEqual)
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            let (line, column) = self.location();
            return Err(self.syntax_error("expression nested too deeply", line, column));
        }
        Ok(())
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek().is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_symbol(&mut self, symbol: Symbol) -> bool {
        if self.peek().is_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_semicolons(&mut self) {
        while self.consume_symbol(Symbol::Semicolon) {}
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn location(&self) -> (usize, usize) {
        let token = self.peek();
        (token.line, token.column)
    }

    fn unexpected(&self, expected: &str) -> FilterExpressionError {
        self.unexpected_token(self.peek(), expected)
    }

    fn unexpected_token(&self, token: &Token, expected: &str) -> FilterExpressionError {
        self.syntax_error(
            &format!("mismatched input {} expecting {}", token, expected),
            token.line,
            token.column,
        )
    }

    fn syntax_error(&self, message: &str, line: usize, column: usize) -> FilterExpressionError {
        FilterExpressionError::Syntax {
            message: message.to_string(),
            line,
            column,
        }
    }
}

/// Parses decimal or `0x` hexadecimal integer text.
pub(crate) fn parse_integer(text: &str) -> Option<u128> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => text.parse::<u128>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement_expression(tree: &SyntaxTree, index: usize) -> &SyntaxNode {
        match tree.node(tree.statements()[index]) {
            SyntaxNode::ExpressionStatement { expression } => tree.node(*expression),
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_statement() {
        let tree = SyntaxParser::parse(
            "FILTER TOP 10 ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY BINARY PointTag DESC, ID",
        )
        .unwrap();
        assert_eq!(tree.statements().len(), 1);
        match tree.node(tree.statements()[0]) {
            SyntaxNode::FilterStatement(filter) => {
                assert_eq!(filter.table, "ActiveMeasurements");
                assert_eq!(filter.top_limit, Some(10));
                assert_eq!(
                    filter.order_by,
                    vec![
                        OrderingTermSyntax {
                            column: "PointTag".into(),
                            ascending: false,
                            exact_match: true,
                        },
                        OrderingTermSyntax {
                            column: "ID".into(),
                            ascending: true,
                            exact_match: false,
                        },
                    ]
                );
                assert!(matches!(
                    tree.node(filter.expression),
                    SyntaxNode::OperatorPredicate {
                        op: OperatorType::Equal,
                        ..
                    }
                ));
            }
            other => panic!("Expected filter statement, got {:?}", other),
        }
    }

    #[test]
    fn test_signed_top_limit() {
        let tree = SyntaxParser::parse("FILTER TOP -1 T WHERE TRUE; FILTER TOP +3 T WHERE TRUE").unwrap();
        let limits: Vec<_> = tree
            .statements()
            .iter()
            .map(|&id| match tree.node(id) {
                SyntaxNode::FilterStatement(filter) => filter.top_limit,
                _ => None,
            })
            .collect();
        assert_eq!(limits, vec![Some(-1), Some(3)]);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let tree = SyntaxParser::parse("A OR B AND C").unwrap();
        match statement_expression(&tree, 0) {
            SyntaxNode::LogicalExpression { op, right, .. } => {
                assert_eq!(*op, OperatorType::Or);
                assert!(matches!(
                    tree.node(*right),
                    SyntaxNode::LogicalExpression {
                        op: OperatorType::And,
                        ..
                    }
                ));
            }
            other => panic!("Expected OR at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let tree = SyntaxParser::parse("1 + 2 * 3 = 7").unwrap();
        match statement_expression(&tree, 0) {
            SyntaxNode::OperatorPredicate { left, .. } => match tree.node(*left) {
                SyntaxNode::BinaryValue { op, right, .. } => {
                    assert_eq!(*op, OperatorType::Add);
                    assert!(matches!(
                        tree.node(*right),
                        SyntaxNode::BinaryValue {
                            op: OperatorType::Multiply,
                            ..
                        }
                    ));
                }
                other => panic!("Expected addition, got {:?}", other),
            },
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_negated_like_in_and_is_null() {
        let tree =
            SyntaxParser::parse("ID NOT LIKE BINARY '%:PA%'; ID !IN ===('a', 'b'); ID IS NOT NULL").unwrap();
        assert!(matches!(
            statement_expression(&tree, 0),
            SyntaxNode::OperatorPredicate {
                op: OperatorType::NotLikeExactMatch,
                ..
            }
        ));
        match statement_expression(&tree, 1) {
            SyntaxNode::InPredicate {
                list,
                negated,
                exact_match,
                ..
            } => {
                assert_eq!(list.len(), 2);
                assert!(*negated);
                assert!(*exact_match);
            }
            other => panic!("Expected IN predicate, got {:?}", other),
        }
        assert!(matches!(
            statement_expression(&tree, 2),
            SyntaxNode::IsNullPredicate { negated: true, .. }
        ));
    }

    #[test]
    fn test_identifier_statements() {
        let tree = SyntaxParser::parse(
            "{9448a8f5-f5f1-4f46-9d9a-6c6e7bb0b6d1}; PPA:12; \"DEV-FREQ\"",
        )
        .unwrap();
        let kinds: Vec<_> = tree
            .statements()
            .iter()
            .map(|&id| match tree.node(id) {
                SyntaxNode::IdentifierStatement(literal) => literal.kind,
                other => panic!("Expected identifier statement, got {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![IdentifierKind::Guid, IdentifierKind::MeasurementKey, IdentifierKind::PointTag]
        );
    }

    #[test]
    fn test_guid_in_expression_is_literal() {
        let tree = SyntaxParser::parse("SignalID = {9448a8f5-f5f1-4f46-9d9a-6c6e7bb0b6d1}").unwrap();
        assert!(matches!(
            statement_expression(&tree, 0),
            SyntaxNode::OperatorPredicate { .. }
        ));
    }

    #[test]
    fn test_function_call_arguments() {
        let tree = SyntaxParser::parse("NOW(); SUBSTR('abc', 0, 1 + 1)").unwrap();
        match statement_expression(&tree, 0) {
            SyntaxNode::FunctionCall { name, arguments } => {
                assert_eq!(name, "NOW");
                assert!(arguments.is_empty());
            }
            other => panic!("Expected function call, got {:?}", other),
        }
        match statement_expression(&tree, 1) {
            SyntaxNode::FunctionCall { arguments, .. } => assert_eq!(arguments.len(), 3),
            other => panic!("Expected function call, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_semicolon_only_input() {
        assert!(SyntaxParser::parse("").unwrap().statements().is_empty());
        assert!(SyntaxParser::parse(" ;; ").unwrap().statements().is_empty());
    }

    #[test]
    fn test_syntax_errors_report_position() {
        match SyntaxParser::parse("FILTER ActiveMeasurements SignalType = 'FREQ'") {
            Err(FilterExpressionError::Syntax { line, column, message }) => {
                assert_eq!((line, column), (1, 27));
                assert!(message.contains("WHERE"));
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
        assert!(SyntaxParser::parse("(1 + 2").is_err());
        assert!(SyntaxParser::parse("A B").is_err());
        assert!(SyntaxParser::parse("A NOT B").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let input = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(
            SyntaxParser::parse(&input),
            Err(FilterExpressionError::Syntax { .. })
        ));
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        for separator in [" OR ", " AND ", " + ", " * ", " | "] {
            let input = vec!["Name = 'x'"; 1000].join(separator);
            assert!(
                matches!(SyntaxParser::parse(&input), Err(FilterExpressionError::Syntax { .. })),
                "{}",
                separator
            );
        }
        let comparisons = vec!["1"; 1000].join(" = ");
        assert!(matches!(
            SyntaxParser::parse(&comparisons),
            Err(FilterExpressionError::Syntax { .. })
        ));
    }

    #[test]
    fn test_chain_depth_is_released_between_operands() {
        let chain = vec!["Name = 'x'"; 100].join(" OR ");
        assert!(SyntaxParser::parse(&chain).is_ok());
        // Sibling chains inside an IN list and across statements do not add up
        let list = vec![chain.clone(); 3].join(", ");
        assert!(SyntaxParser::parse(&format!("Name IN ({})", list)).is_ok());
        assert!(SyntaxParser::parse(&vec![chain; 5].join("; ")).is_ok());
    }

    #[test]
    fn test_parse_integer_hex() {
        assert_eq!(parse_integer("0x1F"), Some(31));
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("x"), None);
    }
}
