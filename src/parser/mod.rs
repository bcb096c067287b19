use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

const MAX_ERRORS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn infix_precedence(token: &Token) -> Precedence {
    match token {
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Asterisk | Token::Slash => Precedence::Product,
        Token::LParen => Precedence::Call,
        Token::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

fn infix_operator(token: &Token) -> Option<InfixOp> {
    Some(match token {
        Token::Plus => InfixOp::Add,
        Token::Minus => InfixOp::Subtract,
        Token::Asterisk => InfixOp::Multiply,
        Token::Slash => InfixOp::Divide,
        Token::Eq => InfixOp::Equals,
        Token::NotEq => InfixOp::NotEquals,
        Token::Lt => InfixOp::LessThan,
        Token::Gt => InfixOp::GreaterThan,
        _ => return None,
    })
}

/// Parse a lexed token stream. Returns every error found (up to a cap) when the
/// program is malformed.
pub fn parse(tokens: Vec<(Token, Span)>) -> std::result::Result<Program, Vec<ParseError>> {
    let (program, errors) = Parser::new(tokens).parse_program();
    if errors.is_empty() { Ok(program) } else { Err(errors) }
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .or_else(|| self.tokens.last().map(|(_, s)| Span { start: s.end, end: s.end }))
            .unwrap_or(Span::UNKNOWN)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => {
                let message = format!("expected {}, got {}", expected.describe(), tok.describe());
                Err(self.error("P001", message))
            }
            None => Err(self.error("P002", format!("expected {}, got end of input", expected.describe()))),
        }
    }

    fn expect_ident(&mut self) -> Result<Identifier> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                let span = self.peek_span();
                self.advance();
                Ok(Identifier::new(name, span))
            }
            Some(tok) => Err(self.error("P003", format!("expected identifier, got {}", tok.describe()))),
            None => Err(self.error("P004", "expected identifier, got end of input".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.sync_to_statement_boundary();
                }
            }
        }

        (Program { statements, source: None }, errors)
    }

    /// Skip to just past the next top-level `;` (or to EOF), keeping brace
    /// depth so a `;` inside a block doesn't end recovery early.
    fn sync_to_statement_boundary(&mut self) {
        let start = self.pos;
        let mut depth: usize = 0;
        while let Some(tok) = self.peek() {
            match tok {
                Token::LBrace => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
        // Always make progress, even when the failing token was the last one.
        if self.pos == start {
            self.advance();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let stmt = match self.peek() {
            Some(Token::Let) => self.parse_let_statement()?,
            Some(Token::Return) => self.parse_return_statement()?,
            _ => Statement::Expression(self.parse_expression(Precedence::Lowest)?),
        };
        self.eat(&Token::Semicolon);
        Ok(stmt)
    }

    /// `let name = value`
    fn parse_let_statement(&mut self) -> Result<Statement> {
        self.expect(&Token::Let)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let value = self.parse_expression(Precedence::Lowest)?;
        Ok(Statement::Let { name, value })
    }

    /// `return value` or bare `return`
    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.expect(&Token::Return)?;
        if matches!(self.peek(), None | Some(Token::Semicolon) | Some(Token::RBrace)) {
            return Ok(Statement::Return(None));
        }
        Ok(Statement::Return(Some(self.parse_expression(Precedence::Lowest)?)))
    }

    fn parse_block(&mut self) -> Result<BlockStatement> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                None => return Err(self.error("P005", "unterminated block, expected '}'".into())),
                _ => statements.push(self.parse_statement()?),
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(BlockStatement { statements })
    }

    // ---- Expressions ----

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut left = self.parse_prefix()?;

        loop {
            let next = match self.peek() {
                Some(tok) if *tok != Token::Semicolon && precedence < infix_precedence(tok) => tok.clone(),
                _ => break,
            };
            left = match next {
                Token::LParen => self.parse_call(left)?,
                Token::LBracket => self.parse_index(left)?,
                _ => self.parse_infix(left)?,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        let span = self.peek_span();
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(Expression::Identifier(Identifier::new(name, span)))
            }
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expression::Integer(n))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expression::String(s))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expression::Boolean(true))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expression::Boolean(false))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Expression::Null)
            }
            Some(Token::Bang) | Some(Token::Minus) => {
                let operator = if self.advance() == Some(&Token::Bang) {
                    PrefixOp::Not
                } else {
                    PrefixOp::Negate
                };
                let right = self.parse_expression(Precedence::Prefix)?;
                Ok(Expression::Prefix { operator, right: Box::new(right) })
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::Function) => self.parse_function(),
            Some(Token::LBracket) => {
                self.advance();
                let elements = self.parse_expression_list(&Token::RBracket)?;
                Ok(Expression::Array(elements))
            }
            Some(Token::LBrace) => self.parse_hash(),
            Some(tok) => {
                let hint = if infix_operator(&tok).is_some() {
                    " (binary operators need a left operand)"
                } else {
                    ""
                };
                Err(self.error("P006", format!("unexpected {} at start of expression{}", tok.describe(), hint)))
            }
            None => Err(self.error("P007", "expected expression, got end of input".into())),
        }
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error("P007", "expected operator, got end of input".into()));
        };
        let Some(operator) = infix_operator(&tok) else {
            return Err(self.error("P008", format!("{} is not an infix operator", tok.describe())));
        };
        let precedence = infix_precedence(&tok);
        self.advance();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    /// `if (cond) { ... } [else { ... }]`
    fn parse_if(&mut self) -> Result<Expression> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&Token::RParen)?;
        let consequence = self.parse_block()?;
        let alternative = if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    /// `fn(a, b) { ... }`
    fn parse_function(&mut self) -> Result<Expression> {
        self.expect(&Token::Function)?;
        self.expect(&Token::LParen)?;
        let mut parameters = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                parameters.push(self.expect_ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        let body = self.parse_block()?;
        Ok(Expression::Function(FunctionLiteral { parameters, body }))
    }

    fn parse_call(&mut self, function: Expression) -> Result<Expression> {
        self.expect(&Token::LParen)?;
        let arguments = self.parse_expression_list(&Token::RParen)?;
        Ok(Expression::Call { function: Box::new(function), arguments })
    }

    fn parse_index(&mut self, left: Expression) -> Result<Expression> {
        self.expect(&Token::LBracket)?;
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect(&Token::RBracket)?;
        Ok(Expression::Index { left: Box::new(left), index: Box::new(index) })
    }

    /// Comma-separated expressions up to and including `end`. The opening
    /// delimiter has already been consumed.
    fn parse_expression_list(&mut self, end: &Token) -> Result<Vec<Expression>> {
        let mut items = Vec::new();
        if self.eat(end) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression(Precedence::Lowest)?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(end)?;
        Ok(items)
    }

    /// `{key: value, ...}`
    fn parse_hash(&mut self) -> Result<Expression> {
        let start = self.peek_span();
        self.expect(&Token::LBrace)?;
        let mut pairs = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.at_end() {
                return Err(ParseError {
                    code: "P009",
                    position: self.pos,
                    span: start.merge(self.prev_span()),
                    message: "unterminated hash literal, expected '}'".into(),
                });
            }
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(&Token::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if self.peek() != Some(&Token::RBrace) {
                self.expect(&Token::Comma)?;
            }
        }
        Ok(Expression::Hash(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_source(source: &str) -> Program {
        parse(lexer::lex(source).unwrap()).unwrap()
    }

    fn parse_errors(source: &str) -> Vec<ParseError> {
        parse(lexer::lex(source).unwrap()).unwrap_err()
    }

    fn single_expression(source: &str) -> Expression {
        let program = parse_source(source);
        assert_eq!(program.statements.len(), 1, "program: {}", program);
        match program.statements.into_iter().next() {
            Some(Statement::Expression(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parse_let_statements() {
        let program = parse_source("let x = 5; let y = true; let foobar = y;");
        assert_eq!(program.statements.len(), 3);
        match &program.statements[0] {
            Statement::Let { name, value } => {
                assert_eq!(name.name, "x");
                assert_eq!(name.span, Span { start: 4, end: 5 });
                assert_eq!(*value, Expression::Integer(5));
            }
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn parse_return_statements() {
        let program = parse_source("return 5; return; fn() { return }");
        assert_eq!(program.statements[0], Statement::Return(Some(Expression::Integer(5))));
        assert_eq!(program.statements[1], Statement::Return(None));
    }

    #[test]
    fn operator_precedence_rendering() {
        let cases = [
            ("-a * b", "((-a) * b)"),
            ("!-a", "(!(-a))"),
            ("a + b * c + d / e - f", "(((a + (b * c)) + (d / e)) - f)"),
            ("5 > 4 == 3 < 4", "((5 > 4) == (3 < 4))"),
            ("3 + 4 * 5 == 3 * 1 + 4 * 5", "((3 + (4 * 5)) == ((3 * 1) + (4 * 5)))"),
            ("(5 + 5) * 2", "((5 + 5) * 2)"),
            ("a + add(b * c) + d", "((a + add((b * c))) + d)"),
            ("a * [1, 2, 3, 4][b * c] * d", "((a * ([1, 2, 3, 4][(b * c)])) * d)"),
            ("add(a * b[2], b[1], 2 * [1, 2][1])", "add((a * (b[2])), (b[1]), (2 * ([1, 2][1])))"),
        ];
        for (source, expected) in cases {
            assert_eq!(parse_source(source).to_string(), expected, "source: {}", source);
        }
    }

    #[test]
    fn parse_if_else() {
        match single_expression("if (x < y) { x } else { y }") {
            Expression::If { consequence, alternative, .. } => {
                assert_eq!(consequence.statements.len(), 1);
                assert!(alternative.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn parse_function_literal_parameters() {
        for (source, expected) in [("fn() {};", 0), ("fn(x) {};", 1), ("fn(x, y, z) {};", 3)] {
            match single_expression(source) {
                Expression::Function(func) => assert_eq!(func.parameters.len(), expected),
                other => panic!("expected function, got {:?}", other),
            }
        }
    }

    #[test]
    fn parse_hash_literals() {
        match single_expression(r#"{"one": 1, "two": 2, true: 3}"#) {
            Expression::Hash(pairs) => {
                assert_eq!(pairs.len(), 3);
                assert_eq!(pairs[0].0, Expression::String("one".to_string()));
                assert_eq!(pairs[2].0, Expression::Boolean(true));
            }
            other => panic!("expected hash, got {:?}", other),
        }
        assert_eq!(single_expression("{}"), Expression::Hash(vec![]));
    }

    #[test]
    fn parse_null_literal() {
        assert_eq!(single_expression("null"), Expression::Null);
    }

    #[test]
    fn semicolons_are_optional() {
        let program = parse_source("let a = 1\nlet b = 2\na + b");
        assert_eq!(program.statements.len(), 3);
    }

    #[test]
    fn missing_assign_reports_code() {
        let errors = parse_errors("let x 5;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "P001");
        assert!(errors[0].message.contains("'='"), "message: {}", errors[0].message);
    }

    #[test]
    fn recovers_and_collects_multiple_errors() {
        let errors = parse_errors("let = 1; let y = ; let z = 3;");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn unterminated_block_errors() {
        let errors = parse_errors("fn(x) { x");
        assert!(errors.iter().any(|e| e.code == "P005"));
    }

    #[test]
    fn leading_binary_operator_hint() {
        let errors = parse_errors("* 5");
        assert_eq!(errors[0].code, "P006");
        assert!(errors[0].message.contains("left operand"));
    }
}
