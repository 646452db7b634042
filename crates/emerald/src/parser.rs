//! Recursive-descent parser: tokens to [`crate::ast`].
//!
//! Grounded on `original_source/src/emerald/parser.c`'s `em_parser_statement`
//! / `em_parser_binop` shape, mirrored by `spec.md` §4.5's grammar. Each
//! precedence level is a small method; [`Parser::binop_level`] is the
//! "shared helper taking (higher-precedence function, set-of-operators)"
//! the spec calls for.

use std::rc::Rc;

use crate::ast::{AssignTarget, BinOp, Node, NodeKind, NodeRef, UnaryOp};
use crate::diagnostics::RaisedError;
use crate::token::{Keyword, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

type PResult = Result<NodeRef, RaisedError>;

impl Parser {
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }

    fn is_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        self.current().is_keyword(kw)
    }

    fn expect_keyword(&mut self, kw: Keyword, what: &str) -> Result<(), RaisedError> {
        if self.is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(RaisedError::syntax(format!("Expected '{what}'"), &self.current().pos))
        }
    }

    fn expect_ident(&mut self) -> Result<Rc<str>, RaisedError> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(RaisedError::syntax("Expected an identifier", &self.current().pos)),
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> Result<(), RaisedError> {
        if self.current().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(RaisedError::syntax(format!("Expected '{what}'"), &self.current().pos))
        }
    }

    /// `program := statement*`; the whole source is one implicit block.
    pub fn parse_program(&mut self) -> PResult {
        let block = self.parse_block(&[])?;
        if !self.is_eof() {
            return Err(RaisedError::syntax("Expected end of file", &self.current().pos));
        }
        Ok(block)
    }

    /// Statements until EOF or a keyword in `terminators` (not consumed).
    fn parse_block(&mut self, terminators: &[Keyword]) -> PResult {
        let pos = self.current().pos.clone();
        let mut statements = Vec::new();
        while !self.is_eof() && !terminators.iter().any(|kw| self.is_keyword(*kw)) {
            statements.push(self.statement()?);
        }
        Ok(Node::new(NodeKind::Block(statements), pos))
    }

    fn statement(&mut self) -> PResult {
        let pos = self.current().pos.clone();

        if self.is_keyword(Keyword::Continue) {
            self.advance();
            return Ok(Node::new(NodeKind::Continue, pos));
        }
        if self.is_keyword(Keyword::Break) {
            self.advance();
            return Ok(Node::new(NodeKind::Break, pos));
        }
        if self.is_keyword(Keyword::Return) {
            self.advance();
            let expr = self.expr()?;
            return Ok(Node::new(NodeKind::Return(expr), pos));
        }
        if self.is_keyword(Keyword::Raise) {
            self.advance();
            let expr = self.expr()?;
            return Ok(Node::new(NodeKind::Raise(expr), pos));
        }
        if self.is_keyword(Keyword::Include) {
            self.advance();
            let expr = self.expr()?;
            return Ok(Node::new(NodeKind::Include(expr), pos));
        }
        self.expr()
    }

    /// `expr := comp ((and|or) comp)*`, evaluated non-short-circuit.
    fn expr(&mut self) -> PResult {
        self.binop_level(Self::comp, |kind| match kind {
            TokenKind::Keyword(Keyword::And) => Some(BinOp::And),
            TokenKind::Keyword(Keyword::Or) => Some(BinOp::Or),
            _ => None,
        })
    }

    fn comp(&mut self) -> PResult {
        self.binop_level(Self::arith, |kind| match kind {
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::NotEq => Some(BinOp::NotEq),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::LtEq => Some(BinOp::LtEq),
            TokenKind::GtEq => Some(BinOp::GtEq),
            _ => None,
        })
    }

    fn arith(&mut self) -> PResult {
        self.binop_level(Self::term, |kind| match kind {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            TokenKind::Pipe => Some(BinOp::BitOr),
            TokenKind::Amp => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn term(&mut self) -> PResult {
        self.binop_level(Self::call, |kind| match kind {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Shl => Some(BinOp::Shl),
            TokenKind::Shr => Some(BinOp::Shr),
            TokenKind::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn binop_level(
        &mut self,
        sub: fn(&mut Self) -> PResult,
        matcher: impl Fn(&TokenKind) -> Option<BinOp>,
    ) -> PResult {
        let mut left = sub(self)?;
        while let Some(op) = matcher(&self.current().kind) {
            let pos = self.current().pos.clone();
            self.advance();
            let right = sub(self)?;
            left = Node::new(NodeKind::BinOp { op, left, right }, pos);
        }
        Ok(left)
    }

    /// `call := factor call_tail*`
    fn call(&mut self) -> PResult {
        let mut node = self.factor()?;
        loop {
            match &self.current().kind {
                TokenKind::LParen => {
                    let pos = self.current().pos.clone();
                    self.advance();
                    let args = self.arg_list(TokenKind::RParen)?;
                    self.expect_kind(TokenKind::RParen, ")")?;
                    node = Node::new(NodeKind::Call { callee: node, args }, pos);
                }
                TokenKind::Dot => {
                    let pos = self.current().pos.clone();
                    self.advance();
                    let name = self.expect_ident()?;
                    node = Node::new(NodeKind::MemberAccess { object: node, name }, pos);
                }
                TokenKind::LBracket => {
                    let pos = self.current().pos.clone();
                    self.advance();
                    let index = self.expr()?;
                    self.expect_kind(TokenKind::RBracket, "]")?;
                    node = Node::new(NodeKind::Index { object: node, index }, pos);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn arg_list(&mut self, end: TokenKind) -> Result<Vec<NodeRef>, RaisedError> {
        let mut args = Vec::new();
        if self.current().kind == end {
            return Ok(args);
        }
        args.push(self.expr()?);
        while self.current().kind == TokenKind::Comma {
            self.advance();
            args.push(self.expr()?);
        }
        Ok(args)
    }

    /// `factor := (+|-|~|not) factor | '(' expr ')' | list | map | literals
    ///          | let/func/class/try/if/for/foreach/while | puts`
    fn factor(&mut self) -> PResult {
        let pos = self.current().pos.clone();

        let unary = match &self.current().kind {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Keyword(Keyword::Not) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.factor()?;
            return Ok(Node::new(NodeKind::UnaryOp { op, operand }, pos));
        }

        match self.current().kind.clone() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect_kind(TokenKind::RParen, ")")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.arg_list(TokenKind::RBracket)?;
                self.expect_kind(TokenKind::RBracket, "]")?;
                Ok(Node::new(NodeKind::ListLit(items), pos))
            }
            TokenKind::LBrace => self.map_lit(pos),
            TokenKind::Int(n) => {
                self.advance();
                Ok(Node::new(NodeKind::IntLit(n), pos))
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Node::new(NodeKind::FloatLit(f), pos))
            }
            TokenKind::String(chars) => {
                self.advance();
                Ok(Node::new(NodeKind::StringLit(chars), pos))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Node::new(NodeKind::Ident(name), pos))
            }
            TokenKind::Keyword(Keyword::Let) => self.let_stmt(),
            TokenKind::Keyword(Keyword::Func) => self.func_stmt(),
            TokenKind::Keyword(Keyword::Class) => self.class_stmt(),
            TokenKind::Keyword(Keyword::Try) => self.try_stmt(),
            TokenKind::Keyword(Keyword::If) => self.if_stmt(),
            TokenKind::Keyword(Keyword::For) => self.for_stmt(),
            TokenKind::Keyword(Keyword::Foreach) => self.foreach_stmt(),
            TokenKind::Keyword(Keyword::While) => self.while_stmt(),
            TokenKind::Keyword(Keyword::Puts) => self.puts_stmt(),
            _ => Err(RaisedError::syntax("Unexpected token", &pos)),
        }
    }

    fn map_lit(&mut self, pos: crate::position::Position) -> PResult {
        self.advance(); // '{'
        let mut entries = Vec::new();
        if self.current().kind != TokenKind::RBrace {
            loop {
                let key = self.expr()?;
                self.expect_kind(TokenKind::Colon, ":")?;
                let value = self.expr()?;
                entries.push((key, value));
                if self.current().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_kind(TokenKind::RBrace, "}")?;
        Ok(Node::new(NodeKind::MapLit(entries), pos))
    }

    /// `let_stmt := 'let' IDENT ('.' IDENT)* ('[' expr ']')? '=' expr`
    fn let_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'let'
        let mut path = vec![self.expect_ident()?];
        while self.current().kind == TokenKind::Dot {
            self.advance();
            path.push(self.expect_ident()?);
        }
        let index = if self.current().kind == TokenKind::LBracket {
            self.advance();
            let idx = self.expr()?;
            self.expect_kind(TokenKind::RBracket, "]")?;
            Some(idx)
        } else {
            None
        };
        self.expect_kind(TokenKind::Eq, "=")?;
        let value = self.expr()?;
        Ok(Node::new(NodeKind::Let { target: AssignTarget { path, index }, value }, pos))
    }

    fn arg_names(&mut self) -> Result<Vec<Rc<str>>, RaisedError> {
        let mut names = Vec::new();
        if self.current().kind == TokenKind::RParen {
            return Ok(names);
        }
        names.push(self.expect_ident()?);
        while self.current().kind == TokenKind::Comma {
            self.advance();
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    /// `func_stmt := 'func' IDENT? '(' arg_names ')' 'then' block 'end'`
    fn func_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'func'
        let name = match &self.current().kind {
            TokenKind::Ident(n) => {
                let n = n.clone();
                self.advance();
                Some(n)
            }
            _ => None,
        };
        self.expect_kind(TokenKind::LParen, "(")?;
        let params = self.arg_names()?;
        self.expect_kind(TokenKind::RParen, ")")?;
        self.expect_keyword(Keyword::Then, "then")?;
        let body = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::Func { name, params, body }, pos))
    }

    /// `class_stmt := 'class' IDENT ('of' expr)? 'then' block 'end'`
    fn class_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'class'
        let name = self.expect_ident()?;
        let base = if self.is_keyword(Keyword::Of) {
            self.advance();
            Some(self.expr()?)
        } else {
            None
        };
        self.expect_keyword(Keyword::Then, "then")?;
        let body = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::Class { name, base, body }, pos))
    }

    /// `try_stmt := 'try' 'then' block 'catch' (IDENT '=' expr)? 'then' block 'end'`
    fn try_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'try'
        self.expect_keyword(Keyword::Then, "then")?;
        let try_block = self.parse_block(&[Keyword::Catch])?;
        self.expect_keyword(Keyword::Catch, "catch")?;

        let (catch_name, catch_class) = if let TokenKind::Ident(_) = &self.current().kind {
            let name = self.expect_ident()?;
            self.expect_kind(TokenKind::Eq, "=")?;
            let class = self.expr()?;
            (Some(name), Some(class))
        } else {
            (None, None)
        };

        self.expect_keyword(Keyword::Then, "then")?;
        let catch_block = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(
            NodeKind::Try { try_block, catch_name, catch_class, catch_block },
            pos,
        ))
    }

    /// `if_stmt := 'if' expr 'then' block ('elif' expr 'then' block)* ('else' 'then' block)? 'end'`
    fn if_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'if'
        let mut branches = Vec::new();

        let cond = self.expr()?;
        self.expect_keyword(Keyword::Then, "then")?;
        let block = self.parse_block(&[Keyword::Elif, Keyword::Else, Keyword::End])?;
        branches.push((cond, block));

        while self.is_keyword(Keyword::Elif) {
            self.advance();
            let cond = self.expr()?;
            self.expect_keyword(Keyword::Then, "then")?;
            let block = self.parse_block(&[Keyword::Elif, Keyword::Else, Keyword::End])?;
            branches.push((cond, block));
        }

        let else_block = if self.is_keyword(Keyword::Else) {
            self.advance();
            self.expect_keyword(Keyword::Then, "then")?;
            Some(self.parse_block(&[Keyword::End])?)
        } else {
            None
        };

        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::If { branches, else_block }, pos))
    }

    /// `for_stmt := 'for' IDENT '=' expr 'to' expr 'then' block 'end'`
    fn for_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'for'
        let var = self.expect_ident()?;
        self.expect_kind(TokenKind::Eq, "=")?;
        let start = self.expr()?;
        self.expect_keyword(Keyword::To, "to")?;
        let end = self.expr()?;
        self.expect_keyword(Keyword::Then, "then")?;
        let body = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::For { var, start, end, body }, pos))
    }

    /// `foreach_stmt := 'foreach' IDENT 'in' expr 'then' block 'end'`
    fn foreach_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'foreach'
        let var = self.expect_ident()?;
        self.expect_keyword(Keyword::In, "in")?;
        let iter = self.expr()?;
        self.expect_keyword(Keyword::Then, "then")?;
        let body = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::Foreach { var, iter, body }, pos))
    }

    /// `while_stmt := 'while' expr 'then' block 'end'`
    fn while_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'while'
        let cond = self.expr()?;
        self.expect_keyword(Keyword::Then, "then")?;
        let body = self.parse_block(&[Keyword::End])?;
        self.expect_keyword(Keyword::End, "end")?;
        Ok(Node::new(NodeKind::While { cond, body }, pos))
    }

    /// `'puts' expr (',' expr)*`
    fn puts_stmt(&mut self) -> PResult {
        let pos = self.current().pos.clone();
        self.advance(); // 'puts'
        let mut exprs = vec![self.expr()?];
        while self.current().kind == TokenKind::Comma {
            self.advance();
            exprs.push(self.expr()?);
        }
        Ok(Node::new(NodeKind::Puts(exprs), pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> NodeRef {
        let tokens = Lexer::new("t", src).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let node = parse("1 + 2 * 3");
        let NodeKind::Block(stmts) = &node.kind else { panic!() };
        assert_eq!(stmts.len(), 1);
        let NodeKind::BinOp { op: BinOp::Add, right, .. } = &stmts[0].kind else { panic!("expected top-level add") };
        assert!(matches!(right.kind, NodeKind::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_let_with_dotted_index_target() {
        let node = parse("let a.b[0] = 1");
        let NodeKind::Block(stmts) = &node.kind else { panic!() };
        let NodeKind::Let { target, .. } = &stmts[0].kind else { panic!("expected let") };
        assert_eq!(target.path.len(), 2);
        assert!(target.index.is_some());
    }

    #[test]
    fn parses_if_elif_else() {
        let node = parse("if 1 then puts 1 elif 2 then puts 2 else then puts 3 end");
        let NodeKind::Block(stmts) = &node.kind else { panic!() };
        let NodeKind::If { branches, else_block } = &stmts[0].kind else { panic!("expected if") };
        assert_eq!(branches.len(), 2);
        assert!(else_block.is_some());
    }

    #[test]
    fn parses_func_and_call() {
        let node = parse("func f(x, y) then return x end\nf(1, 2)");
        let NodeKind::Block(stmts) = &node.kind else { panic!() };
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0].kind, NodeKind::Func { .. }));
        assert!(matches!(stmts[1].kind, NodeKind::Call { .. }));
    }

    #[test]
    fn missing_end_is_syntax_error() {
        let tokens = Lexer::new("t", "if 1 then puts 1").tokenize().unwrap();
        assert!(Parser::new(tokens).parse_program().is_err());
    }
}
