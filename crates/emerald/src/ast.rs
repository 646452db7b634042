//! Abstract syntax tree produced by the parser, consumed by the evaluator.
//!
//! `spec.md` §4.5 describes AST nodes as keeping "the operator token(s) in
//! their token array ... and the operands as child nodes". We keep the
//! same shape with ordinary Rust fields instead of a generic token array:
//! a small `BinOp`/`UnaryOp` enum in place of the raw operator token, and
//! child nodes as typed fields rather than an untyped children vector.

use std::rc::Rc;

use crate::position::Position;

pub type NodeRef = Rc<Node>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitOr,
    BitAnd,
    Shl,
    Shr,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Position,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind, pos: Position) -> NodeRef {
        Rc::new(Self { kind, pos })
    }
}

/// An assignment target: the dotted-path prefix plus an optional trailing
/// index, per `spec.md` §4.9's `let` walk ("all tokens except the last
/// walk the scope's map via `get_by_hash`; the last token (or an index
/// expression, if present) performs the set").
#[derive(Debug)]
pub struct AssignTarget {
    pub path: Vec<Rc<str>>,
    pub index: Option<NodeRef>,
}

#[derive(Debug)]
pub enum NodeKind {
    IntLit(i64),
    FloatLit(f64),
    StringLit(Rc<[char]>),
    Ident(Rc<str>),
    ListLit(Vec<NodeRef>),
    MapLit(Vec<(NodeRef, NodeRef)>),

    BinOp { op: BinOp, left: NodeRef, right: NodeRef },
    UnaryOp { op: UnaryOp, operand: NodeRef },

    Call { callee: NodeRef, args: Vec<NodeRef> },
    MemberAccess { object: NodeRef, name: Rc<str> },
    Index { object: NodeRef, index: NodeRef },

    Let { target: AssignTarget, value: NodeRef },
    Func { name: Option<Rc<str>>, params: Vec<Rc<str>>, body: NodeRef },
    Class { name: Rc<str>, base: Option<NodeRef>, body: NodeRef },
    Try {
        try_block: NodeRef,
        catch_name: Option<Rc<str>>,
        catch_class: Option<NodeRef>,
        catch_block: NodeRef,
    },
    If { branches: Vec<(NodeRef, NodeRef)>, else_block: Option<NodeRef> },
    For { var: Rc<str>, start: NodeRef, end: NodeRef, body: NodeRef },
    Foreach { var: Rc<str>, iter: NodeRef, body: NodeRef },
    While { cond: NodeRef, body: NodeRef },

    Puts(Vec<NodeRef>),
    Return(NodeRef),
    Raise(NodeRef),
    Include(NodeRef),
    Break,
    Continue,

    /// A sequence of statements; the value of a block is its last
    /// expression's value (`none` if empty), per `spec.md` §4.9's
    /// `visit_block`.
    Block(Vec<NodeRef>),
}
