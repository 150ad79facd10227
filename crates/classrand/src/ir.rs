use crate::HashSet;
use num_bigint::BigUint;
use std::fmt;

mod builder;
pub mod dtype;

pub use dtype::{DType, DTypeId, EnumDType, EnumItem, StructDType, StructMember, TypeTable};

/// Source position used to stamp nodes for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileLine {
    pub line: u32,
    pub column: u32,
}

impl FileLine {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for FileLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub usize);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func{}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod{}", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub loc: FileLine,
    pub extends: Option<ClassId>,
    pub members: Vec<ClassMember>,
    /// Transient mark owned by the randomize pass.
    pub needs_randomize: bool,
}

#[derive(Debug, Clone)]
pub enum ClassMember {
    Var(VarId),
    Constraint(Constraint),
    Func(FuncId),
}

/// A named constraint block. Its conditions are implicitly ANDed.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub loc: FileLine,
    pub conds: Vec<ExprId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    Member,
    FuncLocal,
    FuncParam,
    FuncReturn,
    /// Static variable of the `$unit` package.
    PackageStatic,
    ModuleVar,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub loc: FileLine,
    pub dtype: DTypeId,
    pub kind: VarKind,
    pub is_rand: bool,
    pub is_const: bool,
    pub init: Option<ExprId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncOwner {
    Class(ClassId),
    Module(ModuleId),
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub loc: FileLine,
    pub owner: FuncOwner,
    pub return_var: VarId,
    pub params: Vec<VarId>,
    pub locals: Vec<VarId>,
    pub body: Vec<Stmt>,
    pub class_method: bool,
    pub is_virtual: bool,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub loc: FileLine,
    pub vars: Vec<VarId>,
    pub funcs: Vec<FuncId>,
    pub initial: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Assign { lhs: ExprId, rhs: ExprId },
    Case { selector: ExprId, items: Vec<CaseItem> },
    /// Expression evaluated for its side effects (a bare call).
    Expr(ExprId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseItem {
    pub value: ExprId,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    ModDiv,
    ModDivS,
    And,
    Or,
    LogAnd,
    LogOr,
    Eq,
    EqWild,
    Neq,
    LtU,
    LtS,
    LteU,
    LteS,
    GtU,
    GtS,
    GteU,
    GteS,
}

impl BinaryOp {
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            BinaryOp::LogAnd
                | BinaryOp::LogOr
                | BinaryOp::Eq
                | BinaryOp::EqWild
                | BinaryOp::Neq
                | BinaryOp::LtU
                | BinaryOp::LtS
                | BinaryOp::LteU
                | BinaryOp::LteS
                | BinaryOp::GtU
                | BinaryOp::GtS
                | BinaryOp::GteU
                | BinaryOp::GteS
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::ModDiv => "%",
            BinaryOp::ModDivS => "%s",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::LogAnd => "&&",
            BinaryOp::LogOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::EqWild => "==?",
            BinaryOp::Neq => "!=",
            BinaryOp::LtU => "<",
            BinaryOp::LtS => "<s",
            BinaryOp::LteU => "<=",
            BinaryOp::LteS => "<=s",
            BinaryOp::GtU => ">",
            BinaryOp::GtS => ">s",
            BinaryOp::GteU => ">=",
            BinaryOp::GteS => ">=s",
        };
        write!(f, "{}", op_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// Width and signedness come from the node's dtype.
    Const(BigUint),
    VarRef(VarId),
    MemberSel { from: ExprId, var: VarId },
    Extend { expr: ExprId, signed: bool },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    /// Bit slice `from[lsb +: width]`.
    Sel { from: ExprId, lsb: usize, width: usize },
    ArraySel { from: ExprId, index: ExprId },
    /// Uniformly random bit pattern spanning the node's width.
    Random,
    /// `from.name(args)`. For `randomize` the arguments are inline constraints.
    MethodCall {
        from: ExprId,
        name: String,
        func: Option<FuncId>,
        args: Vec<ExprId>,
    },
    FuncCall { func: FuncId, args: Vec<ExprId> },
    InitArray(Vec<ExprId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub dtype: DTypeId,
    pub loc: FileLine,
}

impl Expr {
    pub fn children(&self) -> Vec<ExprId> {
        match &self.kind {
            ExprKind::Const(_) | ExprKind::VarRef(_) | ExprKind::Random => vec![],
            ExprKind::MemberSel { from, .. } => vec![*from],
            ExprKind::Extend { expr, .. } => vec![*expr],
            ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Sel { from, .. } => vec![*from],
            ExprKind::ArraySel { from, index } => vec![*from, *index],
            ExprKind::MethodCall { from, args, .. } => {
                let mut children = vec![*from];
                children.extend(args.iter().copied());
                children
            }
            ExprKind::FuncCall { args, .. } => args.clone(),
            ExprKind::InitArray(values) => values.clone(),
        }
    }
}

/// Expression storage. Nodes are never freed; replacing a node overwrites its slot
/// so every parent referring to the id observes the new node.
#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.0]
    }

    pub fn replace(&mut self, id: ExprId, expr: Expr) -> Expr {
        std::mem::replace(&mut self.nodes[id.0], expr)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deep copy of the subtree rooted at `id`.
    pub fn clone_tree(&mut self, id: ExprId) -> ExprId {
        let mut expr = self.get(id).clone();
        expr.kind = match expr.kind {
            ExprKind::MemberSel { from, var } => ExprKind::MemberSel {
                from: self.clone_tree(from),
                var,
            },
            ExprKind::Extend { expr, signed } => ExprKind::Extend {
                expr: self.clone_tree(expr),
                signed,
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.clone_tree(lhs),
                rhs: self.clone_tree(rhs),
            },
            ExprKind::Sel { from, lsb, width } => ExprKind::Sel {
                from: self.clone_tree(from),
                lsb,
                width,
            },
            ExprKind::ArraySel { from, index } => ExprKind::ArraySel {
                from: self.clone_tree(from),
                index: self.clone_tree(index),
            },
            ExprKind::MethodCall {
                from,
                name,
                func,
                args,
            } => ExprKind::MethodCall {
                from: self.clone_tree(from),
                name,
                func,
                args: args.into_iter().map(|a| self.clone_tree(a)).collect(),
            },
            ExprKind::FuncCall { func, args } => ExprKind::FuncCall {
                func,
                args: args.into_iter().map(|a| self.clone_tree(a)).collect(),
            },
            ExprKind::InitArray(values) => {
                ExprKind::InitArray(values.into_iter().map(|v| self.clone_tree(v)).collect())
            }
            kind @ (ExprKind::Const(_) | ExprKind::VarRef(_) | ExprKind::Random) => kind,
        };
        self.alloc(expr)
    }
}

/// Where an expression tree hangs in the netlist. Used to know the scope of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Module(ModuleId),
    Func(FuncId),
}

/// The whole-program tree.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub dtypes: TypeTable,
    pub classes: Vec<Class>,
    pub vars: Vec<Variable>,
    pub funcs: Vec<Func>,
    pub modules: Vec<Module>,
    pub exprs: ExprArena,
    /// Statics of the `$unit` package. Enum value tables are added here.
    pub unit_package: Vec<VarId>,
}

impl Netlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0]
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id.0]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Func {
        &mut self.funcs[id.0]
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        self.exprs.get(id)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + use<> {
        (0..self.classes.len()).map(ClassId)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + use<> {
        (0..self.modules.len()).map(ModuleId)
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(ClassId)
    }

    /// `class` followed by its base chain, most derived first.
    pub fn class_chain(&self, class: ClassId) -> ClassChain<'_> {
        ClassChain {
            netlist: self,
            next: Some(class),
            seen: HashSet::default(),
        }
    }

    pub fn member_vars(&self, class: ClassId) -> impl Iterator<Item = VarId> + '_ {
        self.class(class).members.iter().filter_map(|m| match m {
            ClassMember::Var(v) => Some(*v),
            _ => None,
        })
    }

    pub fn constraints(&self, class: ClassId) -> impl Iterator<Item = &Constraint> + '_ {
        self.class(class).members.iter().filter_map(|m| match m {
            ClassMember::Constraint(c) => Some(c),
            _ => None,
        })
    }

    /// Looks up a function declared directly in `class` (base classes are not searched).
    pub fn find_member_func(&self, class: ClassId, name: &str) -> Option<FuncId> {
        self.class(class).members.iter().find_map(|m| match m {
            ClassMember::Func(f) if self.func(*f).name == name => Some(*f),
            _ => None,
        })
    }

    /// Resolves a method by name along the base chain, the way virtual dispatch does.
    pub fn resolve_method(&self, class: ClassId, name: &str) -> Option<FuncId> {
        self.class_chain(class)
            .find_map(|c| self.find_member_func(c, name))
    }

    /// Finds a member variable by name along the base chain.
    pub fn find_member_var(&self, class: ClassId, name: &str) -> Option<VarId> {
        self.class_chain(class)
            .find_map(|c| self.member_vars(c).find(|v| self.var(*v).name == name))
    }

    /// Class of the object the expression evaluates to, if it is a class handle.
    pub fn class_of_expr(&self, expr: ExprId) -> Option<ClassId> {
        self.dtypes.as_class(self.expr(expr).dtype)
    }

    /// Human-readable type name used in diagnostics.
    pub fn dtype_name(&self, id: DTypeId) -> String {
        match self.dtypes.get(id) {
            DType::Basic { width, signed } => {
                let sign = if *signed { " signed" } else { "" };
                format!("bit{}[{}:0]", sign, width.saturating_sub(1))
            }
            DType::Struct(s) => format!("struct {}", s.name),
            DType::Enum(e) => format!("enum {}", e.name),
            DType::ClassRef(c) => format!("class {}", self.class(*c).name),
            DType::UnpackArray { elem, len } => {
                format!("{}$[0:{}]", self.dtype_name(*elem), len.saturating_sub(1))
            }
            DType::Other(name) => name.clone(),
        }
    }

    /// Every statement list in the tree with the scope it belongs to.
    pub fn statement_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.module_ids().map(Scope::Module).collect();
        scopes.extend((0..self.funcs.len()).map(|i| Scope::Func(FuncId(i))));
        scopes
    }

    pub fn scope_stmts(&self, scope: Scope) -> &[Stmt] {
        match scope {
            Scope::Module(m) => &self.module(m).initial,
            Scope::Func(f) => &self.func(f).body,
        }
    }

    /// Collects every expression reachable from `stmts` in pre-order.
    pub fn walk_stmts(&self, stmts: &[Stmt], out: &mut Vec<ExprId>) {
        for stmt in stmts {
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    self.walk_expr(*lhs, out);
                    self.walk_expr(*rhs, out);
                }
                Stmt::Case { selector, items } => {
                    self.walk_expr(*selector, out);
                    for item in items {
                        self.walk_expr(item.value, out);
                        self.walk_stmts(&item.body, out);
                    }
                }
                Stmt::Expr(e) => self.walk_expr(*e, out),
            }
        }
    }

    pub fn walk_expr(&self, expr: ExprId, out: &mut Vec<ExprId>) {
        out.push(expr);
        for child in self.expr(expr).children() {
            self.walk_expr(child, out);
        }
    }
}

pub struct ClassChain<'a> {
    netlist: &'a Netlist,
    next: Option<ClassId>,
    seen: HashSet<ClassId>,
}

impl Iterator for ClassChain<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        let current = self.next.take()?;
        // A malformed tree may contain an inheritance cycle; stop instead of spinning.
        if !self.seen.insert(current) {
            return None;
        }
        self.next = self.netlist.class(current).extends;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_chain_walks_bases() {
        let mut nl = Netlist::new();
        let a = nl.add_class("A", None);
        let b = nl.add_class("B", Some(a));
        let c = nl.add_class("C", Some(b));
        let chain: Vec<_> = nl.class_chain(c).collect();
        assert_eq!(chain, vec![c, b, a]);
    }

    #[test]
    fn test_clone_tree_is_deep() {
        let mut nl = Netlist::new();
        let u8t = nl.dtypes.basic(8, false);
        let cls = nl.add_class("A", None);
        let x = nl.add_member_var(cls, "x", u8t, true);
        let lhs = nl.var_ref(x);
        let rhs = nl.const_u64(u8t, 3);
        let cmp = nl.binary(BinaryOp::GtU, lhs, rhs);
        let copy = nl.exprs.clone_tree(cmp);
        assert_ne!(copy, cmp);
        let ExprKind::Binary { op, lhs: l, rhs: r } = nl.expr(copy).kind.clone() else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::GtU);
        assert_ne!(l, lhs);
        assert_ne!(r, rhs);
        assert_eq!(nl.expr(l).kind, ExprKind::VarRef(x));
    }

    #[test]
    fn test_binaryop_display() {
        assert_eq!(format!("{}", BinaryOp::GtU), ">");
        assert_eq!(format!("{}", BinaryOp::EqWild), "==?");
        assert_eq!(format!("{}", BinaryOp::LogOr), "||");
    }
}
