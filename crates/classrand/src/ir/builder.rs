use crate::ir::{
    BinaryOp, CaseItem, Class, ClassId, ClassMember, Constraint, DTypeId, Expr, ExprId, ExprKind,
    FileLine, Func, FuncId, FuncOwner, Module, ModuleId, Netlist, Stmt, VarId, VarKind, Variable,
};
use num_bigint::BigUint;

/// Node creation helpers. Every node is stamped with `FileLine::default()`;
/// use [`Netlist::set_loc`] to attach a position.
impl Netlist {
    pub fn add_class(&mut self, name: &str, extends: Option<ClassId>) -> ClassId {
        let id = ClassId(self.classes.len());
        self.classes.push(Class {
            name: name.to_string(),
            loc: FileLine::default(),
            extends,
            members: vec![],
            needs_randomize: false,
        });
        id
    }

    pub(crate) fn new_var(&mut self, name: &str, dtype: DTypeId, kind: VarKind) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name: name.to_string(),
            loc: FileLine::default(),
            dtype,
            kind,
            is_rand: false,
            is_const: false,
            init: None,
        });
        id
    }

    pub fn add_member_var(
        &mut self,
        class: ClassId,
        name: &str,
        dtype: DTypeId,
        is_rand: bool,
    ) -> VarId {
        let id = self.new_var(name, dtype, VarKind::Member);
        self.vars[id.0].is_rand = is_rand;
        self.vars[id.0].loc = self.class(class).loc;
        self.class_mut(class).members.push(ClassMember::Var(id));
        id
    }

    pub fn add_constraint(&mut self, class: ClassId, name: &str, conds: Vec<ExprId>) {
        let loc = conds
            .first()
            .map(|c| self.expr(*c).loc)
            .unwrap_or(self.class(class).loc);
        self.class_mut(class)
            .members
            .push(ClassMember::Constraint(Constraint {
                name: name.to_string(),
                loc,
                conds,
            }));
    }

    pub fn add_module(&mut self, name: &str) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(Module {
            name: name.to_string(),
            loc: FileLine::default(),
            vars: vec![],
            funcs: vec![],
            initial: vec![],
        });
        id
    }

    pub fn add_module_var(&mut self, module: ModuleId, name: &str, dtype: DTypeId) -> VarId {
        let id = self.new_var(name, dtype, VarKind::ModuleVar);
        self.modules[module.0].vars.push(id);
        id
    }

    pub fn add_initial(&mut self, module: ModuleId, stmt: Stmt) {
        self.modules[module.0].initial.push(stmt);
    }

    /// Declares an empty function returning `ret` and attaches it to `owner`.
    pub fn add_func(&mut self, name: &str, owner: FuncOwner, ret: DTypeId) -> FuncId {
        let return_var = self.new_var(name, ret, VarKind::FuncReturn);
        let id = FuncId(self.funcs.len());
        let loc = match owner {
            FuncOwner::Class(c) => self.class(c).loc,
            FuncOwner::Module(m) => self.module(m).loc,
        };
        self.vars[return_var.0].loc = loc;
        self.funcs.push(Func {
            name: name.to_string(),
            loc,
            owner,
            return_var,
            params: vec![],
            locals: vec![],
            body: vec![],
            class_method: matches!(owner, FuncOwner::Class(_)),
            is_virtual: false,
        });
        match owner {
            FuncOwner::Class(c) => self.class_mut(c).members.push(ClassMember::Func(id)),
            FuncOwner::Module(m) => self.modules[m.0].funcs.push(id),
        }
        id
    }

    pub fn add_func_param(&mut self, func: FuncId, name: &str, dtype: DTypeId) -> VarId {
        let id = self.new_var(name, dtype, VarKind::FuncParam);
        self.funcs[func.0].params.push(id);
        id
    }

    pub fn add_func_local(&mut self, func: FuncId, name: &str, dtype: DTypeId) -> VarId {
        let id = self.new_var(name, dtype, VarKind::FuncLocal);
        self.funcs[func.0].locals.push(id);
        id
    }

    pub fn push_stmt(&mut self, func: FuncId, stmt: Stmt) {
        self.funcs[func.0].body.push(stmt);
    }

    pub fn set_loc(&mut self, expr: ExprId, loc: FileLine) -> ExprId {
        self.exprs.get_mut(expr).loc = loc;
        expr
    }

    fn alloc_expr(&mut self, kind: ExprKind, dtype: DTypeId) -> ExprId {
        self.exprs.alloc(Expr {
            kind,
            dtype,
            loc: FileLine::default(),
        })
    }

    pub fn const_value(&mut self, dtype: DTypeId, value: BigUint) -> ExprId {
        let value = value & crate::ir::dtype::mask(self.dtypes.width(dtype));
        self.alloc_expr(ExprKind::Const(value), dtype)
    }

    pub fn const_u64(&mut self, dtype: DTypeId, value: u64) -> ExprId {
        self.const_value(dtype, BigUint::from(value))
    }

    /// 32-bit signed constant, the type of integer literals.
    pub fn const_int(&mut self, value: i64) -> ExprId {
        let dtype = self.dtypes.int();
        let bits = crate::ir::dtype::int_to_bits(&value.into(), 32);
        self.const_value(dtype, bits)
    }

    pub fn var_ref(&mut self, var: VarId) -> ExprId {
        let dtype = self.var(var).dtype;
        self.alloc_expr(ExprKind::VarRef(var), dtype)
    }

    pub fn member_sel(&mut self, from: ExprId, var: VarId) -> ExprId {
        let dtype = self.var(var).dtype;
        self.alloc_expr(ExprKind::MemberSel { from, var }, dtype)
    }

    pub fn extend(&mut self, expr: ExprId, dtype: DTypeId) -> ExprId {
        let signed = self.dtypes.is_signed(self.expr(expr).dtype);
        self.alloc_expr(ExprKind::Extend { expr, signed }, dtype)
    }

    /// Comparisons and logical operators yield a single bit; everything else keeps the
    /// left operand's type.
    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let dtype = if op.is_logical() {
            self.dtypes.basic(1, false)
        } else {
            self.expr(lhs).dtype
        };
        self.alloc_expr(ExprKind::Binary { op, lhs, rhs }, dtype)
    }

    pub fn sel(&mut self, from: ExprId, lsb: usize, width: usize) -> ExprId {
        let dtype = self.dtypes.basic(width, false);
        self.alloc_expr(ExprKind::Sel { from, lsb, width }, dtype)
    }

    pub fn array_sel(&mut self, from: ExprId, index: ExprId, elem: DTypeId) -> ExprId {
        self.alloc_expr(ExprKind::ArraySel { from, index }, elem)
    }

    pub fn random(&mut self, dtype: DTypeId) -> ExprId {
        self.alloc_expr(ExprKind::Random, dtype)
    }

    pub fn method_call(&mut self, from: ExprId, name: &str, args: Vec<ExprId>) -> ExprId {
        let dtype = self.dtypes.int();
        self.alloc_expr(
            ExprKind::MethodCall {
                from,
                name: name.to_string(),
                func: None,
                args,
            },
            dtype,
        )
    }

    /// Method call already linked to its declaration.
    pub fn bound_method_call(&mut self, from: ExprId, func: FuncId, args: Vec<ExprId>) -> ExprId {
        let name = self.func(func).name.clone();
        let dtype = self.var(self.func(func).return_var).dtype;
        self.alloc_expr(
            ExprKind::MethodCall {
                from,
                name,
                func: Some(func),
                args,
            },
            dtype,
        )
    }

    pub fn func_call(&mut self, func: FuncId, args: Vec<ExprId>) -> ExprId {
        let dtype = self.var(self.func(func).return_var).dtype;
        self.alloc_expr(ExprKind::FuncCall { func, args }, dtype)
    }

    pub fn init_array(&mut self, dtype: DTypeId, values: Vec<ExprId>) -> ExprId {
        self.alloc_expr(ExprKind::InitArray(values), dtype)
    }

    pub fn assign(&self, lhs: ExprId, rhs: ExprId) -> Stmt {
        Stmt::Assign { lhs, rhs }
    }

    pub fn case_item(&self, value: ExprId, body: Vec<Stmt>) -> CaseItem {
        CaseItem { value, body }
    }
}
