use crate::ir::{
    BinaryOp, ClassId, DType, DTypeId, Expr, ExprId, ExprKind, FileLine, FuncId, FuncOwner,
    Netlist, Scope, Stmt, VarId,
};
use crate::randomize::constraint::BoundMultiset;
use crate::randomize::enum_table::EnumTableCache;
use crate::randomize::error::{Diagnostics, RandomizeError};
use crate::randomize::mark::MarkResult;
use crate::randomize::{Root, create_ref};
use crate::{HashMap, HashSet};
use log::{debug, trace};

/// A `randomize()` call found in the tree before synthesis started.
#[derive(Debug, Clone)]
struct CallSite {
    scope: Scope,
    call: ExprId,
    class: ClassId,
    from: ExprId,
    args: Vec<ExprId>,
}

#[derive(Debug, Default)]
pub(crate) struct SynthesisResult {
    pub methods: Vec<FuncId>,
    pub helpers: Vec<FuncId>,
    pub enum_tables: usize,
}

/// Builds `randomize()` bodies for marked classes and rewrites call sites that
/// carry inline constraints.
pub(crate) struct RandomizeSynthesizer<'a> {
    netlist: &'a mut Netlist,
    diag: &'a mut Diagnostics,
    marks: &'a MarkResult,
    enum_tables: EnumTableCache,
    methods: HashMap<ClassId, FuncId>,
    synthesized: HashSet<ClassId>,
    helpers: Vec<FuncId>,
    helper_count: usize,
    index_count: usize,
}

impl<'a> RandomizeSynthesizer<'a> {
    pub fn new(netlist: &'a mut Netlist, diag: &'a mut Diagnostics, marks: &'a MarkResult) -> Self {
        Self {
            netlist,
            diag,
            marks,
            enum_tables: EnumTableCache::new(),
            methods: HashMap::default(),
            synthesized: HashSet::default(),
            helpers: vec![],
            helper_count: 0,
            index_count: 0,
        }
    }

    pub fn run(mut self) -> Result<SynthesisResult, RandomizeError> {
        // Collected up front so generated bodies are never mistaken for user call sites.
        let sites = self.collect_call_sites();

        let mut classes: Vec<ClassId> = self.marks.marked.iter().copied().collect();
        classes.sort_by_key(|c| (self.netlist.class_chain(*c).count(), *c));
        for class in classes {
            self.define_class_randomize(class)?;
        }

        for site in sites {
            if site.args.is_empty() {
                let method = self.declare_randomize(site.class);
                let call = self.netlist.exprs.get_mut(site.call);
                if let ExprKind::MethodCall { func, .. } = &mut call.kind {
                    *func = Some(method);
                }
            } else {
                self.rewrite_with_helper(site)?;
            }
        }

        let mut methods: Vec<FuncId> = self.methods.values().copied().collect();
        methods.sort();
        Ok(SynthesisResult {
            methods,
            helpers: self.helpers,
            enum_tables: self.enum_tables.len(),
        })
    }

    fn collect_call_sites(&self) -> Vec<CallSite> {
        let mut sites = vec![];
        for scope in self.netlist.statement_scopes() {
            let mut exprs = vec![];
            self.netlist
                .walk_stmts(self.netlist.scope_stmts(scope), &mut exprs);
            for call in exprs {
                let ExprKind::MethodCall {
                    from, name, args, ..
                } = &self.netlist.expr(call).kind
                else {
                    continue;
                };
                if name != "randomize" {
                    continue;
                }
                let Some(class) = self.netlist.class_of_expr(*from) else {
                    continue;
                };
                sites.push(CallSite {
                    scope,
                    call,
                    class,
                    from: *from,
                    args: args.clone(),
                });
            }
        }
        sites
    }

    /// Returns the `randomize` method of `class`, declaring it on first use.
    fn declare_randomize(&mut self, class: ClassId) -> FuncId {
        if let Some(func) = self.methods.get(&class) {
            return *func;
        }
        let func = match self.netlist.find_member_func(class, "randomize") {
            Some(func) => func,
            None => {
                let int = self.netlist.dtypes.int();
                self.netlist.add_func("randomize", FuncOwner::Class(class), int)
            }
        };
        let overridable =
            self.netlist.class(class).extends.is_some() || self.marks.is_extended(class);
        let decl = self.netlist.func_mut(func);
        decl.class_method = true;
        decl.is_virtual |= overridable;
        debug!(
            "randomize: declared {}::randomize (virtual: {})",
            self.netlist.class(class).name,
            self.netlist.func(func).is_virtual
        );
        self.methods.insert(class, func);
        func
    }

    fn define_class_randomize(&mut self, class: ClassId) -> Result<(), RandomizeError> {
        if !self.synthesized.insert(class) {
            return Ok(());
        }
        let func = self.declare_randomize(class);
        let loc = self.netlist.func(func).loc;
        let ret = self.netlist.func(func).return_var;

        let mut body = vec![self.init_result(ret)];
        body.extend(self.class_rand_stmts(class, func, Root::This)?);

        let mut constraints = BoundMultiset::new();
        constraints.add_class_constraints(self.netlist, class, self.diag);
        body.extend(constraints.apply_constraints(
            self.netlist,
            &mut self.enum_tables,
            func,
            Root::This,
            &mut self.index_count,
        )?);
        body.push(self.accumulate_check(ret, &constraints, Root::This, loc));

        debug!(
            "randomize: {} gets {} statements, {} constraint set(s)",
            self.netlist.class(class).name,
            body.len(),
            constraints.len()
        );
        self.netlist.func_mut(func).body = body;
        self.netlist.class_mut(class).needs_randomize = false;
        Ok(())
    }

    /// Emits a freestanding `__Vrandomize<N>(__Vobj)` merging the class constraints
    /// with the call's inline ones, and turns the call into a call of that helper.
    fn rewrite_with_helper(&mut self, site: CallSite) -> Result<(), RandomizeError> {
        let loc = self.netlist.expr(site.call).loc;
        let owner = match site.scope {
            Scope::Module(module) => FuncOwner::Module(module),
            Scope::Func(func) => self.netlist.func(func).owner,
        };
        let name = format!("__Vrandomize{}", self.helper_count);
        self.helper_count += 1;
        let int = self.netlist.dtypes.int();
        let helper = self.netlist.add_func(&name, owner, int);
        let ret = self.netlist.func(helper).return_var;
        self.netlist.func_mut(helper).loc = loc;
        self.netlist.vars[ret.0].loc = loc;
        let obj_dtype = self.netlist.expr(site.from).dtype;
        let obj = self.netlist.add_func_param(helper, "__Vobj", obj_dtype);
        let root = Root::Param(obj);

        let mut body = vec![self.init_result(ret)];
        body.extend(self.class_rand_stmts(site.class, helper, root)?);

        let mut constraints = BoundMultiset::new();
        constraints.add_class_constraints(self.netlist, site.class, self.diag);
        constraints.add_constraints(self.netlist, site.class, &site.args, self.diag);
        body.extend(constraints.apply_constraints(
            self.netlist,
            &mut self.enum_tables,
            helper,
            root,
            &mut self.index_count,
        )?);
        body.push(self.accumulate_check(ret, &constraints, root, loc));
        self.netlist.func_mut(helper).body = body;

        trace!(
            "randomize: call at {} now invokes {} ({} inline constraint(s))",
            loc,
            name,
            site.args.len()
        );
        self.netlist.exprs.replace(
            site.call,
            Expr {
                kind: ExprKind::FuncCall {
                    func: helper,
                    args: vec![site.from],
                },
                dtype: int,
                loc,
            },
        );
        self.helpers.push(helper);
        Ok(())
    }

    fn init_result(&mut self, ret: VarId) -> Stmt {
        let lhs = self.netlist.var_ref(ret);
        let one = self.netlist.const_int(1);
        Stmt::Assign { lhs, rhs: one }
    }

    /// `ret = ret & check`
    fn accumulate_check(
        &mut self,
        ret: VarId,
        constraints: &BoundMultiset,
        root: Root,
        loc: FileLine,
    ) -> Stmt {
        let check = constraints.generate_check(self.netlist, root, loc);
        let ret_dtype = self.netlist.var(ret).dtype;
        let check = self.netlist.extend(check, ret_dtype);
        self.accumulate(ret, check)
    }

    fn accumulate(&mut self, ret: VarId, value: ExprId) -> Stmt {
        let acc = self.netlist.var_ref(ret);
        let rhs = self.netlist.binary(BinaryOp::And, acc, value);
        let lhs = self.netlist.var_ref(ret);
        Stmt::Assign { lhs, rhs }
    }

    /// Unconstrained fills for every rand member of `class` and its ancestors, bases first.
    fn class_rand_stmts(
        &mut self,
        class: ClassId,
        func: FuncId,
        root: Root,
    ) -> Result<Vec<Stmt>, RandomizeError> {
        let loc = self.netlist.func(func).loc;
        let ret = self.netlist.func(func).return_var;
        let mut chain: Vec<ClassId> = self.netlist.class_chain(class).collect();
        chain.reverse();
        let members: Vec<VarId> = chain
            .into_iter()
            .flat_map(|c| self.netlist.member_vars(c).collect::<Vec<_>>())
            .filter(|v| self.netlist.var(*v).is_rand)
            .collect();

        let mut stmts = vec![];
        for member in members {
            let target = create_ref(self.netlist, root, &[member], loc);
            let dtype = self.netlist.var(member).dtype;
            match self.netlist.dtypes.get(dtype).clone() {
                DType::Basic { .. } => {
                    let value = self.netlist.random(dtype);
                    stmts.push(Stmt::Assign { lhs: target, rhs: value });
                }
                DType::Enum(_) => {
                    let value = self.enum_value(dtype, loc)?;
                    stmts.push(Stmt::Assign { lhs: target, rhs: value });
                }
                DType::Struct(_) => {
                    let name = self.netlist.var(member).name.clone();
                    self.struct_stmts(&name, target, dtype, 0, loc, &mut stmts)?;
                }
                DType::ClassRef(member_class) => {
                    let method = self.declare_randomize(member_class);
                    let call = self.netlist.bound_method_call(target, method, vec![]);
                    self.netlist.set_loc(call, loc);
                    stmts.push(self.accumulate(ret, call));
                }
                DType::UnpackArray { .. } | DType::Other(_) => {
                    let var = self.netlist.var(member);
                    self.diag
                        .report_unsupported(RandomizeError::UnsupportedFieldType {
                            loc: var.loc,
                            member: var.name.clone(),
                            dtype: self.netlist.dtype_name(dtype),
                        });
                }
            }
        }
        Ok(stmts)
    }

    /// Fills each packed member of a struct through a bit slice of the whole value.
    fn struct_stmts(
        &mut self,
        path: &str,
        base: ExprId,
        dtype: DTypeId,
        offset: usize,
        loc: FileLine,
        stmts: &mut Vec<Stmt>,
    ) -> Result<(), RandomizeError> {
        let DType::Struct(layout) = self.netlist.dtypes.get(dtype).clone() else {
            return Ok(());
        };
        for member in layout.members {
            let lsb = offset + member.lsb;
            let member_path = format!("{}.{}", path, member.name);
            match self.netlist.dtypes.get(member.dtype).clone() {
                DType::Struct(_) => {
                    self.struct_stmts(&member_path, base, member.dtype, lsb, loc, stmts)?;
                }
                DType::Basic { .. } => {
                    let width = self.netlist.dtypes.width(member.dtype);
                    let from = self.netlist.exprs.clone_tree(base);
                    let lhs = self.netlist.sel(from, lsb, width);
                    let slice = self.netlist.dtypes.basic(width, false);
                    let rhs = self.netlist.random(slice);
                    stmts.push(Stmt::Assign { lhs, rhs });
                }
                DType::Enum(_) => {
                    let width = self.netlist.dtypes.width(member.dtype);
                    let from = self.netlist.exprs.clone_tree(base);
                    let lhs = self.netlist.sel(from, lsb, width);
                    let rhs = self.enum_value(member.dtype, loc)?;
                    stmts.push(Stmt::Assign { lhs, rhs });
                }
                _ => {
                    self.diag
                        .report_unsupported(RandomizeError::UnsupportedFieldType {
                            loc,
                            member: member_path,
                            dtype: self.netlist.dtype_name(member.dtype),
                        });
                }
            }
        }
        Ok(())
    }

    /// `table[$random % item_count]`
    fn enum_value(&mut self, enum_dtype: DTypeId, loc: FileLine) -> Result<ExprId, RandomizeError> {
        let table = self.enum_tables.table_for(self.netlist, enum_dtype, loc)?;
        Ok(EnumTableCache::random_entry(self.netlist, table))
    }
}
