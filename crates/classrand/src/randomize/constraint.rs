//! Bound model for randomize constraints.
//!
//! A constraint is folded into a [`BoundMultiset`]: one [`BoundSet`] per OR
//! disjunct, each holding an inclusive `[min, max]` interval per constrained
//! target. Only `target OP constant` comparisons combined with AND/OR are
//! understood; any other leaf is reported and contributes no bound.

use crate::ir::dtype::{bits_to_int, int_to_bits, type_max, type_min};
use crate::ir::{
    BinaryOp, CaseItem, ClassId, DType, DTypeId, ExprId, ExprKind, FileLine, FuncId, Netlist,
    Stmt, VarId, VarKind,
};
use crate::randomize::enum_table::EnumTableCache;
use crate::randomize::error::{Diagnostics, RandomizeError};
use crate::randomize::{Root, create_ref};
use itertools::Itertools;
use log::trace;
use num_bigint::{BigInt, BigUint};
use num_traits::One;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Member path from the randomized object to the constrained variable,
/// e.g. `[len]` or `[hdr, len]` for `hdr.len`.
pub type TargetPath = SmallVec<[VarId; 2]>;

/// Inclusive bounds of one target. Strictness is already folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bound {
    pub min: Option<BigInt>,
    pub max: Option<BigInt>,
}

impl Bound {
    fn tighten_min(&mut self, value: BigInt) {
        match &self.min {
            Some(current) if *current >= value => {}
            _ => self.min = Some(value),
        }
    }

    fn tighten_max(&mut self, value: BigInt) {
        match &self.max {
            Some(current) if *current <= value => {}
            _ => self.max = Some(value),
        }
    }
}

/// One conjunctive set of bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundSet {
    bounds: BTreeMap<TargetPath, Bound>,
}

impl BoundSet {
    pub fn get(&self, target: &[VarId]) -> Option<&Bound> {
        self.bounds.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TargetPath, &Bound)> {
        self.bounds.iter()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn tighten_min(&mut self, target: TargetPath, value: BigInt) {
        self.bounds.entry(target).or_default().tighten_min(value);
    }

    pub fn tighten_max(&mut self, target: TargetPath, value: BigInt) {
        self.bounds.entry(target).or_default().tighten_max(value);
    }

    fn apply_leaf(&mut self, leaf: &LeafBound) {
        if let Some(min) = &leaf.min {
            self.tighten_min(leaf.target.clone(), min.clone());
        }
        if let Some(max) = &leaf.max {
            self.tighten_max(leaf.target.clone(), max.clone());
        }
    }

    /// Resolves every bound against its target's type range. `None` when some
    /// target has an empty interval, i.e. the set cannot be satisfied.
    fn resolve(&self, netlist: &Netlist) -> Option<Vec<ResolvedBound>> {
        self.bounds
            .iter()
            .map(|(target, bound)| ResolvedBound::new(netlist, target, bound))
            .collect()
    }

    pub fn is_satisfiable(&self, netlist: &Netlist) -> bool {
        self.resolve(netlist).is_some()
    }

    /// Assignments that map the raw random value of each rand target into its interval.
    ///
    /// Enum targets are redrawn from a table of the items inside the interval so the
    /// result is always a declared item.
    pub fn apply_constraints(
        &self,
        netlist: &mut Netlist,
        enum_tables: &mut EnumTableCache,
        root: Root,
        loc: FileLine,
    ) -> Result<Vec<Stmt>, RandomizeError> {
        let Some(resolved) = self.resolve(netlist) else {
            return Ok(vec![]);
        };
        let mut stmts = vec![];
        for bound in resolved {
            if !bound.is_rand(netlist) {
                continue;
            }
            if let Some(values) = &bound.enum_values {
                let all_items = netlist
                    .dtypes
                    .as_enum(bound.dtype)
                    .is_some_and(|e| e.item_count() == values.len());
                if all_items {
                    continue;
                }
                let table =
                    enum_tables.subset_table_for(netlist, bound.dtype, values.clone(), loc)?;
                let rhs = EnumTableCache::random_entry(netlist, table);
                let lhs = create_ref(netlist, root, &bound.target, loc);
                stmts.push(Stmt::Assign { lhs, rhs });
                continue;
            }
            if bound.covers_type() {
                continue;
            }
            let unsigned = netlist.dtypes.basic(bound.width, false);
            let range = &bound.hi - &bound.lo + BigInt::one();
            let lo = netlist.const_value(unsigned, int_to_bits(&bound.lo, bound.width));
            let range = netlist.const_value(unsigned, int_to_bits(&range, bound.width));
            let raw = create_ref(netlist, root, &bound.target, loc);
            let offset = netlist.binary(BinaryOp::ModDiv, raw, range);
            let value = netlist.binary(BinaryOp::Add, lo, offset);
            let lhs = create_ref(netlist, root, &bound.target, loc);
            stmts.push(Stmt::Assign { lhs, rhs: value });
        }
        Ok(stmts)
    }

    /// Boolean expression that holds when every target lies inside its declared bounds.
    pub fn generate_check(&self, netlist: &mut Netlist, root: Root, loc: FileLine) -> ExprId {
        let bit = netlist.dtypes.basic(1, false);
        let Some(resolved) = self.resolve(netlist) else {
            return netlist.const_u64(bit, 0);
        };
        let mut check = netlist.const_u64(bit, 1);
        for bound in resolved {
            let dtype = netlist.dtypes.basic(bound.width, bound.signed);
            let (ge, le) = if bound.signed {
                (BinaryOp::GteS, BinaryOp::LteS)
            } else {
                (BinaryOp::GteU, BinaryOp::LteU)
            };
            let mut sides = vec![];
            if bound.has_min {
                sides.push((ge, bound.lo.clone()));
            }
            if bound.has_max {
                sides.push((le, bound.hi.clone()));
            }
            for (op, value) in sides {
                let lhs = create_ref(netlist, root, &bound.target, loc);
                let rhs = netlist.const_value(dtype, int_to_bits(&value, bound.width));
                let cmp = netlist.binary(op, lhs, rhs);
                check = netlist.binary(BinaryOp::LogAnd, check, cmp);
            }
        }
        check
    }
}

/// A bound resolved against the target's declared type. Missing sides take the
/// type's natural extreme and declared sides are clamped into the type range.
///
/// For enum targets `enum_values` lists the item values inside the interval in
/// declaration order; a bound admitting no item is unsatisfiable.
struct ResolvedBound {
    target: TargetPath,
    dtype: DTypeId,
    enum_values: Option<Vec<BigUint>>,
    width: usize,
    signed: bool,
    lo: BigInt,
    hi: BigInt,
    has_min: bool,
    has_max: bool,
}

impl ResolvedBound {
    fn new(netlist: &Netlist, target: &TargetPath, bound: &Bound) -> Option<Self> {
        let leaf = *target.last()?;
        let dtype = netlist.var(leaf).dtype;
        let width = netlist.dtypes.width(dtype);
        let signed = netlist.dtypes.is_signed(dtype);
        let tmin = type_min(width, signed);
        let tmax = type_max(width, signed);
        let lo = bound.min.clone().unwrap_or_else(|| tmin.clone()).max(tmin.clone());
        let hi = bound.max.clone().unwrap_or_else(|| tmax.clone()).min(tmax.clone());
        if lo > hi {
            return None;
        }
        let enum_values = match netlist.dtypes.as_enum(dtype) {
            Some(enum_type) => {
                let values = enum_type
                    .items
                    .iter()
                    .filter_map(|item| item.value.clone())
                    .filter(|value| {
                        let value = bits_to_int(value, width, signed);
                        lo <= value && value <= hi
                    })
                    .collect_vec();
                if values.is_empty() {
                    return None;
                }
                Some(values)
            }
            None => None,
        };
        Some(Self {
            target: target.clone(),
            dtype,
            enum_values,
            width,
            signed,
            lo,
            hi,
            has_min: bound.min.is_some(),
            has_max: bound.max.is_some(),
        })
    }

    fn covers_type(&self) -> bool {
        self.lo == type_min(self.width, self.signed) && self.hi == type_max(self.width, self.signed)
    }

    fn is_rand(&self, netlist: &Netlist) -> bool {
        self.target.iter().all(|v| netlist.var(*v).is_rand)
    }
}

/// Disjunction of bound sets. Never empty: a fresh multiset holds one empty set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundMultiset {
    sets: Vec<BoundSet>,
}

impl Default for BoundMultiset {
    fn default() -> Self {
        Self {
            sets: vec![BoundSet::default()],
        }
    }
}

impl BoundMultiset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> &[BoundSet] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Folds the constraint blocks of `class` and all its ancestors.
    pub fn add_class_constraints(
        &mut self,
        netlist: &Netlist,
        class: ClassId,
        diag: &mut Diagnostics,
    ) {
        for c in netlist.class_chain(class) {
            for constraint in netlist.constraints(c) {
                self.add_constraints(netlist, c, &constraint.conds, diag);
            }
        }
    }

    /// Folds `conds`, whose targets must be members of `class` or its ancestors.
    pub fn add_constraints(
        &mut self,
        netlist: &Netlist,
        class: ClassId,
        conds: &[ExprId],
        diag: &mut Diagnostics,
    ) {
        for cond in conds {
            self.add_constraint(netlist, class, *cond, diag);
        }
    }

    pub fn add_constraint(
        &mut self,
        netlist: &Netlist,
        class: ClassId,
        cond: ExprId,
        diag: &mut Diagnostics,
    ) {
        match &netlist.expr(cond).kind {
            ExprKind::Binary {
                op: BinaryOp::And | BinaryOp::LogAnd,
                lhs,
                rhs,
            } => {
                self.add_constraint(netlist, class, *lhs, diag);
                self.add_constraint(netlist, class, *rhs, diag);
            }
            ExprKind::Binary {
                op: BinaryOp::Or | BinaryOp::LogOr,
                lhs,
                rhs,
            } => {
                let mut forked = self.clone();
                self.add_constraint(netlist, class, *lhs, diag);
                forked.add_constraint(netlist, class, *rhs, diag);
                self.sets.extend(forked.sets);
            }
            _ => match leaf_bound(netlist, class, cond) {
                Ok(leaf) => {
                    trace!("randomize: constraint leaf {:?}", leaf);
                    for set in &mut self.sets {
                        set.apply_leaf(&leaf);
                    }
                }
                Err(err) => diag.report_unsupported(err),
            },
        }
    }

    /// Statements that remap the randomized targets into one of the disjuncts.
    ///
    /// With several satisfiable disjuncts a random index picks one of them through a
    /// case statement; `index_count` numbers the index locals declared in `func`.
    pub fn apply_constraints(
        &self,
        netlist: &mut Netlist,
        enum_tables: &mut EnumTableCache,
        func: FuncId,
        root: Root,
        index_count: &mut usize,
    ) -> Result<Vec<Stmt>, RandomizeError> {
        let loc = netlist.func(func).loc;
        let satisfiable = self
            .sets
            .iter()
            .filter(|set| set.is_satisfiable(netlist))
            .collect_vec();
        match satisfiable.as_slice() {
            [] => Ok(vec![]),
            [set] => set.apply_constraints(netlist, enum_tables, root, loc),
            sets => {
                let index_dtype = netlist.dtypes.basic(32, false);
                let name = format!("__Vtemp_randomize{}", *index_count);
                *index_count += 1;
                let index = netlist.add_func_local(func, &name, index_dtype);
                let count = netlist.const_u64(index_dtype, sets.len() as u64);
                let raw = netlist.random(index_dtype);
                let pick = netlist.binary(BinaryOp::ModDiv, raw, count);
                let lhs = netlist.var_ref(index);
                let mut stmts = vec![Stmt::Assign { lhs, rhs: pick }];
                let mut items = vec![];
                for (i, set) in sets.iter().enumerate() {
                    let value = netlist.const_u64(index_dtype, i as u64);
                    let body = set.apply_constraints(netlist, enum_tables, root, loc)?;
                    items.push(CaseItem { value, body });
                }
                let selector = netlist.var_ref(index);
                stmts.push(Stmt::Case { selector, items });
                Ok(stmts)
            }
        }
    }

    /// OR of the per-disjunct checks.
    pub fn generate_check(&self, netlist: &mut Netlist, root: Root, loc: FileLine) -> ExprId {
        let mut check: Option<ExprId> = None;
        for set in &self.sets {
            let set_check = set.generate_check(netlist, root, loc);
            check = Some(match check {
                Some(acc) => netlist.binary(BinaryOp::LogOr, acc, set_check),
                None => set_check,
            });
        }
        match check {
            Some(check) => check,
            None => {
                let bit = netlist.dtypes.basic(1, false);
                netlist.const_u64(bit, 1)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LeafBound {
    target: TargetPath,
    min: Option<BigInt>,
    max: Option<BigInt>,
}

/// Interprets a comparison leaf as an interval on one target of `class`.
fn leaf_bound(netlist: &Netlist, class: ClassId, cond: ExprId) -> Result<LeafBound, RandomizeError> {
    let expr = netlist.expr(cond);
    let unsupported = |detail: String| RandomizeError::UnsupportedConstraint {
        loc: expr.loc,
        detail,
    };
    let ExprKind::Binary { op, lhs, rhs } = &expr.kind else {
        return Err(unsupported(
            "expected a comparison between a random variable and a constant".into(),
        ));
    };
    let (target, value, mirrored) = match (
        target_path(netlist, *lhs),
        constant_value(netlist, *rhs),
        target_path(netlist, *rhs),
        constant_value(netlist, *lhs),
    ) {
        (Some(target), Some(value), _, _) => (target, value, false),
        (_, _, Some(target), Some(value)) => (target, value, true),
        (Some(_), _, Some(_), _) => {
            return Err(unsupported(
                "comparison between two variables is not supported".into(),
            ));
        }
        _ => {
            return Err(unsupported(
                "operands must be a member variable and a constant".into(),
            ));
        }
    };
    let Some(leaf) = target.last() else {
        return Err(unsupported("empty constraint target".into()));
    };
    check_scope(netlist, class, &target).map_err(unsupported)?;
    let leaf_dtype = netlist.var(*leaf).dtype;
    if netlist.dtypes.width(leaf_dtype) == 0
        || matches!(
            netlist.dtypes.get(leaf_dtype),
            DType::ClassRef(_) | DType::Other(_) | DType::UnpackArray { .. }
        )
    {
        return Err(unsupported(format!(
            "variable of type '{}' cannot be bounded",
            netlist.dtype_name(leaf_dtype)
        )));
    }
    // Normalize `const OP var` to `var OP' const`.
    let original = *op;
    let op = if mirrored { mirror(original) } else { Some(original) };
    let one = BigInt::one();
    let (min, max) = match op {
        Some(BinaryOp::Eq | BinaryOp::EqWild) => (Some(value.clone()), Some(value)),
        Some(BinaryOp::GtU | BinaryOp::GtS) => (Some(value + one), None),
        Some(BinaryOp::GteU | BinaryOp::GteS) => (Some(value), None),
        Some(BinaryOp::LtU | BinaryOp::LtS) => (None, Some(value - one)),
        Some(BinaryOp::LteU | BinaryOp::LteS) => (None, Some(value)),
        _ => {
            return Err(unsupported(format!("operator '{}' is not supported", original)));
        }
    };
    Ok(LeafBound { target, min, max })
}

fn mirror(op: BinaryOp) -> Option<BinaryOp> {
    Some(match op {
        BinaryOp::Eq => BinaryOp::Eq,
        BinaryOp::EqWild => BinaryOp::EqWild,
        BinaryOp::GtU => BinaryOp::LtU,
        BinaryOp::GtS => BinaryOp::LtS,
        BinaryOp::GteU => BinaryOp::LteU,
        BinaryOp::GteS => BinaryOp::LteS,
        BinaryOp::LtU => BinaryOp::GtU,
        BinaryOp::LtS => BinaryOp::GtS,
        BinaryOp::LteU => BinaryOp::GteU,
        BinaryOp::LteS => BinaryOp::GteS,
        _ => return None,
    })
}

/// Member path of a constraint operand, looking through width extensions.
fn target_path(netlist: &Netlist, expr: ExprId) -> Option<TargetPath> {
    match &netlist.expr(expr).kind {
        ExprKind::VarRef(var) if netlist.var(*var).kind == VarKind::Member => {
            Some(SmallVec::from_slice(&[*var]))
        }
        ExprKind::Extend { expr, .. } => target_path(netlist, *expr),
        ExprKind::MemberSel { from, var } => {
            let mut path = target_path(netlist, *from)?;
            path.push(*var);
            Some(path)
        }
        _ => None,
    }
}

/// Each path element must be a member of the class (or an ancestor) that the
/// previous element refers to.
fn check_scope(netlist: &Netlist, class: ClassId, target: &[VarId]) -> Result<(), String> {
    let mut scope = Some(class);
    for var in target {
        let Some(class) = scope else {
            return Err(format!(
                "'{}' is selected from a value that is not a class handle",
                netlist.var(*var).name
            ));
        };
        let is_member = netlist
            .class_chain(class)
            .any(|c| netlist.member_vars(c).any(|v| v == *var));
        if !is_member {
            return Err(format!(
                "'{}' is not a member of class {}",
                netlist.var(*var).name,
                netlist.class(class).name
            ));
        }
        scope = netlist.dtypes.as_class(netlist.var(*var).dtype);
    }
    Ok(())
}

/// Constant operand read at its own width and signedness.
fn constant_value(netlist: &Netlist, expr: ExprId) -> Option<BigInt> {
    let node = netlist.expr(expr);
    match &node.kind {
        ExprKind::Const(bits) => Some(bits_to_int(
            bits,
            netlist.dtypes.width(node.dtype),
            netlist.dtypes.is_signed(node.dtype),
        )),
        ExprKind::Extend { expr, .. } => constant_value(netlist, *expr),
        _ => None,
    }
}
