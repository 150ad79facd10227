use crate::debug::CompilationTrace;
use crate::ir::{ClassMember, ExprId, ExprKind, FuncId, Netlist, Stmt, VarId};

impl CompilationTrace {
    pub fn print(&self) {
        if let Some(tree) = &self.pre_randomize_tree {
            println!("=== Pre-randomize tree ===\n{}", tree);
        }
        if let Some(classes) = &self.marked_classes {
            println!("=== Marked classes ===\n{}", classes.join("\n"));
        }
        if let Some(tree) = &self.post_randomize_tree {
            println!("=== Post-randomize tree ===\n{}", tree);
        }
    }
}

/// Format the whole netlist to a readable, SystemVerilog-like listing.
pub fn format_netlist(netlist: &Netlist) -> String {
    let mut output = String::new();

    if !netlist.unit_package.is_empty() {
        output.push_str("package $unit;\n");
        for var in &netlist.unit_package {
            output.push_str(&format!("  {};\n", format_var_decl(netlist, *var)));
        }
        output.push_str("endpackage\n");
    }

    for class in netlist.class_ids() {
        let decl = netlist.class(class);
        match decl.extends {
            Some(base) => output.push_str(&format!(
                "class {} extends {};\n",
                decl.name,
                netlist.class(base).name
            )),
            None => output.push_str(&format!("class {};\n", decl.name)),
        }
        for member in &decl.members {
            match member {
                ClassMember::Var(var) => {
                    output.push_str(&format!("  {};\n", format_var_decl(netlist, *var)));
                }
                ClassMember::Constraint(constraint) => {
                    output.push_str(&format!("  constraint {} {{\n", constraint.name));
                    for cond in &constraint.conds {
                        output.push_str(&format!("    {};\n", format_expr(netlist, *cond)));
                    }
                    output.push_str("  }\n");
                }
                ClassMember::Func(func) => format_func(netlist, *func, 1, &mut output),
            }
        }
        output.push_str("endclass\n");
    }

    for module in netlist.module_ids() {
        let decl = netlist.module(module);
        output.push_str(&format!("module {};\n", decl.name));
        for var in &decl.vars {
            output.push_str(&format!("  {};\n", format_var_decl(netlist, *var)));
        }
        for func in &decl.funcs {
            format_func(netlist, *func, 1, &mut output);
        }
        if !decl.initial.is_empty() {
            output.push_str("  initial begin\n");
            format_stmts(netlist, &decl.initial, 2, &mut output);
            output.push_str("  end\n");
        }
        output.push_str("endmodule\n");
    }
    output
}

fn format_var_decl(netlist: &Netlist, var: VarId) -> String {
    let decl = netlist.var(var);
    let mut s = String::new();
    if decl.is_const {
        s.push_str("const ");
    }
    if decl.is_rand {
        s.push_str("rand ");
    }
    s.push_str(&format!("{} {}", netlist.dtype_name(decl.dtype), decl.name));
    if let Some(init) = decl.init {
        s.push_str(&format!(" = {}", format_expr(netlist, init)));
    }
    s
}

fn format_func(netlist: &Netlist, func: FuncId, indent: usize, output: &mut String) {
    let pad = "  ".repeat(indent);
    let decl = netlist.func(func);
    let ret = netlist.var(decl.return_var);
    let params: Vec<String> = decl
        .params
        .iter()
        .map(|p| format!("{} {}", netlist.dtype_name(netlist.var(*p).dtype), netlist.var(*p).name))
        .collect();
    let qualifier = if decl.is_virtual { "virtual " } else { "" };
    output.push_str(&format!(
        "{}{}function {} {}({});\n",
        pad,
        qualifier,
        netlist.dtype_name(ret.dtype),
        decl.name,
        params.join(", ")
    ));
    for local in &decl.locals {
        output.push_str(&format!("{}  {};\n", pad, format_var_decl(netlist, *local)));
    }
    format_stmts(netlist, &decl.body, indent + 1, output);
    output.push_str(&format!("{}endfunction\n", pad));
}

fn format_stmts(netlist: &Netlist, stmts: &[Stmt], indent: usize, output: &mut String) {
    let pad = "  ".repeat(indent);
    for stmt in stmts {
        match stmt {
            Stmt::Assign { lhs, rhs } => output.push_str(&format!(
                "{}{} = {};\n",
                pad,
                format_expr(netlist, *lhs),
                format_expr(netlist, *rhs)
            )),
            Stmt::Case { selector, items } => {
                output.push_str(&format!("{}case ({})\n", pad, format_expr(netlist, *selector)));
                for item in items {
                    output.push_str(&format!(
                        "{}  {}: begin\n",
                        pad,
                        format_expr(netlist, item.value)
                    ));
                    format_stmts(netlist, &item.body, indent + 2, output);
                    output.push_str(&format!("{}  end\n", pad));
                }
                output.push_str(&format!("{}endcase\n", pad));
            }
            Stmt::Expr(expr) => {
                output.push_str(&format!("{}{};\n", pad, format_expr(netlist, *expr)));
            }
        }
    }
}

pub(crate) fn format_expr(netlist: &Netlist, expr: ExprId) -> String {
    let node = netlist.expr(expr);
    let args = |args: &[ExprId]| {
        args.iter()
            .map(|a| format_expr(netlist, *a))
            .collect::<Vec<_>>()
            .join(", ")
    };
    match &node.kind {
        ExprKind::Const(value) => {
            let width = netlist.dtypes.width(node.dtype);
            let sign = if netlist.dtypes.is_signed(node.dtype) { "s" } else { "" };
            format!("{}'{}h{:x}", width, sign, value)
        }
        ExprKind::VarRef(var) => netlist.var(*var).name.clone(),
        ExprKind::MemberSel { from, var } => {
            format!("{}.{}", format_expr(netlist, *from), netlist.var(*var).name)
        }
        ExprKind::Extend { expr, signed } => {
            let name = if *signed { "$signed_extend" } else { "$extend" };
            format!(
                "{}{}({})",
                name,
                netlist.dtypes.width(node.dtype),
                format_expr(netlist, *expr)
            )
        }
        ExprKind::Binary { op, lhs, rhs } => format!(
            "({} {} {})",
            format_expr(netlist, *lhs),
            op,
            format_expr(netlist, *rhs)
        ),
        ExprKind::Sel { from, lsb, width } => format!(
            "{}[{}:{}]",
            format_expr(netlist, *from),
            (lsb + width).saturating_sub(1),
            lsb
        ),
        ExprKind::ArraySel { from, index } => {
            format!("{}[{}]", format_expr(netlist, *from), format_expr(netlist, *index))
        }
        ExprKind::Random => format!("$random{}", netlist.dtypes.width(node.dtype)),
        ExprKind::MethodCall {
            from, name, args: a, ..
        } => format!("{}.{}({})", format_expr(netlist, *from), name, args(a.as_slice())),
        ExprKind::FuncCall { func, args: a } => {
            format!("{}({})", netlist.func(*func).name, args(a.as_slice()))
        }
        ExprKind::InitArray(values) => format!("'{{{}}}", args(values.as_slice())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    #[test]
    fn test_format_class_with_constraint() {
        let mut nl = Netlist::new();
        let class = nl.add_class("Packet", None);
        let u8t = nl.dtypes.basic(8, false);
        let len = nl.add_member_var(class, "len", u8t, true);
        let lhs = nl.var_ref(len);
        let rhs = nl.const_u64(u8t, 10);
        let cond = nl.binary(BinaryOp::GtU, lhs, rhs);
        nl.add_constraint(class, "c_len", vec![cond]);

        let text = format_netlist(&nl);
        assert!(text.contains("class Packet;"), "{text}");
        assert!(text.contains("rand bit[7:0] len;"), "{text}");
        assert!(text.contains("(len > 8'ha)"), "{text}");
    }
}
