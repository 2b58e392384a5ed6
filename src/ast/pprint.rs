use super::ast::*;
use crate::utils::pprint::*;

impl PrettyPrint for Primitive {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let s = match self {
            Primitive::Bool => "bool",
            Primitive::Float => "f32",
            Primitive::Int => "i32",
            Primitive::UInt => "u32",
        };
        (env, s.to_string())
    }
}

impl PrettyPrint for Type {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            Type::Unknown => (env, "?".to_string()),
            Type::Void => (env, "()".to_string()),
            Type::Primitive {ty} => ty.pprint(env),
            Type::Vector {dim, elem} => {
                let (env, elem) = elem.pprint(env);
                (env, format!("vec{dim}<{elem}>"))
            },
            Type::Matrix {cols, rows, elem} => {
                let (env, elem) = elem.pprint(env);
                (env, format!("mat{cols}x{rows}<{elem}>"))
            },
            Type::Array {elem, len} => {
                let (env, elem) = elem.pprint(env);
                (env, format!("array<{elem}, {len}>"))
            },
            Type::Sampler {dim, sampled} => {
                let (env, sampled) = sampled.pprint(env);
                (env, format!("sampler{dim:?}<{sampled}>"))
            },
            Type::Uniform {inner} => {
                let (env, inner) = inner.pprint(env);
                (env, format!("uniform<{inner}>"))
            },
            Type::Struct {idx} => (env, format!("struct#{idx}")),
            Type::Function {idx} => (env, format!("fn#{idx}")),
            Type::Named {name} => (env, name.clone()),
        }
    }
}

impl PrettyPrint for ConstValue {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            ConstValue::Bool {v} => (env, format!("{v}")),
            ConstValue::Int {v} => (env, format!("{v}")),
            ConstValue::UInt {v} => (env, format!("{v}u")),
            ConstValue::Float {v} => (env, format!("{v:?}")),
            ConstValue::FVec {comps} => {
                let s = comps.iter()
                    .map(|c| format!("{c:?}"))
                    .collect::<Vec<String>>()
                    .join(", ");
                (env, format!("vec{0}({s})", comps.len()))
            },
            ConstValue::IVec {comps} => {
                let s = comps.iter()
                    .map(|c| format!("{c}"))
                    .collect::<Vec<String>>()
                    .join(", ");
                (env, format!("vec{0}<i32>({s})", comps.len()))
            },
        }
    }
}

fn print_bin_op(op: &BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Eq => "==",
        BinOp::Neq => "!=",
        BinOp::Lt => "<",
        BinOp::Leq => "<=",
        BinOp::Gt => ">",
        BinOp::Geq => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

fn print_assign_op(op: &AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "=",
        AssignOp::AddAssign => "+=",
        AssignOp::SubAssign => "-=",
        AssignOp::MulAssign => "*=",
        AssignOp::DivAssign => "/=",
    }
}

fn print_swizzle(comps: &[SwizzleComponent]) -> String {
    comps.iter()
        .map(|c| match c {
            SwizzleComponent::X => 'x',
            SwizzleComponent::Y => 'y',
            SwizzleComponent::Z => 'z',
            SwizzleComponent::W => 'w',
        })
        .collect()
}

impl PrettyPrint for Expr {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            Expr::Ident {name, ..} => (env, name.clone()),
            Expr::AccessIdent {target, field, ..} => {
                let (env, target) = target.pprint(env);
                (env, format!("{target}.{field}"))
            },
            Expr::AccessIndex {target, index, ..} => {
                let (env, target) = target.pprint(env);
                let (env, index) = index.pprint(env);
                (env, format!("{target}[{index}]"))
            },
            Expr::Assign {op, lhs, rhs, ..} => {
                let (env, lhs) = lhs.pprint(env);
                let (env, rhs) = rhs.pprint(env);
                (env, format!("{lhs} {0} {rhs}", print_assign_op(op)))
            },
            Expr::BinOp {lhs, op, rhs, ..} => {
                let (env, lhs) = lhs.pprint(env);
                let (env, rhs) = rhs.pprint(env);
                (env, format!("({lhs} {0} {rhs})", print_bin_op(op)))
            },
            Expr::UnOp {op, arg, ..} => {
                let (env, arg) = arg.pprint(env);
                let s = match op {
                    UnOp::Neg => format!("-{arg}"),
                    UnOp::Plus => format!("+{arg}"),
                    UnOp::Not => format!("!{arg}"),
                };
                (env, s)
            },
            Expr::Swizzle {target, comps, ..} => {
                let (env, target) = target.pprint(env);
                (env, format!("{target}.{0}", print_swizzle(comps)))
            },
            Expr::Cast {target_ty, args, ..} => {
                let (env, ty) = target_ty.pprint(env);
                let (env, args) = pprint_iter(args.iter(), env, ", ");
                (env, format!("{ty}({args})"))
            },
            Expr::IfExpr {cond, thn, els, ..} => {
                let (env, cond) = cond.pprint(env);
                let (env, thn) = thn.pprint(env);
                let (env, els) = els.pprint(env);
                (env, format!("select({cond}, {thn}, {els})"))
            },
            Expr::Call {func, args, ..} => {
                let (env, args) = pprint_iter(args.iter(), env, ", ");
                let f = match func {
                    FuncTarget::Named {name} => name.clone(),
                    FuncTarget::Decl {idx} => format!("fn#{idx}"),
                };
                (env, format!("{f}({args})"))
            },
            Expr::MethodCall {target, method, args, ..} => {
                let (env, target) = target.pprint(env);
                let (env, args) = pprint_iter(args.iter(), env, ", ");
                (env, format!("{target}.{method}({args})"))
            },
            Expr::Intrinsic {op, args, ..} => {
                let (env, args) = pprint_iter(args.iter(), env, ", ");
                (env, format!("{op:?}({args})"))
            },
            Expr::Const {v, ..} => v.pprint(env),
            Expr::ConstRef {idx, ..} => (env, format!("const#{idx}")),
            Expr::VarRef {idx, ..} => (env, format!("var#{idx}")),
            Expr::FuncRef {idx, ..} => (env, format!("fn#{idx}")),
            Expr::StructRef {idx, ..} => (env, format!("struct#{idx}")),
        }
    }
}

fn pprint_body(
    body: &[Stmt],
    env: PrettyPrintEnv
) -> (PrettyPrintEnv, String) {
    let env = env.incr_indent();
    let (env, s) = pprint_iter(body.iter(), env, "\n");
    (env.decr_indent(), s)
}

impl PrettyPrint for Stmt {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let indent = env.print_indent();
        match self {
            Stmt::Branch {branches, els, is_const, ..} => {
                let kw = if *is_const { "const if" } else { "if" };
                let (env, s) = branches.iter()
                    .enumerate()
                    .fold((env, vec![]), |(env, mut strs), (n, b)| {
                        let (env, cond) = b.cond.pprint(env);
                        let (env, body) = b.body.pprint(env.incr_indent());
                        let env = env.decr_indent();
                        let head = if n == 0 {
                            format!("{indent}{kw} {cond}")
                        } else {
                            format!("{indent}else if {cond}")
                        };
                        strs.push(format!("{head}\n{body}"));
                        (env, strs)
                    });
                let (env, s) = match els {
                    Some(els) => {
                        let (env, e) = els.pprint(env.incr_indent());
                        let env = env.decr_indent();
                        (env, format!("{0}\n{indent}else\n{e}", s.join("\n")))
                    },
                    None => (env, s.join("\n"))
                };
                (env, s)
            },
            Stmt::Conditional {cond, body, ..} => {
                let (env, cond) = cond.pprint(env);
                let (env, body) = body.pprint(env.incr_indent());
                (env.decr_indent(), format!("{indent}[cond({cond})]\n{body}"))
            },
            Stmt::DeclareAlias {name, target, ..} => {
                let (env, target) = target.pprint(env);
                (env, format!("{indent}alias {name} = {target};"))
            },
            Stmt::DeclareConst {name, idx, ty, init, ..} => {
                let (env, ty) = ty.pprint(env);
                let (env, init) = init.pprint(env);
                let idx = idx.map(|n| format!("#{n}")).unwrap_or_default();
                (env, format!("{indent}const {name}{idx}: {ty} = {init};"))
            },
            Stmt::DeclareExternal {vars, ..} => {
                let (env, s) = vars.iter().fold((env, vec![]), |(env, mut strs), v| {
                    let (env, ty) = v.ty.pprint(env);
                    let set = v.binding_set.map(|s| format!("set({s}) ")).unwrap_or_default();
                    let binding = v.binding_index
                        .map(|b| format!("binding({b}) "))
                        .unwrap_or_default();
                    strs.push(format!("{indent}  {set}{binding}{0}: {ty}", v.name));
                    (env, strs)
                });
                (env, format!("{indent}external {{\n{0}\n{indent}}}", s.join(",\n")))
            },
            Stmt::DeclareFunction {v} => {
                let (env, params) = v.params.iter().fold((env, vec![]), |(env, mut strs), p| {
                    let (env, ty) = p.ty.pprint(env);
                    strs.push(format!("{0}: {ty}", p.name));
                    (env, strs)
                });
                let (env, ret) = v.ret.pprint(env);
                let (env, body) = pprint_body(&v.body, env);
                let entry = match v.entry {
                    Some(stage) => format!("[entry({stage:?})] "),
                    None => String::new()
                };
                let s = format!(
                    "{indent}{entry}fn {0}({1}) -> {ret}\n{body}",
                    v.name, params.join(", ")
                );
                (env, s)
            },
            Stmt::DeclareOption {name, ty, default, ..} => {
                let (env, ty) = ty.pprint(env);
                match default {
                    Some(d) => {
                        let (env, d) = d.pprint(env);
                        (env, format!("{indent}option {name}: {ty} = {d};"))
                    },
                    None => (env, format!("{indent}option {name}: {ty};"))
                }
            },
            Stmt::DeclareStruct {desc, ..} => {
                let (env, members) = desc.members.iter()
                    .fold((env, vec![]), |(env, mut strs), m| {
                        let (env, ty) = m.ty.pprint(env);
                        let builtin = m.builtin
                            .map(|b| format!("[{b:?}] "))
                            .unwrap_or_default();
                        let loc = m.location
                            .map(|l| format!("[location({l})] "))
                            .unwrap_or_default();
                        strs.push(format!("{indent}  {builtin}{loc}{0}: {ty}", m.name));
                        (env, strs)
                    });
                let s = format!(
                    "{indent}struct {0} {{\n{1}\n{indent}}}",
                    desc.name, members.join(",\n")
                );
                (env, s)
            },
            Stmt::DeclareVariable {name, idx, ty, init, ..} => {
                let (env, ty) = ty.pprint(env);
                let idx = idx.map(|n| format!("#{n}")).unwrap_or_default();
                match init {
                    Some(e) => {
                        let (env, e) = e.pprint(env);
                        (env, format!("{indent}let {name}{idx}: {ty} = {e};"))
                    },
                    None => (env, format!("{indent}let {name}{idx}: {ty};"))
                }
            },
            Stmt::Discard {..} => (env, format!("{indent}discard;")),
            Stmt::Expr {e, ..} => {
                let (env, e) = e.pprint(env);
                (env, format!("{indent}{e};"))
            },
            Stmt::For {var, from, to, step, body, ..} => {
                let (env, from) = from.pprint(env);
                let (env, to) = to.pprint(env);
                let (env, step) = match step {
                    Some(s) => {
                        let (env, s) = s.pprint(env);
                        (env, format!(" step {s}"))
                    },
                    None => (env, String::new())
                };
                let (env, body) = pprint_body(body, env);
                (env, format!("{indent}for {var} in {from}..{to}{step}\n{body}"))
            },
            Stmt::ForEach {var, target, body, ..} => {
                let (env, target) = target.pprint(env);
                let (env, body) = pprint_body(body, env);
                (env, format!("{indent}for {var} in {target}\n{body}"))
            },
            Stmt::Import {path, ..} => (env, format!("{indent}import {path};")),
            Stmt::Multi {stmts, ..} => pprint_iter(stmts.iter(), env, "\n"),
            Stmt::NoOp {..} => (env, format!("{indent};")),
            Stmt::Return {value, ..} => {
                match value {
                    Some(e) => {
                        let (env, e) = e.pprint(env);
                        (env, format!("{indent}return {e};"))
                    },
                    None => (env, format!("{indent}return;"))
                }
            },
            Stmt::Scoped {body, ..} => {
                let (env, body) = body.pprint(env.incr_indent());
                (env.decr_indent(), format!("{indent}{{\n{body}\n{indent}}}"))
            },
            Stmt::While {cond, body, ..} => {
                let (env, cond) = cond.pprint(env);
                let (env, body) = pprint_body(body, env);
                (env, format!("{indent}while {cond}\n{body}"))
            },
        }
    }
}

impl PrettyPrint for Module {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        pprint_iter(self.stmts.iter(), env, "\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::ast_builder::*;

    #[test]
    fn pprint_binop() {
        let e = binop(int(1), BinOp::Add, int(2), Type::int());
        assert_eq!(e.pprint_default(), "(1 + 2)");
    }

    #[test]
    fn pprint_swizzle() {
        use SwizzleComponent::*;
        let e = Expr::Swizzle {
            target: Box::new(var(0, Type::vec(3, Primitive::Float))),
            comps: vec![X, Y],
            ty: Type::vec(2, Primitive::Float),
            i: i()
        };
        assert_eq!(e.pprint_default(), "var#0.xy");
    }

    #[test]
    fn pprint_vector_type() {
        let ty = Type::vec(3, Primitive::Float);
        assert_eq!(ty.pprint_default(), "vec3<f32>");
    }

    #[test]
    fn pprint_variable_declaration() {
        let s = decl_var("x", Type::int(), Some(int(1)));
        assert_eq!(s.pprint_default(), "let x: i32 = 1;");
    }

    #[test]
    fn pprint_branch() {
        let s = branch(bool_expr(true), expr_stmt(assign(var(0, Type::int()), int(1))), None);
        assert_eq!(s.pprint_default(), "if true\n  var#0 = 1;");
    }
}
