use super::ast::*;
use super::constant_fold;
use super::type_check;
use crate::internal_error;
use crate::resolution_error;
use crate::structural_error;
use crate::type_error;
use crate::option::SanitizeOptions;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::smap::*;

use std::collections::{BTreeMap, BTreeSet};

// Every name an intrinsic is callable under, in the order their indices are
// registered in the root scope.
const INTRINSICS: [(&str, IntrinsicOp); 9] = [
    ("cross", IntrinsicOp::CrossProduct),
    ("dot", IntrinsicOp::DotProduct),
    ("exp", IntrinsicOp::Exp),
    ("length", IntrinsicOp::Length),
    ("max", IntrinsicOp::Max),
    ("min", IntrinsicOp::Min),
    ("normalize", IntrinsicOp::Normalize),
    ("pow", IntrinsicOp::Pow),
    ("reflect", IntrinsicOp::Reflect),
];

const PRIMITIVE_TYPES: [(&str, Primitive); 4] = [
    ("bool", Primitive::Bool),
    ("f32", Primitive::Float),
    ("i32", Primitive::Int),
    ("u32", Primitive::UInt),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdentKind {
    Alias,
    Constant,
    Function,
    Intrinsic,
    Module,
    Struct,
    Type,
    Variable,
    Unresolved,
}

#[derive(Clone, Debug)]
struct Ident {
    kind: IdentKind,
    index: usize,
}

#[derive(Clone, Debug, Default)]
struct Scope {
    names: BTreeMap<String, Ident>,
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub entry: Option<ShaderStage>,
}

pub struct SanitizeEnv<'a> {
    opts: &'a SanitizeOptions,
    scopes: Vec<Scope>,
    constants: Vec<ConstValue>,
    variables: Vec<Type>,
    var_names: Vec<String>,
    functions: Vec<FunctionData>,
    structs: Vec<StructDesc>,
    aliases: Vec<Expr>,
    types: Vec<Type>,
    modules: BTreeMap<String, usize>,
    bindings: BTreeSet<(u32, u32)>,
    entry_stages: BTreeSet<ShaderStage>,
    current_ret: Option<Type>,
}

impl<'a> SanitizeEnv<'a> {
    fn new(opts: &'a SanitizeOptions) -> SanitizeEnv<'a> {
        let mut root = Scope::default();
        for (idx, (name, _)) in INTRINSICS.iter().enumerate() {
            let id = Ident {kind: IdentKind::Intrinsic, index: idx};
            root.names.insert(name.to_string(), id);
        }
        let mut types = vec![];
        for (idx, (name, p)) in PRIMITIVE_TYPES.iter().enumerate() {
            let id = Ident {kind: IdentKind::Type, index: idx};
            root.names.insert(name.to_string(), id);
            types.push(Type::primitive(*p));
        }
        SanitizeEnv {
            opts,
            scopes: vec![root],
            constants: vec![],
            variables: vec![],
            var_names: vec![],
            functions: vec![],
            structs: vec![],
            aliases: vec![],
            types,
            modules: BTreeMap::new(),
            bindings: BTreeSet::new(),
            entry_stages: BTreeSet::new(),
            current_ret: None,
        }
    }

    fn enter_scope(mut self) -> Self {
        self.scopes.push(Scope::default());
        self
    }

    fn exit_scope(mut self) -> Self {
        self.scopes.pop();
        self
    }

    // Walks outward through the enclosing lexical environments.
    fn find(&self, name: &str) -> Option<(IdentKind, usize)> {
        self.scopes.iter()
            .rev()
            .find_map(|s| s.names.get(name))
            .map(|id| (id.kind, id.index))
    }

    fn find_in_current_scope(&self, name: &str) -> Option<(IdentKind, usize)> {
        self.scopes.last()
            .and_then(|s| s.names.get(name))
            .map(|id| (id.kind, id.index))
    }

    fn register_ident(mut self, name: &str, kind: IdentKind, index: usize) -> Self {
        let scope = self.scopes.last_mut().unwrap();
        scope.names.insert(name.to_string(), Ident {kind, index});
        self
    }

    fn register_checked(
        self,
        name: &str,
        kind: IdentKind,
        index: usize,
        i: &Info
    ) -> CompileResult<Self> {
        match self.find_in_current_scope(name) {
            Some(_) => structural_error!(i, "Identifier {name} is already \
                                             declared in this scope"),
            None => Ok(self.register_ident(name, kind, index))
        }
    }

    fn register_variable(mut self, name: &str, ty: Type) -> (Self, usize) {
        let idx = self.variables.len();
        self.variables.push(ty);
        self.var_names.push(name.to_string());
        let env = self.register_ident(name, IdentKind::Variable, idx);
        (env, idx)
    }

    // Renames an identifier so that it collides neither with any visible or
    // previously registered name nor with a reserved identifier.
    fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| {
            self.opts.reserved_identifiers.contains(name)
                || self.find(name).is_some()
                || self.var_names.iter().any(|v| v == name)
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn variable_name(&self, base: &str) -> String {
        let shadowed = self.opts.make_variable_name_unique
            && self.find(base).is_some();
        if shadowed || self.opts.reserved_identifiers.contains(base) {
            self.unique_name(base)
        } else {
            base.to_string()
        }
    }

    // The compile-time value of an expression, if it has one.
    fn const_value_of(&self, e: &Expr) -> Option<ConstValue> {
        match e {
            Expr::Const {v, ..} => Some(v.clone()),
            Expr::ConstRef {idx, ..} => self.constants.get(*idx).cloned(),
            _ => None
        }
    }

    fn const_bool_of(&self, e: &Expr) -> Option<bool> {
        self.const_value_of(e).and_then(|v| v.get_bool_value())
    }

    fn resolve_type(&self, ty: Type, i: &Info) -> CompileResult<Type> {
        match ty {
            Type::Named {name} => {
                match self.find(&name) {
                    Some((IdentKind::Struct, idx)) => Ok(Type::Struct {idx}),
                    Some((IdentKind::Type, idx)) => Ok(self.types[idx].clone()),
                    Some((IdentKind::Alias, idx)) => {
                        match &self.aliases[idx] {
                            Expr::StructRef {idx, ..} => Ok(Type::Struct {idx: *idx}),
                            _ => type_error!(i, "Alias {name} does not name a type")
                        }
                    },
                    Some(_) => type_error!(i, "Identifier {name} does not \
                                               name a type"),
                    None => {
                        if self.opts.allow_partial_sanitization {
                            Ok(Type::Named {name})
                        } else {
                            resolution_error!(i, "Unknown type {name}")
                        }
                    }
                }
            },
            Type::Vector {dim, elem} => {
                if (2..=4).contains(&dim) {
                    Ok(Type::Vector {dim, elem})
                } else {
                    type_error!(i, "Vectors must have two to four components, \
                                    found {dim}")
                }
            },
            Type::Matrix {cols, rows, elem} => {
                if (2..=4).contains(&cols) && (2..=4).contains(&rows) {
                    Ok(Type::Matrix {cols, rows, elem})
                } else {
                    type_error!(i, "Matrix dimensions must be between two and \
                                    four, found {cols}x{rows}")
                }
            },
            Type::Array {elem, len} => {
                if len == 0 {
                    structural_error!(i, "Array length must be positive")
                } else {
                    let elem = self.resolve_type(*elem, i)?;
                    Ok(Type::Array {elem: Box::new(elem), len})
                }
            },
            Type::Uniform {inner} => {
                let inner = self.resolve_type(*inner, i)?;
                match inner {
                    Type::Struct {..} | Type::Named {..} => {
                        Ok(Type::Uniform {inner: Box::new(inner)})
                    },
                    _ => type_error!(i, "Uniform blocks must contain a struct \
                                         type, found {inner:?}")
                }
            },
            _ => Ok(ty)
        }
    }

    // Resolves the parameter and return types of a function on demand, since
    // a call may be validated before the callee's declaration is visited.
    fn signature(&self, idx: usize, i: &Info) -> CompileResult<(Vec<Type>, Type)> {
        let data = match self.functions.get(idx) {
            Some(data) => data,
            None => return internal_error!(i, "Reference to unregistered \
                                               function {idx}")
        };
        let params = data.params.iter()
            .map(|ty| self.resolve_type(ty.clone(), i))
            .collect::<CompileResult<Vec<Type>>>()?;
        let ret = self.resolve_type(data.ret.clone(), i)?;
        Ok((params, ret))
    }

    fn struct_desc(&self, idx: usize, i: &Info) -> CompileResult<&StructDesc> {
        match self.structs.get(idx) {
            Some(desc) => Ok(desc),
            None => internal_error!(i, "Reference to unregistered struct {idx}")
        }
    }

    fn struct_member_type(
        &self,
        struct_idx: usize,
        member_idx: usize,
        i: &Info
    ) -> CompileResult<Type> {
        let desc = self.struct_desc(struct_idx, i)?;
        match desc.members.get(member_idx) {
            Some(m) => Ok(m.ty.clone()),
            None => type_error!(i, "Member index {member_idx} is out of range \
                for struct {0}", desc.name)
        }
    }
}

pub fn apply(module: Module, opts: &SanitizeOptions) -> CompileResult<Module> {
    let env = SanitizeEnv::new(opts);
    let (_, stmts) = sanitize_stmts(env, module.stmts)?;
    Ok(Module {stmts})
}

fn sanitize_stmts<'a>(
    env: SanitizeEnv<'a>,
    stmts: Vec<Stmt>
) -> CompileResult<(SanitizeEnv<'a>, Vec<Stmt>)> {
    let env = pre_register_functions(env, &stmts)?;
    stmts.sfold_owned_result(Ok((env, vec![])), |(env, acc), s| {
        sanitize_stmt(env, acc, s)
    })
}

// Registers function names ahead of their bodies so that a function may call
// another function declared later in the same scope. Types in the signature
// stay unresolved until the declaration itself is visited.
fn pre_register_functions<'a>(
    env: SanitizeEnv<'a>,
    stmts: &[Stmt]
) -> CompileResult<SanitizeEnv<'a>> {
    stmts.sfold_result(Ok(env), |mut env: SanitizeEnv<'a>, s| {
        match s {
            Stmt::DeclareFunction {v} if env.current_ret.is_none() => {
                let idx = env.functions.len();
                env.functions.push(FunctionData {
                    name: v.name.clone(),
                    params: v.params.iter().map(|p| p.ty.clone()).collect(),
                    ret: v.ret.clone(),
                    entry: v.entry,
                });
                env.register_checked(&v.name, IdentKind::Function, idx, &v.i)
            },
            _ => Ok(env)
        }
    })
}

fn sanitize_exprs<'a>(
    env: SanitizeEnv<'a>,
    exprs: Vec<Expr>
) -> CompileResult<(SanitizeEnv<'a>, Vec<Expr>)> {
    exprs.smap_accum_l_result(Ok(env), sanitize_expr)
}

// Sanitizes a statement that forms a block of its own (a branch arm, a loop
// body wrapper or similar), wrapping multiple results back into one node.
fn sanitize_block<'a>(
    env: SanitizeEnv<'a>,
    s: Stmt
) -> CompileResult<(SanitizeEnv<'a>, Stmt)> {
    let i = s.get_info();
    let (env, mut stmts) = sanitize_stmt(env, vec![], s)?;
    let s = if stmts.len() == 1 {
        stmts.pop().unwrap()
    } else if stmts.is_empty() {
        Stmt::NoOp {i}
    } else {
        Stmt::Multi {stmts, i}
    };
    Ok((env, s))
}

fn builtin_member_type(b: &BuiltinVar) -> Type {
    match b {
        BuiltinVar::Position | BuiltinVar::FragCoord => {
            Type::vec(4, Primitive::Float)
        },
        BuiltinVar::FragDepth => Type::float(),
        BuiltinVar::VertexIndex | BuiltinVar::InstanceIndex => Type::int(),
    }
}

// Rejects structs that contain themselves, directly or transitively. The
// registration order makes this impossible for trees produced by the pass
// itself, but member indices of hand-built input are not trusted.
fn validate_struct_cycles(
    env: &SanitizeEnv,
    members: &[StructMember],
    own_idx: usize,
    i: &Info
) -> CompileResult<()> {
    fn walk(
        env: &SanitizeEnv,
        ty: &Type,
        own_idx: usize,
        visited: &mut BTreeSet<usize>,
        i: &Info
    ) -> CompileResult<()> {
        match ty {
            Type::Struct {idx} => {
                if *idx == own_idx {
                    return structural_error!(i, "Struct definitions cannot be \
                                                 cyclic");
                }
                if visited.insert(*idx) {
                    let desc = env.struct_desc(*idx, i)?;
                    let member_types = desc.members.iter()
                        .map(|m| m.ty.clone())
                        .collect::<Vec<Type>>();
                    for ty in &member_types {
                        walk(env, ty, own_idx, visited, i)?;
                    }
                }
                Ok(())
            },
            Type::Array {elem, ..} => walk(env, elem, own_idx, visited, i),
            _ => Ok(())
        }
    }
    let mut visited = BTreeSet::new();
    for m in members {
        walk(env, &m.ty, own_idx, &mut visited, i)?;
    }
    Ok(())
}

fn sanitize_struct_members<'a>(
    env: SanitizeEnv<'a>,
    members: Vec<StructMember>,
    i: &Info
) -> CompileResult<(SanitizeEnv<'a>, Vec<StructMember>)> {
    let (env, members) = members.sfold_owned_result(
        Ok((env, vec![])),
        |(env, mut acc): (SanitizeEnv<'a>, Vec<StructMember>), m: StructMember| {
            let StructMember {name, ty, builtin, cond, location, i} = m;
            // A conditional member is only part of the struct when its
            // compile-time condition holds.
            let (env, cond) = match cond {
                Some(c) => {
                    let (env, c) = sanitize_expr(env, c)?;
                    match env.const_bool_of(&c) {
                        Some(true) => (env, None),
                        Some(false) => return Ok((env, acc)),
                        None => {
                            if env.opts.allow_partial_sanitization {
                                (env, Some(c))
                            } else {
                                return structural_error!(i, "Member condition \
                                    of {name} must be a compile-time constant");
                            }
                        }
                    }
                },
                None => (env, None)
            };
            let ty = env.resolve_type(ty, &i)?;
            match &ty {
                Type::Primitive {..} | Type::Vector {..} | Type::Matrix {..} |
                Type::Array {..} | Type::Struct {..} | Type::Named {..} => (),
                _ => return type_error!(i, "Type {ty:?} cannot be used as a \
                                            struct member")
            }
            if let Some(b) = &builtin {
                let expected = builtin_member_type(b);
                if ty != expected {
                    return type_error!(i, "Builtin {b:?} requires the member \
                                           type {expected:?}, found {ty:?}");
                }
            }
            if acc.iter().any(|m: &StructMember| m.name == name) {
                return structural_error!(i, "Duplicate struct member {name}");
            }
            if let Some(loc) = location {
                if acc.iter().any(|m| m.location == Some(loc)) {
                    return structural_error!(i, "Duplicate member location \
                                                 {loc}");
                }
            }
            acc.push(StructMember {name, ty, builtin, cond, location, i});
            Ok((env, acc))
        }
    )?;
    validate_struct_cycles(&env, &members, env.structs.len(), i)?;
    Ok((env, members))
}

fn sanitize_externals<'a>(
    mut env: SanitizeEnv<'a>,
    vars: Vec<ExternalVar>
) -> CompileResult<(SanitizeEnv<'a>, Vec<ExternalVar>)> {
    let mut out = vec![];
    for v in vars {
        let ExternalVar {name, ty, binding_set, binding_index, idx: _, i} = v;
        let ty = env.resolve_type(ty, &i)?;
        match &ty {
            Type::Sampler {..} | Type::Uniform {..} => (),
            _ => return type_error!(i, "External resources must be samplers \
                                        or uniform blocks, found {ty:?}")
        }
        let set = binding_set.unwrap_or(0);
        let binding = match binding_index {
            Some(b) => {
                if env.bindings.contains(&(set, b)) {
                    return structural_error!(i, "Binding (set {set}, index \
                        {b}) is used by more than one external resource");
                }
                b
            },
            None => {
                // Auto-assign the lowest binding index not yet taken in the
                // requested set.
                let mut b = 0;
                while env.bindings.contains(&(set, b)) {
                    b += 1;
                }
                b
            }
        };
        env.bindings.insert((set, binding));
        let (new_env, idx) = env.register_variable(&name, ty.clone());
        env = new_env;
        out.push(ExternalVar {
            name,
            ty,
            binding_set: Some(set),
            binding_index: Some(binding),
            idx: Some(idx),
            i
        });
    }
    Ok((env, out))
}

fn reduce_for_loop(
    var: String,
    var_idx: usize,
    var_ty: Type,
    from: Expr,
    to: Expr,
    step: Option<Expr>,
    unroll: bool,
    body: Vec<Stmt>,
    i: Info
) -> Stmt {
    let counter = |i: &Info| Expr::VarRef {
        idx: var_idx, ty: var_ty.clone(), i: i.clone()
    };
    let step = step.unwrap_or_else(|| {
        let one = if var_ty == Type::uint() {
            ConstValue::UInt {v: 1}
        } else {
            ConstValue::Int {v: 1}
        };
        Expr::Const {v: one, ty: var_ty.clone(), i: i.clone()}
    });
    let cond = Expr::BinOp {
        lhs: Box::new(counter(&i)),
        op: BinOp::Lt,
        rhs: Box::new(to),
        ty: Type::bool(),
        i: i.clone()
    };
    let incr = Expr::Assign {
        op: AssignOp::Assign,
        lhs: Box::new(counter(&i)),
        rhs: Box::new(Expr::BinOp {
            lhs: Box::new(counter(&i)),
            op: BinOp::Add,
            rhs: Box::new(step),
            ty: var_ty.clone(),
            i: i.clone()
        }),
        ty: var_ty.clone(),
        i: i.clone()
    };
    let mut while_body = body;
    while_body.push(Stmt::Expr {e: incr, i: i.clone()});
    let decl = Stmt::DeclareVariable {
        name: var,
        idx: Some(var_idx),
        ty: var_ty,
        init: Some(from),
        i: i.clone()
    };
    let while_stmt = Stmt::While {cond, unroll, body: while_body, i: i.clone()};
    Stmt::Scoped {
        body: Box::new(Stmt::Multi {stmts: vec![decl, while_stmt], i: i.clone()}),
        i
    }
}

fn reduce_for_each_loop(
    var: String,
    var_idx: usize,
    elem_ty: Type,
    counter_name: String,
    counter_idx: usize,
    target: Expr,
    len: usize,
    unroll: bool,
    body: Vec<Stmt>,
    i: Info
) -> Stmt {
    let counter = |i: &Info| Expr::VarRef {
        idx: counter_idx, ty: Type::uint(), i: i.clone()
    };
    let uint_const = |v: u32, i: &Info| Expr::Const {
        v: ConstValue::UInt {v}, ty: Type::uint(), i: i.clone()
    };
    let counter_decl = Stmt::DeclareVariable {
        name: counter_name,
        idx: Some(counter_idx),
        ty: Type::uint(),
        init: Some(uint_const(0, &i)),
        i: i.clone()
    };
    // The element variable re-binds from the array on every iteration.
    let elem_decl = Stmt::DeclareVariable {
        name: var,
        idx: Some(var_idx),
        ty: elem_ty.clone(),
        init: Some(Expr::AccessIndex {
            target: Box::new(target),
            index: Box::new(counter(&i)),
            ty: elem_ty,
            i: i.clone()
        }),
        i: i.clone()
    };
    let cond = Expr::BinOp {
        lhs: Box::new(counter(&i)),
        op: BinOp::Lt,
        rhs: Box::new(uint_const(len as u32, &i)),
        ty: Type::bool(),
        i: i.clone()
    };
    let incr = Expr::Assign {
        op: AssignOp::Assign,
        lhs: Box::new(counter(&i)),
        rhs: Box::new(Expr::BinOp {
            lhs: Box::new(counter(&i)),
            op: BinOp::Add,
            rhs: Box::new(uint_const(1, &i)),
            ty: Type::uint(),
            i: i.clone()
        }),
        ty: Type::uint(),
        i: i.clone()
    };
    let mut while_body = vec![elem_decl];
    while_body.extend(body);
    while_body.push(Stmt::Expr {e: incr, i: i.clone()});
    let while_stmt = Stmt::While {cond, unroll, body: while_body, i: i.clone()};
    Stmt::Scoped {
        body: Box::new(Stmt::Multi {
            stmts: vec![counter_decl, while_stmt], i: i.clone()
        }),
        i
    }
}

fn sanitize_branch<'a>(
    env: SanitizeEnv<'a>,
    mut acc: Vec<Stmt>,
    branches: Vec<CondBranch>,
    els: Option<Box<Stmt>>,
    is_const: bool,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Vec<Stmt>)> {
    if branches.is_empty() {
        return internal_error!(i, "Branch statement without branches");
    }
    if is_const {
        // Const branches collapse unconditionally; every condition must be
        // decidable at compile time.
        let mut env = env;
        for b in branches {
            let (new_env, cond) = sanitize_expr(env, b.cond)?;
            env = new_env;
            type_check::condition_must_be_bool(cond.get_type(), &i)?;
            match env.const_bool_of(&cond) {
                Some(true) => {
                    let scoped = env.enter_scope();
                    let (scoped, body) = sanitize_block(scoped, b.body)?;
                    acc.push(body);
                    return Ok((scoped.exit_scope(), acc));
                },
                Some(false) => (),
                None => {
                    return structural_error!(i, "Conditions of const branches \
                        must be compile-time constants");
                }
            }
        }
        match els {
            Some(els) => {
                let scoped = env.enter_scope();
                let (scoped, body) = sanitize_block(scoped, *els)?;
                acc.push(body);
                Ok((scoped.exit_scope(), acc))
            },
            None => Ok((env, acc))
        }
    } else {
        // Branches whose condition folds to a literal are eliminated; a
        // literally-true branch absorbs the rest of the chain and the
        // discarded branches are never emitted.
        let mut env = env;
        let mut kept: Vec<CondBranch> = vec![];
        let mut collapsed = None;
        for b in branches {
            let (new_env, cond) = sanitize_expr(env, b.cond)?;
            env = new_env;
            type_check::condition_must_be_bool(cond.get_type(), &i)?;
            match env.const_bool_of(&cond) {
                Some(false) => (),
                Some(true) => {
                    collapsed = Some(b.body);
                    break;
                },
                None => {
                    let scoped = env.enter_scope();
                    let (scoped, body) = sanitize_block(scoped, b.body)?;
                    env = scoped.exit_scope();
                    kept.push(CondBranch {cond, body});
                }
            }
        }
        let (env, els) = match (collapsed, els) {
            (Some(body), _) => {
                let scoped = env.enter_scope();
                let (scoped, body) = sanitize_block(scoped, body)?;
                (scoped.exit_scope(), Some(Box::new(body)))
            },
            (None, Some(els)) => {
                let scoped = env.enter_scope();
                let (scoped, body) = sanitize_block(scoped, *els)?;
                (scoped.exit_scope(), Some(Box::new(body)))
            },
            (None, None) => (env, None)
        };
        if kept.is_empty() {
            if let Some(els) = els {
                acc.push(*els);
            }
            Ok((env, acc))
        } else {
            acc.push(Stmt::Branch {branches: kept, els, is_const: false, i});
            Ok((env, acc))
        }
    }
}

fn sanitize_stmt<'a>(
    env: SanitizeEnv<'a>,
    mut acc: Vec<Stmt>,
    s: Stmt
) -> CompileResult<(SanitizeEnv<'a>, Vec<Stmt>)> {
    match s {
        Stmt::Branch {branches, els, is_const, i} => {
            sanitize_branch(env, acc, branches, els, is_const, i)
        },
        Stmt::Conditional {cond, body, i} => {
            let (env, cond) = sanitize_expr(env, cond)?;
            type_check::condition_must_be_bool(cond.get_type(), &i)?;
            match env.const_bool_of(&cond) {
                Some(true) => sanitize_stmt(env, acc, *body),
                Some(false) => Ok((env, acc)),
                None => {
                    if env.opts.allow_partial_sanitization {
                        let (env, body) = sanitize_block(env, *body)?;
                        acc.push(Stmt::Conditional {cond, body: Box::new(body), i});
                        Ok((env, acc))
                    } else {
                        structural_error!(i, "Conditional statements require \
                            a compile-time condition")
                    }
                }
            }
        },
        Stmt::DeclareAlias {name, idx: _, target, i} => {
            let target = resolve_alias_target(&env, target, &i)?;
            let idx = env.aliases.len();
            let mut env = env.register_checked(&name, IdentKind::Alias, idx, &i)?;
            env.aliases.push(target.clone());
            if !env.opts.remove_aliases {
                acc.push(Stmt::DeclareAlias {name, idx: Some(idx), target, i});
            }
            Ok((env, acc))
        },
        Stmt::DeclareConst {name, idx: _, ty, init, i} => {
            let (env, init) = sanitize_expr(env, init)?;
            let v = match env.const_value_of(&init) {
                Some(v) => v,
                None => return structural_error!(i, "Initializer of constant \
                    {name} must be a compile-time constant")
            };
            let ty = env.resolve_type(ty, &i)?;
            let ty = if ty.is_unknown() {
                v.value_type()
            } else if ty != v.value_type() {
                return type_error!(i, "Constant {name} declared as {ty:?} but \
                    its initializer has type {0:?}", v.value_type());
            } else {
                ty
            };
            let idx = env.constants.len();
            let mut env = env.register_checked(&name, IdentKind::Constant, idx, &i)?;
            env.constants.push(v.clone());
            if !env.opts.remove_const_declaration {
                let init = Expr::Const {v, ty: ty.clone(), i: i.clone()};
                acc.push(Stmt::DeclareConst {name, idx: Some(idx), ty, init, i});
            }
            Ok((env, acc))
        },
        Stmt::DeclareExternal {vars, i} => {
            if env.current_ret.is_some() {
                return structural_error!(i, "External resources must be \
                    declared at module scope");
            }
            let (env, vars) = sanitize_externals(env, vars)?;
            acc.push(Stmt::DeclareExternal {vars, i});
            Ok((env, acc))
        },
        Stmt::DeclareFunction {v} => {
            let (env, v) = sanitize_function(env, v)?;
            acc.push(Stmt::DeclareFunction {v});
            Ok((env, acc))
        },
        Stmt::DeclareOption {name, idx: _, ty, default, i} => {
            if env.current_ret.is_some() {
                return structural_error!(i, "Options must be declared at \
                    module scope");
            }
            let ty = env.resolve_type(ty, &i)?;
            if !ty.is_primitive() {
                return type_error!(i, "Option {name} must have a primitive \
                    type, found {ty:?}");
            }
            let (env, default) = match default {
                Some(d) => {
                    let (env, d) = sanitize_expr(env, d)?;
                    let v = env.const_value_of(&d);
                    match v {
                        Some(v) => (env, Some(v)),
                        None => return structural_error!(i, "Default value of \
                            option {name} must be a compile-time constant")
                    }
                },
                None => (env, None)
            };
            if let Some(v) = &default {
                if v.value_type() != ty {
                    return type_error!(i, "Default value of option {name} has \
                        type {0:?}, expected {ty:?}", v.value_type());
                }
            }
            // A supplied value always wins over the declared default.
            let value = match env.opts.option_values.get(&name) {
                Some(v) => {
                    if v.value_type() != ty {
                        return type_error!(i, "Value supplied for option \
                            {name} has type {0:?}, expected {ty:?}",
                            v.value_type());
                    }
                    v.clone()
                },
                None => match default.clone() {
                    Some(v) => v,
                    None => return structural_error!(i, "Option {name} has \
                        neither a supplied value nor a default")
                }
            };
            let idx = env.constants.len();
            let mut env = env.register_checked(&name, IdentKind::Constant, idx, &i)?;
            env.constants.push(value.clone());
            if !env.opts.remove_option_declaration {
                // The declaration carries its specialized value from here on,
                // so re-sanitizing the tree reproduces the same constant.
                let default = Some(Expr::Const {
                    v: value, ty: ty.clone(), i: i.clone()
                });
                acc.push(Stmt::DeclareOption {name, idx: Some(idx), ty, default, i});
            }
            Ok((env, acc))
        },
        Stmt::DeclareStruct {idx: _, desc, i} => {
            let StructDesc {name, members} = desc;
            let (env, members) = sanitize_struct_members(env, members, &i)?;
            let idx = env.structs.len();
            let mut env = env.register_checked(&name, IdentKind::Struct, idx, &i)?;
            env.structs.push(StructDesc {
                name: name.clone(),
                members: members.clone()
            });
            acc.push(Stmt::DeclareStruct {
                idx: Some(idx),
                desc: StructDesc {name, members},
                i
            });
            Ok((env, acc))
        },
        Stmt::DeclareVariable {name, idx: _, ty, init, i} => {
            if env.current_ret.is_none() {
                return structural_error!(i, "Variables must be declared \
                    inside a function");
            }
            let (env, init) = match init {
                Some(e) => {
                    let (env, e) = sanitize_expr(env, e)?;
                    (env, Some(e))
                },
                None => (env, None)
            };
            let ty = env.resolve_type(ty, &i)?;
            let ty = match (&ty, &init) {
                (Type::Unknown, Some(e)) => e.get_type().clone(),
                (Type::Unknown, None) => {
                    return type_error!(i, "Variable {name} needs a type \
                        annotation or an initializer");
                },
                (_, Some(e)) => {
                    let ity = e.get_type();
                    if *ity != ty && !ity.is_unknown() {
                        return type_error!(i, "Variable {name} declared as \
                            {ty:?} but its initializer has type {ity:?}");
                    }
                    ty
                },
                (_, None) => ty
            };
            let name = env.variable_name(&name);
            let (env, idx) = env.register_variable(&name, ty.clone());
            acc.push(Stmt::DeclareVariable {name, idx: Some(idx), ty, init, i});
            Ok((env, acc))
        },
        Stmt::Discard {i} => {
            if env.current_ret.is_none() {
                return structural_error!(i, "Discard statements must appear \
                    inside a function");
            }
            acc.push(Stmt::Discard {i});
            Ok((env, acc))
        },
        Stmt::Expr {e, i} => {
            let (env, e) = sanitize_expr(env, e)?;
            acc.push(Stmt::Expr {e, i});
            Ok((env, acc))
        },
        Stmt::For {var, var_idx: _, from, to, step, unroll, body, i} => {
            let (env, from) = sanitize_expr(env, from)?;
            let (env, to) = sanitize_expr(env, to)?;
            let (env, step) = match step {
                Some(s) => {
                    let (env, s) = sanitize_expr(env, s)?;
                    (env, Some(s))
                },
                None => (env, None)
            };
            let var_ty = from.get_type().clone();
            if !var_ty.is_integer() && !var_ty.is_unknown() {
                return type_error!(i, "For loop bounds must be integers, \
                    found {var_ty:?}");
            }
            for bound in [Some(&to), step.as_ref()].into_iter().flatten() {
                let ty = bound.get_type();
                if *ty != var_ty && !ty.is_unknown() {
                    return type_error!(i, "For loop bounds must all have the \
                        same type, found {var_ty:?} and {ty:?}");
                }
            }
            let env = env.enter_scope();
            let name = env.variable_name(&var);
            let (env, var_idx) = env.register_variable(&name, var_ty.clone());
            let (env, body) = sanitize_stmts(env, body)?;
            let env = env.exit_scope();
            if env.opts.reduce_loops_to_while {
                acc.push(reduce_for_loop(
                    name, var_idx, var_ty, from, to, step, unroll, body, i
                ));
            } else {
                acc.push(Stmt::For {
                    var: name, var_idx: Some(var_idx), from, to, step, unroll,
                    body, i
                });
            }
            Ok((env, acc))
        },
        Stmt::ForEach {var, var_idx: _, target, unroll, body, i} => {
            let (env, target) = sanitize_expr(env, target)?;
            let (elem_ty, len) = match target.get_type() {
                Type::Array {elem, len} => ((**elem).clone(), *len),
                ty => return type_error!(i, "For-each loops iterate arrays, \
                    found {ty:?}")
            };
            let env = env.enter_scope();
            let counter_name = env.unique_name(&format!("{var}_idx"));
            let (env, counter_idx) = env.register_variable(&counter_name, Type::uint());
            let name = env.variable_name(&var);
            let (env, var_idx) = env.register_variable(&name, elem_ty.clone());
            let (env, body) = sanitize_stmts(env, body)?;
            let env = env.exit_scope();
            if env.opts.reduce_loops_to_while {
                acc.push(reduce_for_each_loop(
                    name, var_idx, elem_ty, counter_name, counter_idx, target,
                    len, unroll, body, i
                ));
            } else {
                acc.push(Stmt::ForEach {
                    var: name, var_idx: Some(var_idx), target, unroll, body, i
                });
            }
            Ok((env, acc))
        },
        Stmt::Import {path, module_idx: _, i} => {
            if env.current_ret.is_some() {
                return structural_error!(i, "Imports must appear at module \
                    scope");
            }
            if env.modules.contains_key(&path) {
                acc.push(Stmt::NoOp {i});
                return Ok((env, acc));
            }
            let resolver = match &env.opts.module_resolver {
                Some(r) => r.clone(),
                None => return structural_error!(i, "Unresolved import path \
                    {path}: no module resolver was configured")
            };
            let imported = match resolver.resolve(&path) {
                Some(m) => m,
                None => return structural_error!(i, "Unresolved import path \
                    {path}")
            };
            let mut env = env;
            let module_idx = env.modules.len();
            env.modules.insert(path.clone(), module_idx);
            let module_name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let env = env.register_ident(&module_name, IdentKind::Module, module_idx);
            // The imported declarations are spliced in place of the import,
            // registering their names in the current environment.
            let (env, stmts) = sanitize_stmts(env, imported.stmts)?;
            acc.push(Stmt::Multi {stmts, i});
            Ok((env, acc))
        },
        Stmt::Multi {stmts, i} => {
            let (env, stmts) = sanitize_stmts(env, stmts)?;
            acc.push(Stmt::Multi {stmts, i});
            Ok((env, acc))
        },
        Stmt::NoOp {i} => {
            acc.push(Stmt::NoOp {i});
            Ok((env, acc))
        },
        Stmt::Return {value, i} => {
            let ret = match &env.current_ret {
                Some(ret) => ret.clone(),
                None => return structural_error!(i, "Return statements must \
                    appear inside a function")
            };
            let (env, value) = match value {
                Some(e) => {
                    let (env, e) = sanitize_expr(env, e)?;
                    (env, Some(e))
                },
                None => (env, None)
            };
            match &value {
                Some(e) => {
                    let ty = e.get_type();
                    if ret == Type::Void {
                        return type_error!(i, "Function does not return a \
                            value");
                    }
                    if *ty != ret && !ty.is_unknown() {
                        return type_error!(i, "Return value type {ty:?} does \
                            not match the declared return type {ret:?}");
                    }
                },
                None => {
                    if ret != Type::Void {
                        return type_error!(i, "Function must return a value \
                            of type {ret:?}");
                    }
                }
            }
            acc.push(Stmt::Return {value, i});
            Ok((env, acc))
        },
        Stmt::Scoped {body, i} => {
            let env = env.enter_scope();
            let (env, body) = sanitize_block(env, *body)?;
            let env = env.exit_scope();
            acc.push(Stmt::Scoped {body: Box::new(body), i});
            Ok((env, acc))
        },
        Stmt::While {cond, unroll, body, i} => {
            let (env, cond) = sanitize_expr(env, cond)?;
            type_check::condition_must_be_bool(cond.get_type(), &i)?;
            let env = env.enter_scope();
            let (env, body) = sanitize_stmts(env, body)?;
            let env = env.exit_scope();
            acc.push(Stmt::While {cond, unroll, body, i});
            Ok((env, acc))
        },
    }
}

fn sanitize_function<'a>(
    env: SanitizeEnv<'a>,
    v: FunDecl
) -> CompileResult<(SanitizeEnv<'a>, FunDecl)> {
    let FunDecl {
        name, idx: _, params, ret, entry, depth_write, early_fragment_tests,
        body, i
    } = v;
    if env.current_ret.is_some() {
        return structural_error!(i, "Function declarations cannot be nested");
    }
    let mut env = env;
    let registered = match env.find(&name) {
        Some((IdentKind::Function, idx)) => Some(idx),
        _ => None
    };
    let idx = match registered {
        Some(idx) => idx,
        None => {
            let idx = env.functions.len();
            env.functions.push(FunctionData {
                name: name.clone(),
                params: params.iter().map(|p| p.ty.clone()).collect(),
                ret: ret.clone(),
                entry,
            });
            env = env.register_ident(&name, IdentKind::Function, idx);
            idx
        }
    };
    let ret = env.resolve_type(ret, &i)?;
    if let Some(stage) = entry {
        if !env.entry_stages.insert(stage) {
            return structural_error!(i, "Multiple entry points declared for \
                the {stage:?} stage");
        }
        if params.len() > 1 {
            return structural_error!(i, "Entry functions accept at most one \
                input struct parameter");
        }
        match &ret {
            Type::Void | Type::Struct {..} | Type::Named {..} => (),
            _ => return structural_error!(i, "Entry functions return an \
                output struct or nothing, found {ret:?}")
        }
        if stage != ShaderStage::Fragment {
            if depth_write.is_some() {
                return structural_error!(i, "Depth write modes only apply to \
                    fragment entry points");
            }
            if early_fragment_tests.is_some() {
                return structural_error!(i, "Early fragment tests only apply \
                    to fragment entry points");
            }
        }
    } else if depth_write.is_some() || early_fragment_tests.is_some() {
        return structural_error!(i, "Render state attributes only apply to \
            entry points");
    }
    let mut scoped = env.enter_scope();
    scoped.current_ret = Some(ret.clone());
    let mut new_params = vec![];
    let mut param_types = vec![];
    for p in params {
        let Param {name: pname, ty, idx: _, i: pi} = p;
        let ty = scoped.resolve_type(ty, &pi)?;
        if entry.is_some() && !matches!(ty, Type::Struct {..} | Type::Named {..}) {
            return structural_error!(pi, "Entry function parameters must be \
                input structs, found {ty:?}");
        }
        let pname = scoped.variable_name(&pname);
        let (next, pidx) = scoped.register_variable(&pname, ty.clone());
        scoped = next;
        param_types.push(ty.clone());
        new_params.push(Param {name: pname, ty, idx: Some(pidx), i: pi});
    }
    scoped.functions[idx] = FunctionData {
        name: name.clone(),
        params: param_types,
        ret: ret.clone(),
        entry,
    };
    let (scoped, body) = sanitize_stmts(scoped, body)?;
    let mut env = scoped.exit_scope();
    env.current_ret = None;
    let v = FunDecl {
        name,
        idx: Some(idx),
        params: new_params,
        ret,
        entry,
        depth_write,
        early_fragment_tests,
        body,
        i
    };
    Ok((env, v))
}

fn resolve_alias_target(
    env: &SanitizeEnv,
    target: Expr,
    i: &Info
) -> CompileResult<Expr> {
    match target {
        Expr::Ident {name, i: ni, ..} => {
            match env.find(&name) {
                Some((IdentKind::Struct, idx)) => {
                    Ok(Expr::StructRef {idx, ty: Type::Struct {idx}, i: ni})
                },
                Some((IdentKind::Function, idx)) => {
                    Ok(Expr::FuncRef {idx, ty: Type::Function {idx}, i: ni})
                },
                Some((IdentKind::Alias, idx)) => Ok(env.aliases[idx].clone()),
                Some(_) => structural_error!(ni, "Alias targets must be \
                    structs or functions"),
                None => resolution_error!(ni, "Unknown identifier {name}")
            }
        },
        Expr::StructRef {..} | Expr::FuncRef {..} => Ok(target),
        _ => structural_error!(i, "Alias targets must be identifiers")
    }
}

fn swizzle_components(field: &str, i: &Info) -> CompileResult<Vec<SwizzleComponent>> {
    field.chars()
        .map(|c| match c {
            'x' | 'r' => Ok(SwizzleComponent::X),
            'y' | 'g' => Ok(SwizzleComponent::Y),
            'z' | 'b' => Ok(SwizzleComponent::Z),
            'w' | 'a' => Ok(SwizzleComponent::W),
            _ => resolution_error!(i, "Invalid swizzle component {c}")
        })
        .collect()
}

// Shared rewrite for swizzle expressions, whether they arrive as swizzle
// nodes or as identifier accesses on vector values.
fn finish_swizzle<'a>(
    env: SanitizeEnv<'a>,
    target: Expr,
    comps: Vec<SwizzleComponent>,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    let ty = type_check::swizzle_type(target.get_type(), &comps, &i)?;
    if env.opts.remove_scalar_swizzling && target.get_type().is_primitive() {
        if comps.len() == 1 {
            return Ok((env, target));
        }
        // A multi-component swizzle of a scalar becomes a vector constructor
        // repeating the scalar.
        let args = vec![target; comps.len()];
        return sanitize_cast(env, ty, args, i);
    }
    match env.const_value_of(&target).and_then(|v| {
        constant_fold::eval_swizzle(&v, &comps)
    }) {
        Some(v) => Ok((env, Expr::Const {v, ty, i})),
        None => Ok((env, Expr::Swizzle {target: Box::new(target), comps, ty, i}))
    }
}

fn struct_member_access<'a>(
    env: SanitizeEnv<'a>,
    target: Expr,
    struct_idx: usize,
    field: String,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    let member = {
        let desc = env.struct_desc(struct_idx, &i)?;
        desc.members.iter()
            .position(|m| m.name == field)
            .map(|pos| (pos, desc.members[pos].ty.clone()))
            .ok_or_else(|| desc.name.clone())
    };
    let (pos, ty) = match member {
        Ok(found) => found,
        Err(struct_name) => {
            return resolution_error!(i, "Struct {struct_name} has no member \
                {field}");
        }
    };
    let e = if env.opts.use_identifier_accesses_for_structs {
        Expr::AccessIdent {target: Box::new(target), field, ty, i}
    } else {
        Expr::AccessIndex {
            target: Box::new(target),
            index: Box::new(Expr::Const {
                v: ConstValue::Int {v: pos as i32},
                ty: Type::int(),
                i: i.clone()
            }),
            ty,
            i
        }
    };
    Ok((env, e))
}

fn sanitize_cast<'a>(
    env: SanitizeEnv<'a>,
    target_ty: Type,
    args: Vec<Expr>,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    let target_ty = env.resolve_type(target_ty, &i)?;
    let (env, args) = sanitize_exprs(env, args)?;
    if env.opts.remove_matrix_cast && args.len() == 1 {
        let dims = match (&target_ty, args[0].get_type()) {
            (Type::Matrix {cols: tc, rows: tr, elem},
             Type::Matrix {cols: sc, rows: sr, ..}) => {
                Some(((*tc, *tr, *elem), (*sc, *sr)))
            },
            _ => None
        };
        if let Some((target, src)) = dims {
            let src_expr = args.into_iter().next().unwrap();
            let e = expand_matrix_cast(src_expr, target, src, i);
            return sanitize_expr(env, e);
        }
    }
    let arg_types = args.iter().map(|e| e.get_type()).collect::<Vec<&Type>>();
    let ty = type_check::cast_type(&target_ty, &arg_types, &i)?;
    let const_args = args.iter()
        .map(|e| env.const_value_of(e))
        .collect::<Option<Vec<ConstValue>>>();
    let folded = const_args.and_then(|vs| {
        let refs = vs.iter().collect::<Vec<&ConstValue>>();
        constant_fold::eval_cast(&target_ty, &refs)
    });
    let e = match folded {
        Some(v) => Expr::Const {v, ty, i},
        None => Expr::Cast {target_ty, args, ty, i}
    };
    Ok((env, e))
}

// Rewrites a matrix-to-matrix cast into a constructor over adapted column
// vectors, truncating or extending each column with identity elements.
fn expand_matrix_cast(
    src: Expr,
    target: (usize, usize, Primitive),
    src_dims: (usize, usize),
    i: Info
) -> Expr {
    let (tcols, trows, elem) = target;
    let (scols, srows) = src_dims;
    let col_ty = Type::Vector {dim: trows, elem};
    let src_col_ty = Type::Vector {dim: srows, elem};
    let cols = (0..tcols)
        .map(|j| {
            if j < scols {
                let col = Expr::AccessIndex {
                    target: Box::new(src.clone()),
                    index: Box::new(Expr::Const {
                        v: ConstValue::Int {v: j as i32},
                        ty: Type::int(),
                        i: i.clone()
                    }),
                    ty: src_col_ty.clone(),
                    i: i.clone()
                };
                if trows == srows {
                    col
                } else if trows < srows {
                    let comps = [
                        SwizzleComponent::X, SwizzleComponent::Y,
                        SwizzleComponent::Z, SwizzleComponent::W
                    ];
                    Expr::Swizzle {
                        target: Box::new(col),
                        comps: comps[..trows].to_vec(),
                        ty: col_ty.clone(),
                        i: i.clone()
                    }
                } else {
                    let mut args = vec![col];
                    for r in srows..trows {
                        let v = if r == j { 1.0 } else { 0.0 };
                        args.push(Expr::Const {
                            v: ConstValue::Float {v},
                            ty: Type::float(),
                            i: i.clone()
                        });
                    }
                    Expr::Cast {
                        target_ty: col_ty.clone(),
                        args,
                        ty: col_ty.clone(),
                        i: i.clone()
                    }
                }
            } else {
                // Columns past the source take their identity column.
                let comps = (0..trows)
                    .map(|r| if r == j { 1.0 } else { 0.0 })
                    .collect::<Vec<f32>>();
                Expr::Const {
                    v: ConstValue::FVec {comps},
                    ty: col_ty.clone(),
                    i: i.clone()
                }
            }
        })
        .collect::<Vec<Expr>>();
    Expr::Cast {
        target_ty: Type::Matrix {cols: tcols, rows: trows, elem},
        args: cols,
        ty: Type::Matrix {cols: tcols, rows: trows, elem},
        i
    }
}

fn sanitize_call<'a>(
    env: SanitizeEnv<'a>,
    func: FuncTarget,
    args: Vec<Expr>,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    if env.current_ret.is_none() {
        return structural_error!(i, "Function calls must happen inside a \
            function");
    }
    let (env, args) = sanitize_exprs(env, args)?;
    let resolved = match &func {
        FuncTarget::Named {name} => {
            match env.find(name) {
                Some((IdentKind::Function, idx)) => Some(idx),
                Some((IdentKind::Intrinsic, idx)) => {
                    let op = INTRINSICS[idx].1;
                    let arg_types = args.iter()
                        .map(|e| e.get_type().clone())
                        .collect::<Vec<Type>>();
                    let ty = type_check::intrinsic_type(&op, &arg_types, &i)?;
                    return Ok((env, Expr::Intrinsic {op, args, ty, i}));
                },
                Some((IdentKind::Alias, idx)) => {
                    match &env.aliases[idx] {
                        Expr::FuncRef {idx, ..} => Some(*idx),
                        _ => return type_error!(i, "Alias {name} does not \
                            name a function")
                    }
                },
                Some(_) => return type_error!(i, "Identifier {name} is not \
                    callable"),
                None => {
                    if env.opts.allow_partial_sanitization {
                        None
                    } else {
                        return resolution_error!(i, "Unknown function {name}");
                    }
                }
            }
        },
        FuncTarget::Decl {idx} => {
            if *idx >= env.functions.len() {
                return internal_error!(i, "Call to unregistered function \
                    {idx}");
            }
            Some(*idx)
        }
    };
    match resolved {
        Some(idx) => {
            let (params, ret) = env.signature(idx, &i)?;
            if params.len() != args.len() {
                let name = env.functions[idx].name.clone();
                return type_error!(i, "Function {name} expects {0} \
                    parameter(s), but was called with {1} argument(s)",
                    params.len(), args.len());
            }
            for (param, arg) in params.iter().zip(args.iter()) {
                let ty = arg.get_type();
                if ty != param && !ty.is_unknown() && !param.is_unknown() {
                    let name = env.functions[idx].name.clone();
                    return type_error!(i, "Argument of type {ty:?} does not \
                        match the parameter type {param:?} of function {name}");
                }
            }
            Ok((env, Expr::Call {func: FuncTarget::Decl {idx}, args, ty: ret, i}))
        },
        None => Ok((env, Expr::Call {func, args, ty: Type::Unknown, i}))
    }
}

fn sanitize_access_index<'a>(
    env: SanitizeEnv<'a>,
    target: Expr,
    index: Expr,
    i: Info
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    let index_ty = index.get_type();
    if !index_ty.is_integer() && !index_ty.is_unknown() {
        return type_error!(i, "Indices must be integers, found {index_ty:?}");
    }
    let const_index = match env.const_value_of(&index) {
        Some(ConstValue::Int {v}) => Some(v as i64),
        Some(ConstValue::UInt {v}) => Some(v as i64),
        _ => None
    };
    let check_range = |limit: usize| -> CompileResult<()> {
        match const_index {
            Some(n) if n < 0 || n as usize >= limit => {
                type_error!(i, "Index {n} is out of range for a type with \
                    {limit} element(s)")
            },
            _ => Ok(())
        }
    };
    let target_ty = target.get_type().clone();
    let ty = match &target_ty {
        Type::Vector {dim, elem} => {
            check_range(*dim)?;
            Type::Primitive {ty: *elem}
        },
        Type::Matrix {cols, rows, elem} => {
            check_range(*cols)?;
            Type::Vector {dim: *rows, elem: *elem}
        },
        Type::Array {elem, len} => {
            check_range(*len)?;
            (**elem).clone()
        },
        Type::Struct {idx} => {
            match const_index {
                Some(n) if n >= 0 => {
                    env.struct_member_type(*idx, n as usize, &i)?
                },
                _ => return type_error!(i, "Struct members must be accessed \
                    with constant indices")
            }
        },
        Type::Uniform {inner} => {
            match &**inner {
                Type::Struct {idx} => match const_index {
                    Some(n) if n >= 0 => {
                        env.struct_member_type(*idx, n as usize, &i)?
                    },
                    _ => return type_error!(i, "Struct members must be \
                        accessed with constant indices")
                },
                _ => return type_error!(i, "Cannot index into an unresolved \
                    uniform block")
            }
        },
        Type::Unknown => Type::Unknown,
        ty => return type_error!(i, "Cannot index into type {ty:?}")
    };
    let folded = match (env.const_value_of(&target), const_index) {
        (Some(v), Some(n)) if n >= 0 => constant_fold::eval_index(&v, n as usize),
        _ => None
    };
    let e = match folded {
        Some(v) => Expr::Const {v, ty, i},
        None => Expr::AccessIndex {
            target: Box::new(target), index: Box::new(index), ty, i
        }
    };
    Ok((env, e))
}

fn sanitize_expr<'a>(
    env: SanitizeEnv<'a>,
    e: Expr
) -> CompileResult<(SanitizeEnv<'a>, Expr)> {
    match e {
        Expr::Ident {name, ty: _, i} => {
            match env.find(&name) {
                Some((IdentKind::Constant, idx)) => {
                    let v = env.constants[idx].clone();
                    let ty = v.value_type();
                    if env.opts.remove_const_declaration {
                        Ok((env, Expr::Const {v, ty, i}))
                    } else {
                        Ok((env, Expr::ConstRef {idx, ty, i}))
                    }
                },
                Some((IdentKind::Variable, idx)) => {
                    let ty = env.variables[idx].clone();
                    Ok((env, Expr::VarRef {idx, ty, i}))
                },
                Some((IdentKind::Alias, idx)) => {
                    let target = env.aliases[idx].clone();
                    Ok((env, target))
                },
                Some((IdentKind::Struct, idx)) => {
                    Ok((env, Expr::StructRef {idx, ty: Type::Struct {idx}, i}))
                },
                Some((IdentKind::Function, idx)) => {
                    Ok((env, Expr::FuncRef {idx, ty: Type::Function {idx}, i}))
                },
                Some(_) => {
                    type_error!(i, "Identifier {name} does not name a value")
                },
                None => {
                    if env.opts.allow_partial_sanitization {
                        let env = env.register_ident(
                            &name, IdentKind::Unresolved, 0
                        );
                        Ok((env, Expr::Ident {name, ty: Type::Unknown, i}))
                    } else {
                        resolution_error!(i, "Unknown identifier {name}")
                    }
                }
            }
        },
        Expr::AccessIdent {target, field, ty: _, i} => {
            let (env, target) = sanitize_expr(env, *target)?;
            match target.get_type().clone() {
                Type::Struct {idx} => {
                    struct_member_access(env, target, idx, field, i)
                },
                Type::Uniform {inner} => {
                    match *inner {
                        Type::Struct {idx} => {
                            struct_member_access(env, target, idx, field, i)
                        },
                        _ => type_error!(i, "Cannot access members of an \
                            unresolved uniform block")
                    }
                },
                Type::Primitive {..} | Type::Vector {..} => {
                    let comps = swizzle_components(&field, &i)?;
                    finish_swizzle(env, target, comps, i)
                },
                Type::Unknown => {
                    Ok((env, Expr::AccessIdent {
                        target: Box::new(target), field, ty: Type::Unknown, i
                    }))
                },
                ty => type_error!(i, "Cannot access member {field} of type \
                    {ty:?}")
            }
        },
        Expr::AccessIndex {target, index, ty: _, i} => {
            let (env, target) = sanitize_expr(env, *target)?;
            let (env, index) = sanitize_expr(env, *index)?;
            sanitize_access_index(env, target, index, i)
        },
        Expr::Assign {op, lhs, rhs, ty: _, i} => {
            let (env, lhs) = sanitize_expr(env, *lhs)?;
            let (env, rhs) = sanitize_expr(env, *rhs)?;
            if !type_check::is_l_value(&lhs) {
                return type_error!(i, "Left side of an assignment must be an \
                    addressable location");
            }
            let lhs_ty = lhs.get_type().clone();
            match op.binary_op() {
                Some(bin) => {
                    let result = type_check::binary_op_type(
                        &bin, &lhs_ty, rhs.get_type(), &i
                    )?;
                    if result != lhs_ty && !result.is_unknown() {
                        return type_error!(i, "Compound assignment result \
                            type {result:?} does not match {lhs_ty:?}");
                    }
                    if env.opts.remove_compound_assignments {
                        let rhs = Expr::BinOp {
                            lhs: Box::new(lhs.clone()),
                            op: bin,
                            rhs: Box::new(rhs),
                            ty: result,
                            i: i.clone()
                        };
                        Ok((env, Expr::Assign {
                            op: AssignOp::Assign,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                            ty: lhs_ty,
                            i
                        }))
                    } else {
                        Ok((env, Expr::Assign {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                            ty: lhs_ty,
                            i
                        }))
                    }
                },
                None => {
                    let rhs_ty = rhs.get_type();
                    if *rhs_ty != lhs_ty && !rhs_ty.is_unknown()
                        && !lhs_ty.is_unknown()
                    {
                        return type_error!(i, "Cannot assign a value of type \
                            {rhs_ty:?} to a location of type {lhs_ty:?}");
                    }
                    Ok((env, Expr::Assign {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        ty: lhs_ty,
                        i
                    }))
                }
            }
        },
        Expr::BinOp {lhs, op, rhs, ty: _, i} => {
            let (env, lhs) = sanitize_expr(env, *lhs)?;
            let (env, rhs) = sanitize_expr(env, *rhs)?;
            let ty = type_check::binary_op_type(
                &op, lhs.get_type(), rhs.get_type(), &i
            )?;
            let folded = match (env.const_value_of(&lhs), env.const_value_of(&rhs)) {
                (Some(lv), Some(rv)) => constant_fold::eval_binop(&op, &lv, &rv),
                _ => None
            };
            let e = match folded {
                Some(v) => Expr::Const {v, ty, i},
                None => Expr::BinOp {
                    lhs: Box::new(lhs), op, rhs: Box::new(rhs), ty, i
                }
            };
            Ok((env, e))
        },
        Expr::UnOp {op, arg, ty: _, i} => {
            let (env, arg) = sanitize_expr(env, *arg)?;
            let ty = type_check::unary_op_type(&op, arg.get_type(), &i)?;
            let folded = env.const_value_of(&arg)
                .and_then(|v| constant_fold::eval_unop(&op, &v));
            let e = match folded {
                Some(v) => Expr::Const {v, ty, i},
                None => Expr::UnOp {op, arg: Box::new(arg), ty, i}
            };
            Ok((env, e))
        },
        Expr::Swizzle {target, comps, ty: _, i} => {
            let (env, target) = sanitize_expr(env, *target)?;
            finish_swizzle(env, target, comps, i)
        },
        Expr::Cast {target_ty, args, ty: _, i} => {
            sanitize_cast(env, target_ty, args, i)
        },
        Expr::IfExpr {cond, thn, els, ty: _, i} => {
            let (env, cond) = sanitize_expr(env, *cond)?;
            type_check::condition_must_be_bool(cond.get_type(), &i)?;
            match env.const_bool_of(&cond) {
                Some(true) => sanitize_expr(env, *thn),
                Some(false) => sanitize_expr(env, *els),
                None => {
                    let (env, thn) = sanitize_expr(env, *thn)?;
                    let (env, els) = sanitize_expr(env, *els)?;
                    let (tty, ety) = (thn.get_type(), els.get_type());
                    if tty != ety && !tty.is_unknown() && !ety.is_unknown() {
                        return type_error!(i, "Both branches of a select must \
                            have the same type, found {tty:?} and {ety:?}");
                    }
                    let ty = tty.clone();
                    Ok((env, Expr::IfExpr {
                        cond: Box::new(cond),
                        thn: Box::new(thn),
                        els: Box::new(els),
                        ty,
                        i
                    }))
                }
            }
        },
        Expr::Call {func, args, ty: _, i} => sanitize_call(env, func, args, i),
        Expr::MethodCall {target, method, args, ty: _, i} => {
            let (env, target) = sanitize_expr(env, *target)?;
            let (env, args) = sanitize_exprs(env, args)?;
            match (target.get_type().clone(), method.as_str()) {
                (Type::Sampler {..}, "Sample") => {
                    let mut all_args = vec![target];
                    all_args.extend(args);
                    let arg_types = all_args.iter()
                        .map(|e| e.get_type().clone())
                        .collect::<Vec<Type>>();
                    let ty = type_check::intrinsic_type(
                        &IntrinsicOp::SampleTexture, &arg_types, &i
                    )?;
                    Ok((env, Expr::Intrinsic {
                        op: IntrinsicOp::SampleTexture, args: all_args, ty, i
                    }))
                },
                (Type::Unknown, _) => {
                    Ok((env, Expr::MethodCall {
                        target: Box::new(target), method, args,
                        ty: Type::Unknown, i
                    }))
                },
                (ty, _) => resolution_error!(i, "Type {ty:?} has no method \
                    {method}")
            }
        },
        Expr::Intrinsic {op, args, ty: _, i} => {
            let (env, args) = sanitize_exprs(env, args)?;
            let arg_types = args.iter()
                .map(|e| e.get_type().clone())
                .collect::<Vec<Type>>();
            let ty = type_check::intrinsic_type(&op, &arg_types, &i)?;
            Ok((env, Expr::Intrinsic {op, args, ty, i}))
        },
        Expr::Const {v, ty: _, i} => {
            let ty = v.value_type();
            Ok((env, Expr::Const {v, ty, i}))
        },
        Expr::ConstRef {idx, ty: _, i} => {
            if idx >= env.constants.len() {
                return internal_error!(i, "Reference to unregistered \
                    constant {idx}");
            }
            let v = env.constants[idx].clone();
            let ty = v.value_type();
            if env.opts.remove_const_declaration {
                Ok((env, Expr::Const {v, ty, i}))
            } else {
                Ok((env, Expr::ConstRef {idx, ty, i}))
            }
        },
        Expr::VarRef {idx, ty: _, i} => {
            match env.variables.get(idx) {
                Some(ty) => {
                    let ty = ty.clone();
                    Ok((env, Expr::VarRef {idx, ty, i}))
                },
                None => internal_error!(i, "Reference to unregistered \
                    variable {idx}")
            }
        },
        Expr::FuncRef {idx, ty: _, i} => {
            if idx >= env.functions.len() {
                return internal_error!(i, "Reference to unregistered \
                    function {idx}");
            }
            Ok((env, Expr::FuncRef {idx, ty: Type::Function {idx}, i}))
        },
        Expr::StructRef {idx, ty: _, i} => {
            if idx >= env.structs.len() {
                return internal_error!(i, "Reference to unregistered struct \
                    {idx}");
            }
            Ok((env, Expr::StructRef {idx, ty: Type::Struct {idx}, i}))
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::ast_builder::*;
    use crate::test::*;

    fn sanitize(m: Module) -> CompileResult<Module> {
        apply(m, &SanitizeOptions::default())
    }

    fn sanitize_with(m: Module, opts: SanitizeOptions) -> CompileResult<Module> {
        apply(m, &opts)
    }

    fn body_of(m: &Module, n: usize) -> &Vec<Stmt> {
        match &m.stmts[n] {
            Stmt::DeclareFunction {v} => &v.body,
            s => panic!("Expected a function declaration, found {s:?}")
        }
    }

    #[test]
    fn resolve_variable_reference() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(1))),
            expr_stmt(assign(ident("x"), int(2))),
        ])]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[1] {
            Stmt::Expr {e: Expr::Assign {lhs, ..}, ..} => {
                assert_eq!(**lhs, var(0, Type::int()));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn unknown_identifier_fails() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            expr_stmt(assign(ident("x"), int(2))),
        ])]);
        assert_error_matches(sanitize(m), "Unknown identifier x");
    }

    #[test]
    fn partial_sanitization_keeps_unresolved() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("y", Type::int(), Some(ident("x"))),
        ])]);
        let opts = SanitizeOptions {
            allow_partial_sanitization: true,
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::DeclareVariable {init: Some(Expr::Ident {name, ..}), ..} => {
                assert_eq!(name, "x");
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn index_stability_within_scope() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(1))),
            expr_stmt(assign(ident("x"), ident("x"))),
        ])]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[1] {
            Stmt::Expr {e: Expr::Assign {lhs, rhs, ..}, ..} => {
                assert_eq!(**lhs, var(0, Type::int()));
                assert_eq!(**rhs, var(0, Type::int()));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn shadowing_gets_fresh_index() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(1))),
            Stmt::Scoped {
                body: Box::new(Stmt::Multi {stmts: vec![
                    decl_var("x", Type::float(), Some(float(1.0))),
                    expr_stmt(assign(ident("x"), float(2.0))),
                ], i: i()}),
                i: i()
            },
            expr_stmt(assign(ident("x"), int(2))),
        ])]);
        let m = sanitize(m).unwrap();
        let body = body_of(&m, 0);
        match &body[1] {
            Stmt::Scoped {body: scoped, ..} => match &**scoped {
                Stmt::Multi {stmts, ..} => match &stmts[1] {
                    Stmt::Expr {e: Expr::Assign {lhs, ..}, ..} => {
                        assert_eq!(**lhs, var(1, Type::float()));
                    },
                    s => panic!("Unexpected statement {s:?}")
                },
                s => panic!("Unexpected statement {s:?}")
            },
            s => panic!("Unexpected statement {s:?}")
        }
        match &body[2] {
            Stmt::Expr {e: Expr::Assign {lhs, ..}, ..} => {
                assert_eq!(**lhs, var(0, Type::int()));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn constant_fold_addition() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(binop(
                int(2), BinOp::Add, int(3), Type::Unknown
            ))),
        ])]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::DeclareVariable {init: Some(e), ..} => assert_eq!(*e, int(5)),
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn literal_true_branch_collapses() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(0))),
            branch(
                bool_expr(true),
                expr_stmt(assign(ident("x"), int(1))),
                Some(expr_stmt(assign(ident("x"), int(2))))
            ),
        ])]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[1] {
            Stmt::Expr {e: Expr::Assign {rhs, ..}, ..} => {
                assert_eq!(**rhs, int(1));
            },
            s => panic!("Expected collapsed branch, found {s:?}")
        }
    }

    #[test]
    fn option_specialization_prunes_block() {
        let gated = |stmts| Stmt::Conditional {
            cond: ident("UseShadows"),
            body: Box::new(Stmt::Multi {stmts, i: i()}),
            i: i()
        };
        let mk = || module(vec![
            decl_option("UseShadows", Type::bool(), Some(bool_expr(false))),
            fun("f", vec![], Type::Void, vec![
                decl_var("x", Type::int(), Some(int(0))),
                gated(vec![expr_stmt(assign(ident("x"), int(1)))]),
            ]),
        ]);
        let enabled = SanitizeOptions {
            option_values: [(
                "UseShadows".to_string(), ConstValue::Bool {v: true}
            )].into_iter().collect(),
            ..SanitizeOptions::default()
        };
        let disabled = sanitize(mk()).unwrap();
        assert_eq!(body_of(&disabled, 1).len(), 1);
        let enabled = sanitize_with(mk(), enabled).unwrap();
        let body = body_of(&enabled, 1);
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[1], Stmt::Multi {..}));
    }

    #[test]
    fn const_branch_requires_const_condition() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::bool(), Some(bool_expr(true))),
            Stmt::Branch {
                branches: vec![CondBranch {
                    cond: ident("x"),
                    body: Stmt::NoOp {i: i()}
                }],
                els: None,
                is_const: true,
                i: i()
            },
        ])]);
        assert_error_matches(sanitize(m), "compile-time constants");
    }

    #[test]
    fn sanitization_is_idempotent() {
        let m = module(vec![
            decl_const("two", float(2.0)),
            decl_struct("Data", vec![member("v", Type::vec(3, Primitive::Float))]),
            fun("f", vec![param("d", Type::Named {name: "Data".to_string()})],
                Type::float(), vec![
                    decl_var("x", Type::Unknown, Some(binop(
                        Expr::AccessIdent {
                            target: Box::new(ident("d")),
                            field: "v".to_string(),
                            ty: Type::Unknown,
                            i: i()
                        },
                        BinOp::Mul,
                        ident("two"),
                        Type::Unknown
                    ))),
                    ret(Some(Expr::AccessIdent {
                        target: Box::new(ident("x")),
                        field: "y".to_string(),
                        ty: Type::Unknown,
                        i: i()
                    })),
                ]),
        ]);
        let opts = SanitizeOptions::default();
        let once = apply(m, &opts).unwrap();
        let twice = apply(once.clone(), &opts).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn member_access_becomes_indexed() {
        let m = module(vec![
            decl_struct("Data", vec![
                member("a", Type::float()),
                member("b", Type::int()),
            ]),
            fun("f", vec![param("d", Type::Named {name: "Data".to_string()})],
                Type::int(), vec![
                    ret(Some(Expr::AccessIdent {
                        target: Box::new(ident("d")),
                        field: "b".to_string(),
                        ty: Type::Unknown,
                        i: i()
                    })),
                ]),
        ]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 1)[0] {
            Stmt::Return {value: Some(Expr::AccessIndex {index, ty, ..}), ..} => {
                assert_eq!(**index, int(1));
                assert_eq!(*ty, Type::int());
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn swizzle_on_vector_member() {
        let m = module(vec![fun(
            "f",
            vec![param("v", Type::vec(3, Primitive::Float))],
            Type::vec(2, Primitive::Float),
            vec![ret(Some(Expr::AccessIdent {
                target: Box::new(ident("v")),
                field: "zx".to_string(),
                ty: Type::Unknown,
                i: i()
            }))]
        )]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::Return {value: Some(Expr::Swizzle {comps, ty, ..}), ..} => {
                assert_eq!(comps, &vec![SwizzleComponent::Z, SwizzleComponent::X]);
                assert_eq!(*ty, Type::vec(2, Primitive::Float));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn cyclic_struct_rejected() {
        // A forged index cycle: the struct's member claims the index the
        // struct itself is about to receive.
        let m = module(vec![
            decl_struct("A", vec![member("a", Type::Struct {idx: 0})]),
        ]);
        assert_error_matches(sanitize(m), "cyclic");
    }

    #[test]
    fn duplicate_binding_rejected() {
        let ext = |name: &str, set, binding| ExternalVar {
            name: name.to_string(),
            ty: Type::Sampler {dim: TextureDim::E2D, sampled: Primitive::Float},
            binding_set: set,
            binding_index: binding,
            idx: None,
            i: i()
        };
        let m = module(vec![Stmt::DeclareExternal {
            vars: vec![ext("a", Some(0), Some(1)), ext("b", Some(0), Some(1))],
            i: i()
        }]);
        assert_error_matches(sanitize(m), "more than one external");
    }

    #[test]
    fn auto_binding_assignment() {
        let ext = |name: &str, binding| ExternalVar {
            name: name.to_string(),
            ty: Type::Sampler {dim: TextureDim::E2D, sampled: Primitive::Float},
            binding_set: None,
            binding_index: binding,
            idx: None,
            i: i()
        };
        let m = module(vec![Stmt::DeclareExternal {
            vars: vec![ext("a", Some(0)), ext("b", None)],
            i: i()
        }]);
        let m = sanitize(m).unwrap();
        match &m.stmts[0] {
            Stmt::DeclareExternal {vars, ..} => {
                assert_eq!(vars[0].binding_index, Some(0));
                assert_eq!(vars[1].binding_index, Some(1));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn compound_assignment_expansion() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(1))),
            expr_stmt(Expr::Assign {
                op: AssignOp::AddAssign,
                lhs: Box::new(ident("x")),
                rhs: Box::new(int(2)),
                ty: Type::Unknown,
                i: i()
            }),
        ])]);
        let opts = SanitizeOptions {
            remove_compound_assignments: true,
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        match &body_of(&m, 0)[1] {
            Stmt::Expr {e: Expr::Assign {op, rhs, ..}, ..} => {
                assert_eq!(*op, AssignOp::Assign);
                assert!(matches!(**rhs, Expr::BinOp {op: BinOp::Add, ..}));
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn for_loop_reduction() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            Stmt::For {
                var: "i".to_string(),
                var_idx: None,
                from: int(0),
                to: int(4),
                step: None,
                unroll: false,
                body: vec![],
                i: i()
            },
        ])]);
        let opts = SanitizeOptions {
            reduce_loops_to_while: true,
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::Scoped {body, ..} => match &**body {
                Stmt::Multi {stmts, ..} => {
                    assert!(matches!(stmts[0], Stmt::DeclareVariable {..}));
                    assert!(matches!(stmts[1], Stmt::While {..}));
                },
                s => panic!("Unexpected statement {s:?}")
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn variable_renaming_avoids_shadowing() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(1))),
            Stmt::Scoped {
                body: Box::new(decl_var("x", Type::int(), Some(int(2)))),
                i: i()
            },
        ])]);
        let opts = SanitizeOptions {
            make_variable_name_unique: true,
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        match &body_of(&m, 0)[1] {
            Stmt::Scoped {body, ..} => match &**body {
                Stmt::DeclareVariable {name, ..} => assert_eq!(name, "x_2"),
                s => panic!("Unexpected statement {s:?}")
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn call_resolves_forward_reference() {
        let m = module(vec![
            fun("f", vec![], Type::int(), vec![
                ret(Some(Expr::Call {
                    func: FuncTarget::Named {name: "g".to_string()},
                    args: vec![],
                    ty: Type::Unknown,
                    i: i()
                })),
            ]),
            fun("g", vec![], Type::int(), vec![ret(Some(int(1)))]),
        ]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::Return {value: Some(Expr::Call {func, ty, ..}), ..} => {
                assert_eq!(*func, FuncTarget::Decl {idx: 1});
                assert_eq!(*ty, Type::int());
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn call_arity_mismatch() {
        let m = module(vec![
            fun("g", vec![param("a", Type::int())], Type::int(),
                vec![ret(Some(int(1)))]),
            fun("f", vec![], Type::int(), vec![
                ret(Some(Expr::Call {
                    func: FuncTarget::Named {name: "g".to_string()},
                    args: vec![],
                    ty: Type::Unknown,
                    i: i()
                })),
            ]),
        ]);
        assert_error_matches(sanitize(m), "expects 1 parameter");
    }

    #[test]
    fn intrinsic_call_resolution() {
        let vec3 = Type::vec(3, Primitive::Float);
        let m = module(vec![fun(
            "f",
            vec![param("a", vec3.clone()), param("b", vec3.clone())],
            vec3.clone(),
            vec![ret(Some(Expr::Call {
                func: FuncTarget::Named {name: "cross".to_string()},
                args: vec![ident("a"), ident("b")],
                ty: Type::Unknown,
                i: i()
            }))]
        )]);
        let m = sanitize(m).unwrap();
        match &body_of(&m, 0)[0] {
            Stmt::Return {value: Some(Expr::Intrinsic {op, ty, ..}), ..} => {
                assert_eq!(*op, IntrinsicOp::CrossProduct);
                assert_eq!(*ty, vec3);
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn type_errors_fatal_under_partial_sanitization() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::Unknown, Some(binop(
                float(1.0), BinOp::Add, int(1), Type::Unknown
            ))),
        ])]);
        let opts = SanitizeOptions {
            allow_partial_sanitization: true,
            ..SanitizeOptions::default()
        };
        let r = sanitize_with(m, opts);
        assert!(matches!(r, Err(CompileError::Type(_))));
    }

    #[test]
    fn alias_resolution_and_removal() {
        let m = module(vec![
            decl_struct("Data", vec![member("a", Type::float())]),
            Stmt::DeclareAlias {
                name: "D".to_string(),
                idx: None,
                target: ident("Data"),
                i: i()
            },
            fun("f", vec![param("d", Type::Named {name: "D".to_string()})],
                Type::float(), vec![
                    ret(Some(Expr::AccessIdent {
                        target: Box::new(ident("d")),
                        field: "a".to_string(),
                        ty: Type::Unknown,
                        i: i()
                    })),
                ]),
        ]);
        let opts = SanitizeOptions {
            remove_aliases: true,
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        assert_eq!(m.stmts.len(), 2);
        match &m.stmts[1] {
            Stmt::DeclareFunction {v} => {
                assert_eq!(v.params[0].ty, Type::Struct {idx: 0});
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn import_splices_module() {
        use crate::option::ModuleResolver;
        use std::rc::Rc;

        struct Lib;

        impl ModuleResolver for Lib {
            fn resolve(&self, path: &str) -> Option<Module> {
                if path == "lib/colors" {
                    Some(module(vec![decl_const("red", float(1.0))]))
                } else {
                    None
                }
            }
        }

        let m = module(vec![
            Stmt::Import {path: "lib/colors".to_string(), module_idx: None, i: i()},
            fun("f", vec![], Type::float(), vec![ret(Some(ident("red")))]),
        ]);
        let opts = SanitizeOptions {
            module_resolver: Some(Rc::new(Lib)),
            ..SanitizeOptions::default()
        };
        let m = sanitize_with(m, opts).unwrap();
        match &body_of(&m, 1)[0] {
            Stmt::Return {value: Some(Expr::ConstRef {idx, ..}), ..} => {
                assert_eq!(*idx, 0);
            },
            s => panic!("Unexpected statement {s:?}")
        }
    }

    #[test]
    fn unresolved_import_fails() {
        let m = module(vec![
            Stmt::Import {path: "missing".to_string(), module_idx: None, i: i()},
        ]);
        let r = sanitize(m);
        assert!(matches!(r, Err(CompileError::Structural(_))));
    }
}
