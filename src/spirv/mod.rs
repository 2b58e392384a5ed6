pub mod ops;
pub mod section;
mod cache;
mod codegen;
mod prescan;

use cache::SpirvCache;
use codegen::{EntryIo, VarSlot};
use ops::{
    addressing_model, builtin, capability, decoration, execution_mode,
    execution_model, memory_model, storage_class, Op,
};
use section::Section;
use crate::ast;
use crate::ast::ast::*;
use crate::internal_error;
use crate::option::SanitizeOptions;
use crate::utils::err::*;

use std::collections::BTreeMap;

// Target environment of the generated module: the SPIR-V version the
// consumer expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpirvEnv {
    pub major: u8,
    pub minor: u8,
}

impl SpirvEnv {
    pub fn new(major: u8, minor: u8) -> SpirvEnv {
        SpirvEnv {major, minor}
    }

    pub fn version_word(&self) -> u32 {
        (u32::from(self.major) << 16) | (u32::from(self.minor) << 8)
    }
}

impl Default for SpirvEnv {
    fn default() -> SpirvEnv {
        SpirvEnv::new(1, 0)
    }
}

fn builtin_code(b: &BuiltinVar) -> u32 {
    match b {
        BuiltinVar::Position => builtin::POSITION,
        BuiltinVar::FragCoord => builtin::FRAG_COORD,
        BuiltinVar::FragDepth => builtin::FRAG_DEPTH,
        BuiltinVar::VertexIndex => builtin::VERTEX_INDEX,
        BuiltinVar::InstanceIndex => builtin::INSTANCE_INDEX,
    }
}

// Lowers the members of an entry point's input and output structs to global
// Input/Output variables, decorated with their location or builtin.
fn build_io_variables(
    cache: &mut SpirvCache,
    members: &[StructMember],
    storage: u32
) -> CompileResult<Vec<u32>> {
    let mut ids = vec![];
    let mut next_location = 0;
    for m in members {
        let spv = cache.from_ast_type(&m.ty)?;
        let ptr = cache.pointer_id(storage, &spv)?;
        let id = cache.alloc_id();
        cache.decls.append(Op::Variable, &[ptr, id, storage]);
        cache.debug.append_with_string(Op::Name, &[id], &m.name, &[]);
        match &m.builtin {
            Some(b) => {
                cache.annotations.append(Op::Decorate, &[
                    id, decoration::BUILTIN, builtin_code(b)
                ]);
            },
            None => {
                let location = match m.location {
                    Some(location) => location,
                    None => {
                        let location = next_location;
                        next_location += 1;
                        location
                    }
                };
                cache.annotations.append(Op::Decorate, &[
                    id, decoration::LOCATION, location
                ]);
            }
        }
        ids.push(id);
    }
    Ok(ids)
}

fn build_entry_io(
    cache: &mut SpirvCache,
    f: &FunDecl,
    info: &prescan::ModuleInfo
) -> CompileResult<EntryIo> {
    let mut io = EntryIo {
        input_struct: None,
        output_struct: None,
        inputs: vec![],
        outputs: vec![],
        interface: vec![],
    };
    if let Some(p) = f.params.first() {
        let sidx = match &p.ty {
            Type::Struct {idx} => *idx,
            ty => return internal_error!(p.i, "Entry input parameter is not \
                a struct: {ty:?}")
        };
        let members = info.structs[sidx].members.clone();
        let ids = build_io_variables(cache, &members, storage_class::INPUT)?;
        io.interface.extend(&ids);
        io.inputs = ids;
        io.input_struct = Some(sidx);
    }
    match &f.ret {
        Type::Struct {idx} => {
            let members = info.structs[*idx].members.clone();
            let ids = build_io_variables(cache, &members, storage_class::OUTPUT)?;
            io.interface.extend(&ids);
            io.outputs = ids;
            io.output_struct = Some(*idx);
        },
        Type::Void => (),
        ty => return internal_error!(f.i, "Entry return type is not a \
            struct: {ty:?}")
    }
    Ok(io)
}

// Serializes a sanitized module into a binary SPIR-V word stream. The input
// is re-sanitized with every desugaring enabled first, which is a no-op on
// trees that already went through it.
pub fn generate(module: &Module, env: &SpirvEnv) -> CompileResult<Vec<u32>> {
    let module = ast::sanitize(module, &SanitizeOptions::full_desugar())?;
    let info = prescan::scan(&module)?;
    let mut cache = SpirvCache::new(&info.structs);
    let glsl_id = if info.needs_glsl_ext {
        Some(cache.alloc_id())
    } else {
        None
    };
    let functions = prescan::collect_functions(&module.stmts);
    let mut func_ids = BTreeMap::new();
    for f in &functions {
        let idx = match f.idx {
            Some(idx) => idx,
            None => return internal_error!(f.i, "Function {0} has no \
                resolved index", f.name)
        };
        let id = cache.alloc_id();
        cache.debug.append_with_string(Op::Name, &[id], &f.name, &[]);
        func_ids.insert(idx, id);
    }

    // External resources become Uniform or UniformConstant globals with
    // their descriptor set and binding decorations.
    let mut globals = BTreeMap::new();
    for v in &info.externals {
        let idx = match v.idx {
            Some(idx) => idx,
            None => return internal_error!(v.i, "External {0} has no \
                resolved index", v.name)
        };
        let storage = match &v.ty {
            Type::Sampler {..} => storage_class::UNIFORM_CONSTANT,
            Type::Uniform {..} => storage_class::UNIFORM,
            ty => return internal_error!(v.i, "External {0} has unexpected \
                type {ty:?}", v.name)
        };
        let spv = cache.from_ast_type(&v.ty)?;
        let ptr = cache.pointer_id(storage, &spv)?;
        let id = cache.alloc_id();
        cache.decls.append(Op::Variable, &[ptr, id, storage]);
        cache.debug.append_with_string(Op::Name, &[id], &v.name, &[]);
        cache.annotations.append(Op::Decorate, &[
            id, decoration::DESCRIPTOR_SET, v.binding_set.unwrap_or(0)
        ]);
        cache.annotations.append(Op::Decorate, &[
            id, decoration::BINDING, v.binding_index.unwrap_or(0)
        ]);
        globals.insert(idx, VarSlot {ptr: id, storage});
    }

    let mut entry_ios = BTreeMap::new();
    for f in &functions {
        if f.entry.is_some() {
            let idx = f.idx.unwrap();
            let io = build_entry_io(&mut cache, f, &info)?;
            entry_ios.insert(idx, io);
        }
    }

    let mut instructions = Section::new();
    for f in &functions {
        let io = f.idx.and_then(|idx| entry_ios.get(&idx));
        let body = codegen::emit_function(
            &mut cache, &info, &func_ids, glsl_id, &globals, f, io
        )?;
        instructions.extend(&body);
    }

    let mut entry_points = Section::new();
    let mut modes = Section::new();
    for f in &functions {
        if let Some(stage) = f.entry {
            let idx = f.idx.unwrap();
            let fid = func_ids[&idx];
            let io = &entry_ios[&idx];
            let model = match stage {
                ShaderStage::Vertex => execution_model::VERTEX,
                ShaderStage::Fragment => execution_model::FRAGMENT,
            };
            entry_points.append_with_string(
                Op::EntryPoint, &[model, fid], &f.name, &io.interface
            );
            if stage == ShaderStage::Fragment {
                modes.append(Op::ExecutionMode, &[
                    fid, execution_mode::ORIGIN_UPPER_LEFT
                ]);
                if f.early_fragment_tests == Some(true) {
                    modes.append(Op::ExecutionMode, &[
                        fid, execution_mode::EARLY_FRAGMENT_TESTS
                    ]);
                }
                if let Some(dw) = f.depth_write {
                    modes.append(Op::ExecutionMode, &[
                        fid, execution_mode::DEPTH_REPLACING
                    ]);
                    let extra = match dw {
                        DepthWriteMode::Replace => None,
                        DepthWriteMode::Greater => {
                            Some(execution_mode::DEPTH_GREATER)
                        },
                        DepthWriteMode::Less => Some(execution_mode::DEPTH_LESS),
                        DepthWriteMode::Unchanged => {
                            Some(execution_mode::DEPTH_UNCHANGED)
                        },
                    };
                    if let Some(mode) = extra {
                        modes.append(Op::ExecutionMode, &[fid, mode]);
                    }
                }
            }
        }
    }

    // The module: header words, then the sections in their fixed order. The
    // ID bound is only known now, after all allocation has happened.
    let mut out = vec![
        ops::MAGIC_NUMBER,
        env.version_word(),
        ops::GENERATOR_ID,
        cache.bound(),
        0,
    ];
    let mut prelude = Section::new();
    prelude.append(Op::Capability, &[capability::SHADER]);
    if let Some(id) = glsl_id {
        prelude.append_with_string(Op::ExtInstImport, &[id], "GLSL.std.450", &[]);
    }
    prelude.append(Op::MemoryModel, &[
        addressing_model::LOGICAL, memory_model::GLSL450
    ]);
    out.extend_from_slice(prelude.words());
    out.extend_from_slice(entry_points.words());
    out.extend_from_slice(modes.words());
    out.extend_from_slice(cache.debug.words());
    out.extend_from_slice(cache.annotations.words());
    out.extend_from_slice(cache.decls.words());
    out.extend_from_slice(instructions.words());
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::ast_builder::*;

    fn vec4f() -> Type {
        Type::vec(4, Primitive::Float)
    }

    fn vec2f() -> Type {
        Type::vec(2, Primitive::Float)
    }

    fn access(target: Expr, field: &str) -> Expr {
        Expr::AccessIdent {
            target: Box::new(target),
            field: field.to_string(),
            ty: Type::Unknown,
            i: i()
        }
    }

    fn vertex_module() -> Module {
        let mut position = member("position", vec4f());
        position.builtin = Some(BuiltinVar::Position);
        module(vec![
            decl_struct("VertIn", vec![
                member("pos", vec4f()),
                member("uv", vec2f()),
            ]),
            decl_struct("VertOut", vec![
                position,
                member("uv", vec2f()),
            ]),
            entry_fun(
                "main",
                ShaderStage::Vertex,
                vec![param("input", Type::Named {name: "VertIn".to_string()})],
                Type::Named {name: "VertOut".to_string()},
                vec![
                    decl_var("out", Type::Named {name: "VertOut".to_string()}, None),
                    expr_stmt(assign(
                        access(ident("out"), "position"),
                        access(ident("input"), "pos")
                    )),
                    expr_stmt(assign(
                        access(ident("out"), "uv"),
                        access(ident("input"), "uv")
                    )),
                    ret(Some(ident("out"))),
                ]
            ),
        ])
    }

    fn cross_module() -> Module {
        let vec3 = Type::vec(3, Primitive::Float);
        module(vec![fun(
            "f",
            vec![param("a", vec3.clone()), param("b", vec3.clone())],
            vec3.clone(),
            vec![ret(Some(Expr::Call {
                func: FuncTarget::Named {name: "cross".to_string()},
                args: vec![ident("a"), ident("b")],
                ty: Type::Unknown,
                i: i()
            }))]
        )])
    }

    fn dot_module() -> Module {
        let vec3 = Type::vec(3, Primitive::Float);
        module(vec![fun(
            "f",
            vec![param("a", vec3.clone()), param("b", vec3.clone())],
            Type::float(),
            vec![ret(Some(Expr::Call {
                func: FuncTarget::Named {name: "dot".to_string()},
                args: vec![ident("a"), ident("b")],
                ty: Type::Unknown,
                i: i()
            }))]
        )])
    }

    // Splits the stream after the five header words into instructions by
    // following the word counts packed into each instruction's first word.
    fn instructions(words: &[u32]) -> Vec<(u16, Vec<u32>)> {
        let mut out = vec![];
        let mut pos = 5;
        while pos < words.len() {
            let first = words[pos];
            let word_count = (first >> 16) as usize;
            let opcode = (first & 0xffff) as u16;
            assert!(word_count >= 1, "Zero-length instruction at {pos}");
            assert!(
                pos + word_count <= words.len(),
                "Instruction at {pos} overruns the stream"
            );
            let operands = words[pos + 1..pos + word_count].to_vec();
            out.push((opcode, operands));
            pos += word_count;
        }
        out
    }

    // The result-ID operand position of the opcodes the generator emits.
    fn result_id(opcode: u16, operands: &[u32]) -> Option<u32> {
        match opcode {
            // OpExtInstImport, type declarations and OpLabel carry their
            // result in the first operand.
            11 | 19..=33 | 248 => Some(operands[0]),
            // Constants, variables, functions and value instructions carry
            // a result type followed by the result.
            41..=44 | 54 | 55 | 57 | 59 | 61 | 65 | 12 | 77 | 79 | 80 | 81 |
            86 | 87 | 104..=200 => Some(operands[1]),
            _ => None
        }
    }

    #[test]
    fn header_invariants() {
        let words = generate(&vertex_module(), &SpirvEnv::default()).unwrap();
        assert_eq!(words[0], ops::MAGIC_NUMBER);
        assert_eq!(words[1], 1 << 16);
        assert_eq!(words[2], ops::GENERATOR_ID);
        assert_eq!(words[4], 0);
    }

    #[test]
    fn version_word_packing() {
        let env = SpirvEnv::new(1, 3);
        assert_eq!(env.version_word(), (1 << 16) | (3 << 8));
    }

    #[test]
    fn stream_is_walkable_by_word_counts() {
        let words = generate(&vertex_module(), &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        assert!(!insts.is_empty());
    }

    #[test]
    fn capability_is_first_instruction() {
        let words = generate(&vertex_module(), &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        assert_eq!(insts[0], (17, vec![capability::SHADER]));
    }

    #[test]
    fn id_bound_is_one_past_max() {
        let words = generate(&vertex_module(), &SpirvEnv::default()).unwrap();
        let bound = words[3];
        let max = instructions(&words)
            .iter()
            .filter_map(|(op, operands)| result_id(*op, operands))
            .max()
            .unwrap();
        assert_eq!(bound, max + 1);
    }

    #[test]
    fn generation_is_deterministic() {
        let m = vertex_module();
        let env = SpirvEnv::default();
        let a = generate(&m, &env).unwrap();
        let b = generate(&m, &env).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn entry_point_declared() {
        let words = generate(&vertex_module(), &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        let entry = insts.iter().find(|(op, _)| *op == 15);
        let (_, operands) = entry.expect("No OpEntryPoint emitted");
        assert_eq!(operands[0], execution_model::VERTEX);
    }

    #[test]
    fn cross_product_imports_extended_set() {
        let words = generate(&cross_module(), &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        assert!(insts.iter().any(|(op, _)| *op == 11));
        assert!(insts.iter().any(|(op, _)| *op == 12));
    }

    #[test]
    fn dot_product_stays_core() {
        let words = generate(&dot_module(), &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        assert!(!insts.iter().any(|(op, _)| *op == 11));
        assert!(insts.iter().any(|(op, _)| *op == 148));
    }

    #[test]
    fn fragment_execution_modes() {
        let mut color = member("color", vec4f());
        color.location = Some(0);
        let m = module(vec![
            decl_struct("FragOut", vec![color]),
            {
                let mut f = entry_fun(
                    "main",
                    ShaderStage::Fragment,
                    vec![],
                    Type::Named {name: "FragOut".to_string()},
                    vec![
                        decl_var("out", Type::Named {name: "FragOut".to_string()}, None),
                        expr_stmt(assign(
                            access(ident("out"), "color"),
                            Expr::Cast {
                                target_ty: vec4f(),
                                args: vec![
                                    float(1.0), float(0.0), float(0.0), float(1.0)
                                ],
                                ty: Type::Unknown,
                                i: i()
                            }
                        )),
                        ret(Some(ident("out"))),
                    ]
                );
                if let Stmt::DeclareFunction {v} = &mut f {
                    v.early_fragment_tests = Some(true);
                }
                f
            },
        ]);
        let words = generate(&m, &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        let modes = insts.iter()
            .filter(|(op, _)| *op == 16)
            .map(|(_, operands)| operands[1])
            .collect::<Vec<u32>>();
        assert!(modes.contains(&execution_mode::ORIGIN_UPPER_LEFT));
        assert!(modes.contains(&execution_mode::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn uniform_block_decorations() {
        let m = module(vec![
            decl_struct("Material", vec![
                member("color", vec4f()),
                member("shininess", Type::float()),
            ]),
            Stmt::DeclareExternal {
                vars: vec![ExternalVar {
                    name: "material".to_string(),
                    ty: Type::Uniform {
                        inner: Box::new(Type::Named {name: "Material".to_string()})
                    },
                    binding_set: Some(0),
                    binding_index: Some(2),
                    idx: None,
                    i: i()
                }],
                i: i()
            },
            fun("f", vec![], Type::float(), vec![
                ret(Some(access(ident("material"), "shininess"))),
            ]),
        ]);
        let words = generate(&m, &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        let decorations = insts.iter()
            .filter(|(op, _)| *op == 71)
            .map(|(_, operands)| (operands[1], operands.get(2).copied()))
            .collect::<Vec<(u32, Option<u32>)>>();
        assert!(decorations.contains(&(decoration::BLOCK, None)));
        assert!(decorations.iter().any(|(d, v)| {
            *d == decoration::BINDING && *v == Some(2)
        }));
        let offsets = insts.iter()
            .filter(|(op, _)| *op == 72)
            .filter(|(_, operands)| operands[2] == decoration::OFFSET)
            .map(|(_, operands)| operands[3])
            .collect::<Vec<u32>>();
        assert_eq!(offsets, vec![0, 16]);
    }

    #[test]
    fn while_loop_has_merge_structure() {
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            decl_var("x", Type::int(), Some(int(0))),
            Stmt::While {
                cond: binop(ident("x"), BinOp::Lt, int(10), Type::Unknown),
                unroll: false,
                body: vec![expr_stmt(Expr::Assign {
                    op: AssignOp::AddAssign,
                    lhs: Box::new(ident("x")),
                    rhs: Box::new(int(1)),
                    ty: Type::Unknown,
                    i: i()
                })],
                i: i()
            },
        ])]);
        let words = generate(&m, &SpirvEnv::default()).unwrap();
        let insts = instructions(&words);
        assert!(insts.iter().any(|(op, _)| *op == 246));
        assert!(insts.iter().any(|(op, _)| *op == 250));
    }

    #[test]
    fn no_partial_module_on_failure() {
        // Unknown identifier: sanitization fails, no words come back.
        let m = module(vec![fun("f", vec![], Type::Void, vec![
            expr_stmt(assign(ident("x"), int(1))),
        ])]);
        assert!(generate(&m, &SpirvEnv::default()).is_err());
    }
}
