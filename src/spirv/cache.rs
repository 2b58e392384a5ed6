use super::ops::{decoration, dim, Op};
use super::section::Section;
use crate::ast::ast::{ConstValue, Primitive, StructDesc, StructMember, TextureDim, Type};
use crate::internal_error;
use crate::utils::err::*;
use crate::utils::info::Info;

use std::collections::{BTreeMap, BTreeSet};

// Structural key of a deduplicated type declaration. Struct types are keyed
// by their declaration index; the block variant carries the std140 layout
// decorations a uniform block requires.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpvType {
    Void,
    Bool,
    Int {signed: bool},
    Float,
    Vector {elem: Primitive, dim: u32},
    Matrix {elem: Primitive, cols: u32, rows: u32},
    Array {elem: Box<SpvType>, len: u32},
    Struct {idx: usize, block: bool},
    Image {sampled: Primitive, dim: TextureDim},
    SampledImage {sampled: Primitive, dim: TextureDim},
    Pointer {storage: u32, inner: Box<SpvType>},
    Function {ret: Box<SpvType>, params: Vec<SpvType>},
}

fn primitive_spv(p: Primitive) -> SpvType {
    match p {
        Primitive::Bool => SpvType::Bool,
        Primitive::Float => SpvType::Float,
        Primitive::Int => SpvType::Int {signed: true},
        Primitive::UInt => SpvType::Int {signed: false},
    }
}

fn texture_dim_code(d: &TextureDim) -> u32 {
    match d {
        TextureDim::E1D => dim::D1,
        TextureDim::E2D => dim::D2,
        TextureDim::E3D => dim::D3,
        TextureDim::Cube => dim::CUBE,
    }
}

fn round_up(v: u32, align: u32) -> u32 {
    v.div_ceil(align) * align
}

// Allocates every numeric ID of the module from one monotonically increasing
// counter and deduplicates type and constant declarations. Composite types
// register their components first, so children always precede their parents
// in the declaration section.
pub struct SpirvCache<'a> {
    next_id: u32,
    types: BTreeMap<SpvType, u32>,
    constants: BTreeMap<(SpvType, Vec<u32>), u32>,
    pub decls: Section,
    pub debug: Section,
    pub annotations: Section,
    structs: &'a [StructDesc],
    decorated_arrays: BTreeSet<u32>,
}

impl<'a> SpirvCache<'a> {
    pub fn new(structs: &'a [StructDesc]) -> SpirvCache<'a> {
        SpirvCache {
            next_id: 1,
            types: BTreeMap::new(),
            constants: BTreeMap::new(),
            decls: Section::new(),
            debug: Section::new(),
            annotations: Section::new(),
            structs,
            decorated_arrays: BTreeSet::new(),
        }
    }

    pub fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // One greater than the highest ID handed out so far.
    pub fn bound(&self) -> u32 {
        self.next_id
    }

    pub fn from_ast_type(&self, ty: &Type) -> CompileResult<SpvType> {
        match ty {
            Type::Void => Ok(SpvType::Void),
            Type::Primitive {ty} => Ok(primitive_spv(*ty)),
            Type::Vector {dim, elem} => {
                Ok(SpvType::Vector {elem: *elem, dim: *dim as u32})
            },
            Type::Matrix {cols, rows, elem} => {
                Ok(SpvType::Matrix {
                    elem: *elem, cols: *cols as u32, rows: *rows as u32
                })
            },
            Type::Array {elem, len} => {
                let elem = self.from_ast_type(elem)?;
                Ok(SpvType::Array {elem: Box::new(elem), len: *len as u32})
            },
            Type::Struct {idx} => Ok(SpvType::Struct {idx: *idx, block: false}),
            Type::Uniform {inner} => {
                match &**inner {
                    Type::Struct {idx} => {
                        Ok(SpvType::Struct {idx: *idx, block: true})
                    },
                    ty => internal_error!(Info::default(), "Unresolved uniform \
                        block type {ty:?} reached code generation")
                }
            },
            Type::Sampler {dim, sampled} => {
                Ok(SpvType::SampledImage {sampled: *sampled, dim: *dim})
            },
            ty => internal_error!(Info::default(), "Unresolved type {ty:?} \
                reached code generation")
        }
    }

    pub fn ast_type_id(&mut self, ty: &Type) -> CompileResult<u32> {
        let spv = self.from_ast_type(ty)?;
        self.type_id(&spv)
    }

    pub fn pointer_id(&mut self, storage: u32, inner: &SpvType) -> CompileResult<u32> {
        self.type_id(&SpvType::Pointer {
            storage,
            inner: Box::new(inner.clone())
        })
    }

    pub fn type_id(&mut self, ty: &SpvType) -> CompileResult<u32> {
        if let Some(id) = self.types.get(ty) {
            return Ok(*id);
        }
        let id = match ty {
            SpvType::Void => {
                let id = self.alloc_id();
                self.decls.append(Op::TypeVoid, &[id]);
                id
            },
            SpvType::Bool => {
                let id = self.alloc_id();
                self.decls.append(Op::TypeBool, &[id]);
                id
            },
            SpvType::Int {signed} => {
                let id = self.alloc_id();
                self.decls.append(Op::TypeInt, &[id, 32, u32::from(*signed)]);
                id
            },
            SpvType::Float => {
                let id = self.alloc_id();
                self.decls.append(Op::TypeFloat, &[id, 32]);
                id
            },
            SpvType::Vector {elem, dim} => {
                let elem_id = self.type_id(&primitive_spv(*elem))?;
                let id = self.alloc_id();
                self.decls.append(Op::TypeVector, &[id, elem_id, *dim]);
                id
            },
            SpvType::Matrix {elem, cols, rows} => {
                let col = SpvType::Vector {elem: *elem, dim: *rows};
                let col_id = self.type_id(&col)?;
                let id = self.alloc_id();
                self.decls.append(Op::TypeMatrix, &[id, col_id, *cols]);
                id
            },
            SpvType::Array {elem, len} => {
                let elem_id = self.type_id(elem)?;
                let len_id = self.const_id(&ConstValue::UInt {v: *len})?;
                let id = self.alloc_id();
                self.decls.append(Op::TypeArray, &[id, elem_id, len_id]);
                id
            },
            SpvType::Struct {idx, block} => self.register_struct(*idx, *block)?,
            SpvType::Image {sampled, dim} => {
                let sampled_id = self.type_id(&primitive_spv(*sampled))?;
                let id = self.alloc_id();
                self.decls.append(Op::TypeImage, &[
                    id, sampled_id, texture_dim_code(dim), 0, 0, 0, 1, 0
                ]);
                id
            },
            SpvType::SampledImage {sampled, dim} => {
                let image = SpvType::Image {sampled: *sampled, dim: *dim};
                let image_id = self.type_id(&image)?;
                let id = self.alloc_id();
                self.decls.append(Op::TypeSampledImage, &[id, image_id]);
                id
            },
            SpvType::Pointer {storage, inner} => {
                let inner_id = self.type_id(inner)?;
                let id = self.alloc_id();
                self.decls.append(Op::TypePointer, &[id, *storage, inner_id]);
                id
            },
            SpvType::Function {ret, params} => {
                let ret_id = self.type_id(ret)?;
                let param_ids = params.iter()
                    .map(|p| self.type_id(p))
                    .collect::<CompileResult<Vec<u32>>>()?;
                let id = self.alloc_id();
                let mut operands = vec![id, ret_id];
                operands.extend(param_ids);
                self.decls.append(Op::TypeFunction, &operands);
                id
            },
        };
        self.types.insert(ty.clone(), id);
        Ok(id)
    }

    fn register_struct(&mut self, idx: usize, block: bool) -> CompileResult<u32> {
        let (name, members) = match self.structs.get(idx) {
            Some(desc) => {
                let members = desc.members.iter()
                    .map(|m| (m.name.clone(), m.ty.clone()))
                    .collect::<Vec<(String, Type)>>();
                (desc.name.clone(), members)
            },
            None => return internal_error!(Info::default(), "Reference to \
                undeclared struct {idx} during code generation")
        };
        let member_ids = members.iter()
            .map(|(_, ty)| self.ast_type_id(ty))
            .collect::<CompileResult<Vec<u32>>>()?;
        let id = self.alloc_id();
        let mut operands = vec![id];
        operands.extend(member_ids);
        self.decls.append(Op::TypeStruct, &operands);
        self.debug.append_with_string(Op::Name, &[id], &name, &[]);
        for (n, (mname, _)) in members.iter().enumerate() {
            self.debug.append_with_string(
                Op::MemberName, &[id, n as u32], mname, &[]
            );
        }
        if block {
            self.annotations.append(Op::Decorate, &[id, decoration::BLOCK]);
            let types = members.iter()
                .map(|(_, ty)| ty.clone())
                .collect::<Vec<Type>>();
            let offsets = self.std140_offsets_of(&types)?;
            for (n, (ty, offset)) in types.iter().zip(&offsets).enumerate() {
                self.annotations.append(Op::MemberDecorate, &[
                    id, n as u32, decoration::OFFSET, *offset
                ]);
                if ty.is_matrix() {
                    self.annotations.append(Op::MemberDecorate, &[
                        id, n as u32, decoration::COL_MAJOR
                    ]);
                    self.annotations.append(Op::MemberDecorate, &[
                        id, n as u32, decoration::MATRIX_STRIDE, 16
                    ]);
                }
                if let Type::Array {elem, ..} = ty {
                    let (_, elem_size) = self.std140_layout(elem)?;
                    let stride = round_up(elem_size, 16);
                    let array_id = self.ast_type_id(ty)?;
                    if self.decorated_arrays.insert(array_id) {
                        self.annotations.append(Op::Decorate, &[
                            array_id, decoration::ARRAY_STRIDE, stride
                        ]);
                    }
                }
            }
        }
        Ok(id)
    }

    // std140 alignment and size of a type inside a uniform block.
    fn std140_layout(&self, ty: &Type) -> CompileResult<(u32, u32)> {
        match ty {
            Type::Primitive {..} => Ok((4, 4)),
            Type::Vector {dim: 2, ..} => Ok((8, 8)),
            Type::Vector {dim: 3, ..} => Ok((16, 12)),
            Type::Vector {..} => Ok((16, 16)),
            Type::Matrix {cols, ..} => Ok((16, *cols as u32 * 16)),
            Type::Array {elem, len} => {
                let (_, elem_size) = self.std140_layout(elem)?;
                let stride = round_up(elem_size, 16);
                Ok((16, *len as u32 * stride))
            },
            Type::Struct {idx} => {
                let desc = match self.structs.get(*idx) {
                    Some(desc) => desc,
                    None => return internal_error!(Info::default(),
                        "Reference to undeclared struct {idx} in block layout")
                };
                let mut offset = 0;
                for m in &desc.members {
                    let (align, size) = self.std140_layout(&m.ty)?;
                    offset = round_up(offset, align) + size;
                }
                Ok((16, round_up(offset, 16)))
            },
            ty => internal_error!(Info::default(), "Type {ty:?} cannot appear \
                in a uniform block")
        }
    }

    fn std140_offsets_of(&self, types: &[Type]) -> CompileResult<Vec<u32>> {
        let mut offsets = vec![];
        let mut offset = 0;
        for ty in types {
            let (align, size) = self.std140_layout(ty)?;
            offset = round_up(offset, align);
            offsets.push(offset);
            offset += size;
        }
        Ok(offsets)
    }

    pub fn std140_offsets(&self, members: &[StructMember]) -> CompileResult<Vec<u32>> {
        let types = members.iter()
            .map(|m| m.ty.clone())
            .collect::<Vec<Type>>();
        self.std140_offsets_of(&types)
    }

    pub fn const_id(&mut self, v: &ConstValue) -> CompileResult<u32> {
        let spv_ty = self.from_ast_type(&v.value_type())?;
        let bits = match v {
            ConstValue::Bool {v} => vec![u32::from(*v)],
            ConstValue::Int {v} => vec![*v as u32],
            ConstValue::UInt {v} => vec![*v],
            ConstValue::Float {v} => vec![v.to_bits()],
            ConstValue::FVec {comps} => comps.iter().map(|c| c.to_bits()).collect(),
            ConstValue::IVec {comps} => comps.iter().map(|c| *c as u32).collect(),
        };
        let key = (spv_ty.clone(), bits.clone());
        if let Some(id) = self.constants.get(&key) {
            return Ok(*id);
        }
        let ty_id = self.type_id(&spv_ty)?;
        let id = match v {
            ConstValue::Bool {v} => {
                let id = self.alloc_id();
                let op = if *v { Op::ConstantTrue } else { Op::ConstantFalse };
                self.decls.append(op, &[ty_id, id]);
                id
            },
            ConstValue::Int {..} | ConstValue::UInt {..} | ConstValue::Float {..} => {
                let id = self.alloc_id();
                self.decls.append(Op::Constant, &[ty_id, id, bits[0]]);
                id
            },
            ConstValue::FVec {comps} => {
                let comp_ids = comps.iter()
                    .map(|c| self.const_id(&ConstValue::Float {v: *c}))
                    .collect::<CompileResult<Vec<u32>>>()?;
                let id = self.alloc_id();
                let mut operands = vec![ty_id, id];
                operands.extend(comp_ids);
                self.decls.append(Op::ConstantComposite, &operands);
                id
            },
            ConstValue::IVec {comps} => {
                let comp_ids = comps.iter()
                    .map(|c| self.const_id(&ConstValue::Int {v: *c}))
                    .collect::<CompileResult<Vec<u32>>>()?;
                let id = self.alloc_id();
                let mut operands = vec![ty_id, id];
                operands.extend(comp_ids);
                self.decls.append(Op::ConstantComposite, &operands);
                id
            },
        };
        self.constants.insert(key, id);
        Ok(id)
    }

    pub fn uint_const(&mut self, v: u32) -> CompileResult<u32> {
        self.const_id(&ConstValue::UInt {v})
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::ast_builder::*;

    #[test]
    fn type_deduplication() {
        let structs = vec![];
        let mut cache = SpirvCache::new(&structs);
        let ty = SpvType::Vector {elem: Primitive::Float, dim: 3};
        let a = cache.type_id(&ty).unwrap();
        let b = cache.type_id(&ty).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn components_registered_before_parents() {
        let structs = vec![];
        let mut cache = SpirvCache::new(&structs);
        let ty = SpvType::Vector {elem: Primitive::Float, dim: 3};
        let vec_id = cache.type_id(&ty).unwrap();
        let float_id = cache.type_id(&SpvType::Float).unwrap();
        assert!(float_id < vec_id);
    }

    #[test]
    fn constant_deduplication() {
        let structs = vec![];
        let mut cache = SpirvCache::new(&structs);
        let a = cache.const_id(&ConstValue::Float {v: 1.0}).unwrap();
        let b = cache.const_id(&ConstValue::Float {v: 1.0}).unwrap();
        let c = cache.const_id(&ConstValue::Float {v: 2.0}).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn composite_constant_reuses_scalars() {
        let structs = vec![];
        let mut cache = SpirvCache::new(&structs);
        let scalar = cache.const_id(&ConstValue::Float {v: 1.0}).unwrap();
        let vec = cache.const_id(&ConstValue::FVec {comps: vec![1.0, 1.0]}).unwrap();
        assert!(scalar < vec);
    }

    #[test]
    fn bound_is_one_past_highest_id() {
        let structs = vec![];
        let mut cache = SpirvCache::new(&structs);
        let id = cache.const_id(&ConstValue::UInt {v: 7}).unwrap();
        assert_eq!(cache.bound(), id + 1);
    }

    #[test]
    fn std140_vec3_padding() {
        let structs = vec![StructDesc {
            name: "Data".to_string(),
            members: vec![
                member("a", Type::float()),
                member("b", Type::vec(3, Primitive::Float)),
                member("c", Type::float()),
            ]
        }];
        let cache = SpirvCache::new(&structs);
        let offsets = cache.std140_offsets(&structs[0].members).unwrap();
        assert_eq!(offsets, vec![0, 16, 28]);
    }

    #[test]
    fn std140_matrix_stride() {
        let mat = Type::Matrix {cols: 4, rows: 4, elem: Primitive::Float};
        let structs = vec![StructDesc {
            name: "Data".to_string(),
            members: vec![member("m", mat), member("x", Type::float())]
        }];
        let cache = SpirvCache::new(&structs);
        let offsets = cache.std140_offsets(&structs[0].members).unwrap();
        assert_eq!(offsets, vec![0, 64]);
    }
}
