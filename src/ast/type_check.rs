use super::ast::*;
use crate::type_error;
use crate::utils::err::*;
use crate::utils::info::*;

use itertools::Itertools;

fn binary_mul_div_type(
    op: &BinOp,
    lhs: &Type,
    rhs: &Type,
    i: &Info
) -> CompileResult<Type> {
    match (lhs, rhs) {
        (Type::Primitive {ty: lty}, Type::Primitive {ty: rty}) => {
            if lty == rty && lty.is_numeric() {
                Ok(lhs.clone())
            } else {
                type_error!(i, "Binary operator {op:?} expects identical numeric \
                                operands, found {lhs:?} and {rhs:?}")
            }
        },
        (Type::Primitive {ty: sca}, Type::Vector {elem, ..}) |
        (Type::Vector {elem, ..}, Type::Primitive {ty: sca}) => {
            if sca == elem && sca.is_numeric() {
                if lhs.is_vector() {
                    Ok(lhs.clone())
                } else {
                    Ok(rhs.clone())
                }
            } else {
                type_error!(i, "Vector and scalar operands of {op:?} must share \
                                their element type")
            }
        },
        (Type::Vector {..}, Type::Vector {..}) => {
            if lhs == rhs {
                Ok(lhs.clone())
            } else {
                type_error!(i, "Vector operands of {op:?} must have identical \
                                types, found {lhs:?} and {rhs:?}")
            }
        },
        (Type::Primitive {ty: sca}, Type::Matrix {elem, ..}) |
        (Type::Matrix {elem, ..}, Type::Primitive {ty: sca}) => {
            if sca == elem && sca.is_numeric() {
                if lhs.is_matrix() {
                    Ok(lhs.clone())
                } else {
                    Ok(rhs.clone())
                }
            } else {
                type_error!(i, "Matrix and scalar operands of {op:?} must share \
                                their element type")
            }
        },
        (Type::Matrix {cols, rows, elem}, Type::Vector {dim, elem: velem}) => {
            if *op != BinOp::Mul {
                type_error!(i, "Matrix and vector operands only support \
                                multiplication")
            } else if elem == velem && cols == dim {
                Ok(Type::Vector {dim: *rows, elem: *elem})
            } else {
                type_error!(i, "Cannot multiply a matrix of {cols} columns with \
                                a vector of {dim} components")
            }
        },
        (Type::Matrix {..}, Type::Matrix {..}) => {
            if lhs == rhs {
                Ok(lhs.clone())
            } else {
                type_error!(i, "Matrix operands of {op:?} must have identical \
                                types, found {lhs:?} and {rhs:?}")
            }
        },
        _ => type_error!(i, "Incompatible operand types {lhs:?} and {rhs:?} \
                             for binary operator {op:?}")
    }
}

pub fn binary_op_type(
    op: &BinOp,
    lhs: &Type,
    rhs: &Type,
    i: &Info
) -> CompileResult<Type> {
    // Unknown operands only survive resolution under partial sanitization, in
    // which case the result type stays unknown rather than failing.
    if lhs.is_unknown() || rhs.is_unknown() {
        return Ok(Type::Unknown);
    }
    let operand_supported = |ty: &Type| {
        ty.is_primitive() || ty.is_vector() || ty.is_matrix()
    };
    if !operand_supported(lhs) {
        return type_error!(i, "Left expression type {lhs:?} does not support \
                               binary operators");
    }
    if !operand_supported(rhs) {
        return type_error!(i, "Right expression type {rhs:?} does not support \
                               binary operators");
    }
    match op {
        BinOp::And | BinOp::Or => {
            if lhs.is_bool() && rhs.is_bool() {
                Ok(Type::bool())
            } else {
                type_error!(i, "Logical {op:?} is only supported on booleans")
            }
        },
        BinOp::Eq | BinOp::Neq => {
            if lhs == rhs {
                Ok(Type::bool())
            } else {
                type_error!(i, "Equality operands must have identical types, \
                                found {lhs:?} and {rhs:?}")
            }
        },
        BinOp::Lt | BinOp::Leq | BinOp::Gt | BinOp::Geq => {
            match lhs {
                Type::Primitive {ty} if ty.is_numeric() && lhs == rhs => {
                    Ok(Type::bool())
                },
                Type::Primitive {ty: Primitive::Bool} => {
                    type_error!(i, "Ordering comparisons are not supported for \
                                    booleans")
                },
                _ => type_error!(i, "Ordering comparisons expect identical \
                                     numeric scalars, found {lhs:?} and {rhs:?}")
            }
        },
        BinOp::Add | BinOp::Sub => {
            if lhs != rhs {
                type_error!(i, "Binary operator {op:?} expects identical operand \
                                types, found {lhs:?} and {rhs:?}")
            } else if lhs.is_bool() {
                type_error!(i, "Binary operator {op:?} is not supported for \
                                booleans")
            } else {
                Ok(lhs.clone())
            }
        },
        BinOp::Mul | BinOp::Div => binary_mul_div_type(op, lhs, rhs, i),
    }
}

pub fn unary_op_type(op: &UnOp, arg: &Type, i: &Info) -> CompileResult<Type> {
    if arg.is_unknown() {
        return Ok(Type::Unknown);
    }
    match op {
        UnOp::Not => {
            if arg.is_bool() {
                Ok(Type::bool())
            } else {
                type_error!(i, "Logical not is only supported on booleans")
            }
        },
        UnOp::Neg | UnOp::Plus => {
            match arg.elem_primitive() {
                Some(p) if p.is_numeric() => Ok(arg.clone()),
                _ => type_error!(i, "Unary {op:?} expects a numeric scalar or \
                                     vector, found {arg:?}")
            }
        },
    }
}

pub fn swizzle_type(
    src: &Type,
    comps: &[SwizzleComponent],
    i: &Info
) -> CompileResult<Type> {
    if src.is_unknown() {
        return Ok(Type::Unknown);
    }
    if comps.is_empty() || comps.len() > 4 {
        return type_error!(i, "A swizzle must select between one and four \
                               components, found {0}", comps.len());
    }
    let (src_dim, elem) = match src {
        Type::Primitive {ty} => (1, *ty),
        Type::Vector {dim, elem} => (*dim, *elem),
        _ => return type_error!(i, "Cannot swizzle non-scalar, non-vector \
                                    type {src:?}")
    };
    for c in comps {
        if c.index() >= src_dim {
            return type_error!(i, "Swizzle component {c:?} exceeds the {src_dim} \
                                   component(s) of the source type");
        }
    }
    if comps.len() == 1 {
        Ok(Type::Primitive {ty: elem})
    } else {
        Ok(Type::Vector {dim: comps.len(), elem})
    }
}

pub fn cast_type(
    target: &Type,
    arg_types: &[&Type],
    i: &Info
) -> CompileResult<Type> {
    if arg_types.iter().any(|ty| ty.is_unknown()) {
        return Ok(Type::Unknown);
    }
    let required = match target.component_count() {
        Some(n) => n,
        None => return type_error!(i, "Cannot cast to type {target:?}")
    };
    if arg_types.is_empty() {
        return type_error!(i, "A cast expects at least one expression");
    }

    // A single operand of matching component count is a conversion between
    // element types; matrix-to-matrix casts are also dimension changes.
    if arg_types.len() == 1 {
        let arg = arg_types[0];
        let convertible = match (arg, target) {
            (Type::Primitive {ty}, Type::Primitive {ty: tty}) =>
                ty.is_numeric() && tty.is_numeric(),
            (Type::Vector {dim, elem}, Type::Vector {dim: tdim, elem: telem}) =>
                dim == tdim && elem.is_numeric() && telem.is_numeric(),
            (Type::Matrix {elem, ..}, Type::Matrix {elem: telem, ..}) =>
                elem == telem,
            _ => false
        };
        if convertible {
            return Ok(target.clone());
        }
    }

    let target_elem = match target {
        Type::Primitive {ty} => *ty,
        Type::Vector {elem, ..} => *elem,
        Type::Matrix {elem, ..} => *elem,
        _ => return type_error!(i, "Cannot cast to type {target:?}")
    };
    let count = arg_types.iter()
        .map(|ty| match ty.component_count() {
            Some(n) => {
                if ty.elem_primitive() == Some(target_elem) ||
                   matches!(ty, Type::Matrix {elem, ..} if *elem == target_elem) {
                    Ok(n)
                } else {
                    type_error!(i, "Cast component type {ty:?} does not match \
                                    the target element type {target_elem:?}")
                }
            },
            None => type_error!(i, "Type {ty:?} cannot appear in a cast \
                                    expression")
        })
        .fold_ok(0, |acc, n| acc + n)?;
    if count != required {
        type_error!(i, "Cast expressions sum to {count} component(s), but the \
                        target type {target:?} has {required}")
    } else {
        Ok(target.clone())
    }
}

fn float_vector(ty: &Type) -> bool {
    matches!(ty, Type::Vector {elem: Primitive::Float, ..})
}

fn args_must_match(args: &[Type], i: &Info) -> CompileResult<()> {
    if args.iter().all(|ty| *ty == args[0]) {
        Ok(())
    } else {
        let tys = args.iter().map(|ty| format!("{ty:?}")).join(", ");
        type_error!(i, "All intrinsic parameters must have the same type, \
                        found {tys}")
    }
}

fn intrinsic_arity(op: &IntrinsicOp) -> usize {
    match op {
        IntrinsicOp::Exp | IntrinsicOp::Length | IntrinsicOp::Normalize => 1,
        IntrinsicOp::CrossProduct | IntrinsicOp::DotProduct |
        IntrinsicOp::Max | IntrinsicOp::Min | IntrinsicOp::Pow |
        IntrinsicOp::Reflect | IntrinsicOp::SampleTexture => 2,
    }
}

pub fn intrinsic_type(
    op: &IntrinsicOp,
    args: &[Type],
    i: &Info
) -> CompileResult<Type> {
    if args.iter().any(|ty| ty.is_unknown()) {
        return Ok(Type::Unknown);
    }
    let expected = intrinsic_arity(op);
    if args.len() != expected {
        return type_error!(i, "Intrinsic {op:?} expects {expected} \
                               parameter(s), got {0}", args.len());
    }
    match op {
        IntrinsicOp::CrossProduct => {
            args_must_match(args, i)?;
            if args[0] == Type::vec(3, Primitive::Float) {
                Ok(args[0].clone())
            } else {
                type_error!(i, "Intrinsic CrossProduct only works on \
                                three-component float vectors")
            }
        },
        IntrinsicOp::DotProduct => {
            args_must_match(args, i)?;
            if float_vector(&args[0]) {
                Ok(Type::float())
            } else {
                type_error!(i, "Intrinsic DotProduct expects float vectors")
            }
        },
        IntrinsicOp::Exp | IntrinsicOp::Pow => {
            args_must_match(args, i)?;
            match args[0].elem_primitive() {
                Some(Primitive::Float) => Ok(args[0].clone()),
                _ => type_error!(i, "Intrinsic {op:?} only works on \
                                     floating-point scalars or vectors")
            }
        },
        IntrinsicOp::Length => {
            if float_vector(&args[0]) {
                Ok(Type::float())
            } else {
                type_error!(i, "Intrinsic Length expects a float vector")
            }
        },
        IntrinsicOp::Max | IntrinsicOp::Min => {
            args_must_match(args, i)?;
            match args[0].elem_primitive() {
                Some(p) if p.is_numeric() => Ok(args[0].clone()),
                _ => type_error!(i, "Intrinsic {op:?} does not work on \
                                     booleans")
            }
        },
        IntrinsicOp::Normalize | IntrinsicOp::Reflect => {
            args_must_match(args, i)?;
            if float_vector(&args[0]) {
                Ok(args[0].clone())
            } else {
                type_error!(i, "Intrinsic {op:?} expects float vectors")
            }
        },
        IntrinsicOp::SampleTexture => {
            match (&args[0], &args[1]) {
                (Type::Sampler {dim, sampled}, coords) => {
                    let valid = match dim.coordinate_count() {
                        1 => *coords == Type::float(),
                        n => *coords == Type::vec(n, Primitive::Float)
                    };
                    if valid {
                        Ok(Type::vec(4, *sampled))
                    } else {
                        type_error!(i, "Sampling a {dim:?} texture expects \
                                        {0} float coordinate(s)",
                                        dim.coordinate_count())
                    }
                },
                _ => type_error!(i, "First parameter of SampleTexture must be \
                                     a sampler")
            }
        },
    }
}

// Whether an expression designates an addressable location.
pub fn is_l_value(e: &Expr) -> bool {
    match e {
        Expr::VarRef {..} => true,
        Expr::Ident {..} => true,
        Expr::AccessIdent {target, ..} => is_l_value(target),
        Expr::AccessIndex {target, ..} => is_l_value(target),
        Expr::Swizzle {target, ..} => is_l_value(target),
        _ => false
    }
}

pub fn condition_must_be_bool(ty: &Type, i: &Info) -> CompileResult<()> {
    if ty.is_bool() || ty.is_unknown() {
        Ok(())
    } else {
        type_error!(i, "Condition must be a boolean expression, found {ty:?}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::*;

    fn i() -> Info {
        Info::default()
    }

    fn vec3f() -> Type {
        Type::vec(3, Primitive::Float)
    }

    fn binop_h(op: BinOp, lhs: Type, rhs: Type) -> CompileResult<Type> {
        binary_op_type(&op, &lhs, &rhs, &i())
    }

    #[test]
    fn mul_identical_vectors() {
        assert_eq!(binop_h(BinOp::Mul, vec3f(), vec3f()), Ok(vec3f()));
    }

    #[test]
    fn mul_mismatched_vectors() {
        let r = binop_h(BinOp::Mul, vec3f(), Type::vec(2, Primitive::Float));
        assert_error_matches(r, "identical types");
    }

    #[test]
    fn mul_vector_scalar_either_order() {
        assert_eq!(binop_h(BinOp::Mul, vec3f(), Type::float()), Ok(vec3f()));
        assert_eq!(binop_h(BinOp::Mul, Type::float(), vec3f()), Ok(vec3f()));
    }

    #[test]
    fn mul_matrix_vector() {
        let mat4 = Type::Matrix {cols: 4, rows: 4, elem: Primitive::Float};
        let vec4 = Type::vec(4, Primitive::Float);
        assert_eq!(binop_h(BinOp::Mul, mat4, vec4.clone()), Ok(vec4));
    }

    #[test]
    fn mul_matrix_vector_dimension_mismatch() {
        let mat4 = Type::Matrix {cols: 4, rows: 4, elem: Primitive::Float};
        let r = binop_h(BinOp::Mul, mat4, vec3f());
        assert_error_matches(r, "4 columns");
    }

    #[test]
    fn mul_matrix_matrix() {
        let mat4 = Type::Matrix {cols: 4, rows: 4, elem: Primitive::Float};
        assert_eq!(binop_h(BinOp::Mul, mat4.clone(), mat4.clone()), Ok(mat4));
    }

    #[test]
    fn mul_matrix_scalar() {
        let mat4 = Type::Matrix {cols: 4, rows: 4, elem: Primitive::Float};
        assert_eq!(binop_h(BinOp::Mul, mat4.clone(), Type::float()), Ok(mat4));
    }

    #[test]
    fn add_requires_identical_types() {
        assert_eq!(binop_h(BinOp::Add, vec3f(), vec3f()), Ok(vec3f()));
        let r = binop_h(BinOp::Add, vec3f(), Type::float());
        assert_error_matches(r, "identical operand types");
    }

    #[test]
    fn equality_gives_bool() {
        assert_eq!(binop_h(BinOp::Eq, vec3f(), vec3f()), Ok(Type::bool()));
    }

    #[test]
    fn ordering_rejects_bool() {
        let r = binop_h(BinOp::Lt, Type::bool(), Type::bool());
        assert_error_matches(r, "booleans");
    }

    #[test]
    fn logical_ops_require_bool() {
        assert_eq!(binop_h(BinOp::And, Type::bool(), Type::bool()), Ok(Type::bool()));
        let r = binop_h(BinOp::Or, Type::float(), Type::float());
        assert_error_matches(r, "booleans");
    }

    #[test]
    fn binary_op_on_sampler() {
        let sampler = Type::Sampler {dim: TextureDim::E2D, sampled: Primitive::Float};
        let r = binop_h(BinOp::Add, sampler, Type::float());
        assert_error_matches(r, "does not support binary operators");
    }

    #[test]
    fn unary_neg_numeric() {
        assert_eq!(unary_op_type(&UnOp::Neg, &vec3f(), &i()), Ok(vec3f()));
    }

    #[test]
    fn unary_not_requires_bool() {
        let r = unary_op_type(&UnOp::Not, &Type::float(), &i());
        assert_error_matches(r, "booleans");
    }

    #[test]
    fn swizzle_vec_to_vec() {
        use SwizzleComponent::*;
        let r = swizzle_type(&vec3f(), &[X, Z], &i());
        assert_eq!(r, Ok(Type::vec(2, Primitive::Float)));
    }

    #[test]
    fn swizzle_single_component_is_scalar() {
        use SwizzleComponent::*;
        assert_eq!(swizzle_type(&vec3f(), &[Y], &i()), Ok(Type::float()));
    }

    #[test]
    fn swizzle_out_of_range_component() {
        use SwizzleComponent::*;
        let r = swizzle_type(&Type::vec(2, Primitive::Float), &[X, Z], &i());
        assert_error_matches(r, "exceeds");
    }

    #[test]
    fn swizzle_matrix_fails() {
        use SwizzleComponent::*;
        let mat = Type::Matrix {cols: 2, rows: 2, elem: Primitive::Float};
        let r = swizzle_type(&mat, &[X], &i());
        assert_error_matches(r, "Cannot swizzle");
    }

    #[test]
    fn cast_component_count_mismatch() {
        let f = Type::float();
        let vec4 = Type::vec(4, Primitive::Float);
        let r = cast_type(&vec4, &[&f, &f, &f], &i());
        assert_error_matches(r, "sum to 3");
    }

    #[test]
    fn cast_exact_component_count() {
        let f = Type::float();
        let vec4 = Type::vec(4, Primitive::Float);
        let r = cast_type(&vec4, &[&vec3f(), &f], &i());
        assert_eq!(r, Ok(vec4));
    }

    #[test]
    fn cast_scalar_conversion() {
        let r = cast_type(&Type::float(), &[&Type::int()], &i());
        assert_eq!(r, Ok(Type::float()));
    }

    #[test]
    fn cast_elem_type_mismatch() {
        let vec2i = Type::vec(2, Primitive::Int);
        let vec4 = Type::vec(4, Primitive::Float);
        let f = Type::float();
        let r = cast_type(&vec4, &[&vec2i, &f, &f], &i());
        assert_error_matches(r, "does not match the target element type");
    }

    #[test]
    fn intrinsic_cross_requires_vec3() {
        let r = intrinsic_type(
            &IntrinsicOp::CrossProduct,
            &[vec3f(), vec3f()],
            &i()
        );
        assert_eq!(r, Ok(vec3f()));
        let vec2 = Type::vec(2, Primitive::Float);
        let r = intrinsic_type(
            &IntrinsicOp::CrossProduct,
            &[vec2.clone(), vec2],
            &i()
        );
        assert_error_matches(r, "three-component");
    }

    #[test]
    fn intrinsic_dot_gives_scalar() {
        let r = intrinsic_type(&IntrinsicOp::DotProduct, &[vec3f(), vec3f()], &i());
        assert_eq!(r, Ok(Type::float()));
    }

    #[test]
    fn intrinsic_dot_wrong_arity() {
        let r = intrinsic_type(&IntrinsicOp::DotProduct, &[vec3f()], &i());
        assert_error_matches(r, "expects 2 parameter");
    }

    #[test]
    fn intrinsic_dot_mismatched_params() {
        let vec2 = Type::vec(2, Primitive::Float);
        let r = intrinsic_type(&IntrinsicOp::DotProduct, &[vec3f(), vec2], &i());
        assert_error_matches(r, "same type");
    }

    #[test]
    fn intrinsic_max_rejects_bool() {
        let r = intrinsic_type(
            &IntrinsicOp::Max,
            &[Type::bool(), Type::bool()],
            &i()
        );
        assert_error_matches(r, "booleans");
    }

    #[test]
    fn intrinsic_sample_texture() {
        let sampler = Type::Sampler {dim: TextureDim::E2D, sampled: Primitive::Float};
        let coords = Type::vec(2, Primitive::Float);
        let r = intrinsic_type(&IntrinsicOp::SampleTexture, &[sampler, coords], &i());
        assert_eq!(r, Ok(Type::vec(4, Primitive::Float)));
    }

    #[test]
    fn intrinsic_sample_texture_wrong_coords() {
        let sampler = Type::Sampler {dim: TextureDim::E3D, sampled: Primitive::Float};
        let coords = Type::vec(2, Primitive::Float);
        let r = intrinsic_type(&IntrinsicOp::SampleTexture, &[sampler, coords], &i());
        assert_error_matches(r, "3 float coordinate");
    }

    #[test]
    fn l_value_checks() {
        let var = Expr::VarRef {idx: 0, ty: vec3f(), i: i()};
        assert!(is_l_value(&var));
        let swizzled = Expr::Swizzle {
            target: Box::new(var.clone()),
            comps: vec![SwizzleComponent::X],
            ty: Type::float(),
            i: i()
        };
        assert!(is_l_value(&swizzled));
        let lit = Expr::Const {v: ConstValue::Float {v: 1.0}, ty: Type::float(), i: i()};
        assert!(!is_l_value(&lit));
    }
}
