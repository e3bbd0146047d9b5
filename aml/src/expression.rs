use crate::{
    context::ExecContext,
    namespace::{Entity, EntityId, Operand},
    object::{parse_explicit, AmlValue, ObjectType},
    opcode::Opcode,
    AmlError,
};
use alloc::vec::Vec;
use core::cmp::Ordering;

fn operand(args: &[Operand], index: usize, op: Opcode) -> Result<&Operand, AmlError> {
    args.get(index).ok_or(AmlError::MissingOperand(op))
}

fn integer_operand(
    context: &mut ExecContext<'_>,
    args: &[Operand],
    index: usize,
    op: Opcode,
) -> Result<u64, AmlError> {
    let operand = operand(args, index, op)?;
    context.load(operand)?.to_integer(context.integer_width())
}

/// An operand of `LAnd`, `LOr` or `LNot`, which must be an integer, string or buffer.
fn logical_operand(
    context: &mut ExecContext<'_>,
    args: &[Operand],
    index: usize,
    op: Opcode,
) -> Result<bool, AmlError> {
    let value = context.load(operand(args, index, op)?)?;
    if !value.typ().is_data() {
        return Err(AmlError::InvalidComparisonType(value.typ()));
    }
    Ok(value.to_integer(context.integer_width())? != 0)
}

fn opcode_of(context: &ExecContext<'_>, id: EntityId) -> Result<Opcode, AmlError> {
    Ok(context.vm.namespace.get(id)?.opcode())
}

pub(crate) fn op_store(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let (Some(source), Some(target)) = (args.first(), args.get(1)) else {
        return Err(AmlError::NilStoreOperands);
    };

    let value = context.load(source)?;
    context.store(value.clone(), target)?;
    context.ret_val = value;
    Ok(())
}

pub(crate) fn op_copy_object(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let source = operand(&args, 0, Opcode::CopyObject)?;
    let target = operand(&args, 1, Opcode::CopyObject)?;

    let value = context.load(source)?;
    context.copy_object(value.clone(), target)?;
    context.ret_val = value;
    Ok(())
}

/// `Op(Operand, Operand, Target)` for the integer operations with two operands.
pub(crate) fn op_binary_maths(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let op = opcode_of(context, id)?;
    let args = context.operands(id)?;
    let width = context.integer_width();
    let left = integer_operand(context, &args, 0, op)?;
    let right = integer_operand(context, &args, 1, op)?;

    let result = match op {
        Opcode::Add => left.wrapping_add(right),
        Opcode::Subtract => left.wrapping_sub(right),
        Opcode::Multiply => left.wrapping_mul(right),
        Opcode::And => left & right,
        Opcode::Or => left | right,
        Opcode::Xor => left ^ right,
        Opcode::Nand => !(left & right),
        Opcode::Nor => !(left | right),
        Opcode::ShiftLeft => u32::try_from(right).ok().and_then(|shift| left.checked_shl(shift)).unwrap_or(0),
        Opcode::ShiftRight => u32::try_from(right).ok().and_then(|shift| left.checked_shr(shift)).unwrap_or(0),
        Opcode::Mod => left.checked_rem(right).ok_or(AmlError::DivideByZero)?,
        _ => return Err(AmlError::UnsupportedOpcode(op)),
    };

    let result = AmlValue::Integer(width.mask(result));
    context.store_result(result.clone(), args.get(2))?;
    context.ret_val = result;
    Ok(())
}

/// `Divide(Dividend, Divisor, Remainder, Quotient)`
pub(crate) fn op_divide(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let dividend = integer_operand(context, &args, 0, Opcode::Divide)?;
    let divisor = integer_operand(context, &args, 1, Opcode::Divide)?;

    if divisor == 0 {
        return Err(AmlError::DivideByZero);
    }

    let width = context.integer_width();
    let remainder = AmlValue::Integer(width.mask(dividend % divisor));
    let quotient = AmlValue::Integer(width.mask(dividend / divisor));
    context.store_result(remainder, args.get(2))?;
    context.store_result(quotient.clone(), args.get(3))?;
    context.ret_val = quotient;
    Ok(())
}

pub(crate) fn op_unary_maths(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let op = opcode_of(context, id)?;
    let args = context.operands(id)?;
    let width = context.integer_width();
    let operand = integer_operand(context, &args, 0, op)?;

    let result = match op {
        Opcode::Not => !operand,
        // Bit positions are one-based, with zero meaning no bits are set
        Opcode::FindSetLeftBit => 64 - operand.leading_zeros() as u64,
        Opcode::FindSetRightBit if operand == 0 => 0,
        Opcode::FindSetRightBit => operand.trailing_zeros() as u64 + 1,
        _ => return Err(AmlError::UnsupportedOpcode(op)),
    };

    let result = AmlValue::Integer(width.mask(result));
    context.store_result(result.clone(), args.get(1))?;
    context.ret_val = result;
    Ok(())
}

/// `Increment` and `Decrement` update their operand in place.
pub(crate) fn op_inc_dec(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let op = opcode_of(context, id)?;
    let args = context.operands(id)?;
    let width = context.integer_width();
    let target = operand(&args, 0, op)?;
    let value = context.load(target)?.to_integer(width)?;

    let result = match op {
        Opcode::Increment => value.wrapping_add(1),
        Opcode::Decrement => value.wrapping_sub(1),
        _ => return Err(AmlError::UnsupportedOpcode(op)),
    };

    let result = AmlValue::Integer(width.mask(result));
    context.store(result.clone(), target)?;
    context.ret_val = result;
    Ok(())
}

/// The logical operators produce `Ones` for true, and `Zero` for false. Comparisons are made in the type of
/// their first operand, which must be an integer, string or buffer.
pub(crate) fn op_logical(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let op = opcode_of(context, id)?;
    let args = context.operands(id)?;
    let width = context.integer_width();

    let result = match op {
        Opcode::LNot => !logical_operand(context, &args, 0, op)?,
        Opcode::LAnd | Opcode::LOr => {
            let left = logical_operand(context, &args, 0, op)?;
            let right = logical_operand(context, &args, 1, op)?;
            if op == Opcode::LAnd {
                left && right
            } else {
                left || right
            }
        }
        _ => {
            let left = context.load(operand(&args, 0, op)?)?;
            let right = context.load(operand(&args, 1, op)?)?;
            let ordering = left.compare(&right, width)?;

            match op {
                Opcode::LEqual => ordering == Ordering::Equal,
                Opcode::LNotEqual => ordering != Ordering::Equal,
                Opcode::LGreater => ordering == Ordering::Greater,
                Opcode::LGreaterEqual => ordering != Ordering::Less,
                Opcode::LLess => ordering == Ordering::Less,
                Opcode::LLessEqual => ordering != Ordering::Greater,
                _ => return Err(AmlError::UnsupportedOpcode(op)),
            }
        }
    };

    context.ret_val = AmlValue::Integer(if result { width.ones() } else { 0 });
    Ok(())
}

/// `ToInteger`, `ToBuffer`, `ToHexString` and `ToDecimalString`, which all take an operand and a target.
pub(crate) fn op_convert(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let op = opcode_of(context, id)?;
    let args = context.operands(id)?;
    let width = context.integer_width();
    let value = context.load(operand(&args, 0, op)?)?;

    let result = match (op, &value) {
        (Opcode::ToInteger, AmlValue::String(string)) => AmlValue::Integer(parse_explicit(string, width)?),
        (Opcode::ToInteger, _) => AmlValue::Integer(value.to_integer(width)?),
        (Opcode::ToBuffer, _) => AmlValue::Buffer(value.to_buffer(width)?),
        (Opcode::ToHexString, _) => AmlValue::String(value.to_hex_string(width)?),
        (Opcode::ToDecimalString, _) => AmlValue::String(value.to_decimal_string(width)?),
        _ => return Err(AmlError::UnsupportedOpcode(op)),
    };

    context.store_result(result.clone(), args.get(1))?;
    context.ret_val = result;
    Ok(())
}

pub(crate) fn op_size_of(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let value = context.load(operand(&args, 0, Opcode::SizeOf)?)?;

    let size = match &value {
        AmlValue::Buffer(bytes) => bytes.len(),
        AmlValue::String(string) => string.len(),
        AmlValue::Package(elements) => elements.len(),
        other => return Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Buffer, got: other.typ() }),
    };

    context.ret_val = AmlValue::Integer(size as u64);
    Ok(())
}

/// The operands of a `Package` are its elements, which are evaluated when the package is.
pub(crate) fn op_package(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let elements = args.iter().map(|element| context.load(element)).collect::<Result<Vec<_>, _>>()?;
    context.ret_val = AmlValue::Package(elements);
    Ok(())
}

pub(crate) fn op_buffer(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    context.ret_val = AmlValue::Buffer(context.buffer_value(id)?);
    Ok(())
}

pub(crate) fn op_method_call(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let Entity::Invocation(invocation) = context.vm.namespace.get(id)? else {
        return Err(AmlError::InvalidEntity(id));
    };
    let (target, args) = (invocation.target.clone(), invocation.args.clone());

    let method = context.resolve(&target)?;
    let args = args.iter().map(|arg| context.load(arg)).collect::<Result<Vec<_>, _>>()?;
    context.ret_val = context.invoke(method, args)?.unwrap_or(AmlValue::Uninitialized);
    Ok(())
}
