use crate::{
    context::ExecContext,
    expression,
    namespace::EntityId,
    opcode::{Opcode, NUM_OPCODES},
    statement,
    AmlError,
};

pub(crate) type OpHandler = fn(&mut ExecContext<'_>, EntityId) -> Result<(), AmlError>;

/// Maps each opcode to the function that executes it. The table is built once, when the interpreter is
/// initialized, and opcodes without a handler report `AmlError::UnsupportedOpcode`.
pub(crate) struct DispatchTable {
    handlers: [OpHandler; NUM_OPCODES],
}

impl DispatchTable {
    pub(crate) fn new() -> DispatchTable {
        let mut handlers = [op_unsupported as OpHandler; NUM_OPCODES];
        let mut set = |ops: &[Opcode], handler: OpHandler| {
            for op in ops {
                handlers[*op as usize] = handler;
            }
        };

        set(&[Opcode::Noop, Opcode::Else], statement::op_noop);
        set(&[Opcode::Breakpoint], statement::op_breakpoint);
        set(&[Opcode::Break], statement::op_break);
        set(&[Opcode::Continue], statement::op_continue);
        set(&[Opcode::Return], statement::op_return);
        set(&[Opcode::If], statement::op_if);
        set(&[Opcode::While], statement::op_while);
        set(
            &[
                Opcode::Alias,
                Opcode::Name,
                Opcode::Scope,
                Opcode::Method,
                Opcode::External,
                Opcode::Mutex,
                Opcode::Event,
                Opcode::OpRegion,
                Opcode::Field,
                Opcode::Device,
                Opcode::Processor,
                Opcode::PowerRes,
                Opcode::ThermalZone,
                Opcode::IndexField,
                Opcode::BankField,
                Opcode::DataRegion,
            ],
            statement::op_declaration,
        );

        set(&[Opcode::Store], expression::op_store);
        set(&[Opcode::CopyObject], expression::op_copy_object);
        set(
            &[
                Opcode::Add,
                Opcode::Subtract,
                Opcode::Multiply,
                Opcode::And,
                Opcode::Or,
                Opcode::Xor,
                Opcode::Nand,
                Opcode::Nor,
                Opcode::ShiftLeft,
                Opcode::ShiftRight,
                Opcode::Mod,
            ],
            expression::op_binary_maths,
        );
        set(&[Opcode::Divide], expression::op_divide);
        set(&[Opcode::Not, Opcode::FindSetLeftBit, Opcode::FindSetRightBit], expression::op_unary_maths);
        set(&[Opcode::Increment, Opcode::Decrement], expression::op_inc_dec);
        set(
            &[
                Opcode::LAnd,
                Opcode::LOr,
                Opcode::LNot,
                Opcode::LEqual,
                Opcode::LNotEqual,
                Opcode::LGreater,
                Opcode::LGreaterEqual,
                Opcode::LLess,
                Opcode::LLessEqual,
            ],
            expression::op_logical,
        );
        set(
            &[Opcode::ToInteger, Opcode::ToBuffer, Opcode::ToHexString, Opcode::ToDecimalString],
            expression::op_convert,
        );
        set(&[Opcode::SizeOf], expression::op_size_of);
        set(&[Opcode::Package], expression::op_package);
        set(&[Opcode::Buffer], expression::op_buffer);
        set(&[Opcode::MethodCall], expression::op_method_call);

        DispatchTable { handlers }
    }

    pub(crate) fn handler(&self, op: Opcode) -> OpHandler {
        self.handlers[op as usize]
    }
}

fn op_unsupported(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    Err(AmlError::UnsupportedOpcode(context.vm.namespace.get(id)?.opcode()))
}
