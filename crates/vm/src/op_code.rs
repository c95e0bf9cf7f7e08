//! Opcode definitions for the MSL VM.
//!
//! One byte space covers both the declaration grammar of serialized
//! assemblies and the executable instructions inside method bodies.

use std::fmt;

/// All bytecode opcodes. Values below [`OpCode::PushString`] belong to the
/// assembly declaration grammar; the rest appear in method bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Marker emitted in place of bytecode that failed to generate.
    ErrorSymbol = 33,
    AssemblyBeginDecl,
    AssemblyEndDecl,
    NamespacePoolDeclSize,
    FriendPoolDeclSize,
    ClassPoolDeclSize,
    AttributePoolDeclSize,
    MethodPoolDeclSize,
    MethodParamsDeclSize,
    DependencyPoolDeclSize,
    MethodBodyBeginDecl,
    MethodBodyEndDecl,
    StringDecl,
    ModifiersDecl,

    PushString,
    PushInteger,
    PushFloat,
    PushObject,
    PushThis,
    PushNull,
    PushTrue,
    PushFalse,
    PopToReturn,
    AllocVar,
    AllocConstVar,
    NegationOp,
    NegativeOp,
    PositiveOp,
    SumOp,
    SubOp,
    MultOp,
    DivOp,
    ModOp,
    PowerOp,
    AssignOp,
    GetMember,
    SetAluIncr,
    CmpEq,
    CmpNeq,
    CmpL,
    CmpG,
    CmpLe,
    CmpGe,
    CmpAnd,
    CmpOr,
    GetIndex,
    CallFunction,
    Return,
    SetLabel,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    PopStackTop,
    PushStackFrame,
}

impl OpCode {
    const FIRST: u8 = OpCode::ErrorSymbol as u8;
    const LAST: u8 = OpCode::PushStackFrame as u8;

    /// Decodes a raw byte, if it names an opcode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        if (Self::FIRST..=Self::LAST).contains(&byte) {
            // Discriminants are dense, so the range check makes this sound.
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    /// Size in bytes of the operand following this opcode inside a method
    /// body (after loading; SET_LABEL never reaches a loaded body).
    pub fn operand_size(self) -> usize {
        match self {
            OpCode::PushString
            | OpCode::PushInteger
            | OpCode::PushFloat
            | OpCode::PushObject
            | OpCode::AllocVar
            | OpCode::AllocConstVar => 8,
            OpCode::Jump | OpCode::JumpIfTrue | OpCode::JumpIfFalse | OpCode::SetLabel => 2,
            OpCode::CallFunction => 9,
            _ => 0,
        }
    }

    /// Canonical wire-format name, used in loader and VM diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::ErrorSymbol => "ERROR_SYMBOL",
            OpCode::AssemblyBeginDecl => "ASSEMBLY_BEGIN_DECL",
            OpCode::AssemblyEndDecl => "ASSEMBLY_END_DECL",
            OpCode::NamespacePoolDeclSize => "NAMESPACE_POOL_DECL_SIZE",
            OpCode::FriendPoolDeclSize => "FRIEND_POOL_DECL_SIZE",
            OpCode::ClassPoolDeclSize => "CLASS_POOL_DECL_SIZE",
            OpCode::AttributePoolDeclSize => "ATTRIBUTE_POOL_DECL_SIZE",
            OpCode::MethodPoolDeclSize => "METHOD_POOL_DECL_SIZE",
            OpCode::MethodParamsDeclSize => "METHOD_PARAMS_DECL_SIZE",
            OpCode::DependencyPoolDeclSize => "DEPENDENCY_POOL_DECL_SIZE",
            OpCode::MethodBodyBeginDecl => "METHOD_BODY_BEGIN_DECL",
            OpCode::MethodBodyEndDecl => "METHOD_BODY_END_DECL",
            OpCode::StringDecl => "STRING_DECL",
            OpCode::ModifiersDecl => "MODIFIERS_DECL",
            OpCode::PushString => "PUSH_STRING",
            OpCode::PushInteger => "PUSH_INTEGER",
            OpCode::PushFloat => "PUSH_FLOAT",
            OpCode::PushObject => "PUSH_OBJECT",
            OpCode::PushThis => "PUSH_THIS",
            OpCode::PushNull => "PUSH_NULL",
            OpCode::PushTrue => "PUSH_TRUE",
            OpCode::PushFalse => "PUSH_FALSE",
            OpCode::PopToReturn => "POP_TO_RETURN",
            OpCode::AllocVar => "ALLOC_VAR",
            OpCode::AllocConstVar => "ALLOC_CONST_VAR",
            OpCode::NegationOp => "NEGATION_OP",
            OpCode::NegativeOp => "NEGATIVE_OP",
            OpCode::PositiveOp => "POSITIVE_OP",
            OpCode::SumOp => "SUM_OP",
            OpCode::SubOp => "SUB_OP",
            OpCode::MultOp => "MULT_OP",
            OpCode::DivOp => "DIV_OP",
            OpCode::ModOp => "MOD_OP",
            OpCode::PowerOp => "POWER_OP",
            OpCode::AssignOp => "ASSIGN_OP",
            OpCode::GetMember => "GET_MEMBER",
            OpCode::SetAluIncr => "SET_ALU_INCR",
            OpCode::CmpEq => "CMP_EQ",
            OpCode::CmpNeq => "CMP_NEQ",
            OpCode::CmpL => "CMP_L",
            OpCode::CmpG => "CMP_G",
            OpCode::CmpLe => "CMP_LE",
            OpCode::CmpGe => "CMP_GE",
            OpCode::CmpAnd => "CMP_AND",
            OpCode::CmpOr => "CMP_OR",
            OpCode::GetIndex => "GET_INDEX",
            OpCode::CallFunction => "CALL_FUNCTION",
            OpCode::Return => "RETURN",
            OpCode::SetLabel => "SET_LABEL",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfTrue => "JUMP_IF_TRUE",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::PopStackTop => "POP_STACK_TOP",
            OpCode::PushStackFrame => "PUSH_STACKFRAME",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        OpCode::from_byte(byte).ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        for byte in 0u8..=255 {
            if let Some(op) = OpCode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(OpCode::from_byte(OpCode::ErrorSymbol as u8), Some(OpCode::ErrorSymbol));
        assert_eq!(OpCode::from_byte(32), None);
        assert_eq!(OpCode::from_byte(255), None);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OpCode::PushInteger.operand_size(), 8);
        assert_eq!(OpCode::Jump.operand_size(), 2);
        assert_eq!(OpCode::CallFunction.operand_size(), 9);
        assert_eq!(OpCode::SumOp.operand_size(), 0);
    }

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(OpCode::PushString.to_string(), "PUSH_STRING");
        assert_eq!(OpCode::SetAluIncr.to_string(), "SET_ALU_INCR");
    }
}
