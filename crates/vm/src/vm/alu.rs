//! The arithmetic-logic unit: type dispatch for every operator opcode.
//!
//! The ALU pops one or two operands, resolves names to assignable cells,
//! enforces const semantics on assignment, and either computes a primitive
//! result or delegates to the operand's user-defined operator method.

use super::VirtualMachine;
use crate::big_int::MslInt;
use crate::error::ErrorFlags;
use crate::object::{LocalSlot, ObjectRef, TypeTag};
use crate::op_code::OpCode;

/// Operator-method name for a class-object left operand.
fn operator_method(op: OpCode) -> Option<&'static str> {
    Some(match op {
        OpCode::SumOp => "SumOperator_2",
        OpCode::SubOp => "SubOperator_2",
        OpCode::MultOp => "MultOperator_2",
        OpCode::DivOp => "DivOperator_2",
        OpCode::ModOp => "ModOperator_2",
        OpCode::PowerOp => "PowerOperator_2",
        OpCode::CmpEq => "IsEqual_2",
        OpCode::CmpNeq => "IsNotEqual_2",
        OpCode::CmpL => "IsLess_2",
        OpCode::CmpG => "IsGreater_2",
        OpCode::CmpLe => "IsLessEqual_2",
        OpCode::CmpGe => "IsGreaterEqual_2",
        OpCode::CmpAnd => "AndOperator_2",
        OpCode::CmpOr => "OrOperator_2",
        OpCode::NegationOp => "NegationOperator_1",
        OpCode::NegativeOp => "NegOperator_2",
        OpCode::PositiveOp => "PosOperator_2",
        _ => return None,
    })
}

impl VirtualMachine {
    /// Entry point for every operator opcode. `operands` is 1 or 2.
    pub(crate) fn perform_alu_call(&mut self, op: OpCode, operands: usize) {
        if self.object_stack.len() < operands {
            self.raise(
                ErrorFlags::OBJECTSTACK_EMPTY,
                "object stack was empty on VM ALU call",
            );
            self.note_current_frame();
            return;
        }
        if self.call_stack.is_empty() {
            self.raise(ErrorFlags::CALLSTACK_EMPTY, "ALU call without an active frame");
            return;
        }
        let frame_index = self.call_stack.len() - 1;

        // Right operand resolves to a plain value.
        let mut value: Option<ObjectRef> = None;
        if operands == 2 {
            let popped = self.object_stack.pop().expect("stack checked above");
            let Some(resolved) = self.resolve_if_unknown(popped, frame_index, true) else {
                return;
            };
            let Some(resolved) = self.underlying(resolved) else {
                self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
                return;
            };
            value = Some(resolved);
        }

        // Left operand keeps its cell identity: a name naming a frame local
        // becomes a fresh local reference so assignment can reach the slot.
        let popped = self.object_stack.pop().expect("stack checked above");
        let object = if popped.tag == TypeTag::Unknown {
            let Some(name) = self.gc.unknown(popped).map(|u| u.name.clone()) else {
                self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
                return;
            };
            if self.call_stack[frame_index].locals.contains_key(&name) {
                let frame_id = self.call_stack[frame_index].id;
                self.gc.alloc_local(name, LocalSlot::Frame { frame: frame_id })
            } else {
                match self.search_for_object(&name, frame_index, true) {
                    Some(found) => found,
                    None => return,
                }
            }
        } else {
            popped
        };

        match object.tag {
            TypeTag::Local | TypeTag::Attribute => {}
            TypeTag::Integer
            | TypeTag::String
            | TypeTag::Float
            | TypeTag::Class
            | TypeTag::True
            | TypeTag::False => {
                if op == OpCode::AssignOp {
                    self.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "primitive types are not assignable, but ALU received primitive",
                    );
                    self.note_current_frame();
                    return;
                }
            }
            other => {
                let text = format!("trying to perform operation with invalid object: {other}");
                self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                self.note_current_frame();
                return;
            }
        }

        if op == OpCode::AssignOp {
            let value = value.expect("assignment always takes two operands");
            if self.assign_to_cell(object, value) {
                self.object_stack.push(object);
            }
            return;
        }

        // Increment mode re-assigns the result to the cell afterwards; the
        // cell goes under the upcoming result.
        if self.alu_increment {
            self.object_stack.push(object);
        }

        let Some(current) = self.underlying(object) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
            return;
        };
        self.alu_dispatch(current, value, op, operands);

        if self.alu_increment {
            self.alu_increment = false;
            if self.errors.is_empty() {
                self.perform_alu_call(OpCode::AssignOp, 2);
            }
        }
    }

    /// Rebinds the cell behind a local or attribute reference. Const cells
    /// holding a non-Null value reject the write.
    pub(crate) fn assign_to_cell(&mut self, cell: ObjectRef, value: ObjectRef) -> bool {
        match cell.tag {
            TypeTag::Local => {
                let Some((slot, name)) = self
                    .gc
                    .local(cell)
                    .map(|local| (local.slot.clone(), local.name.clone()))
                else {
                    self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid assignment target");
                    return false;
                };
                match slot {
                    LocalSlot::Frame { frame } => {
                        let violation = {
                            let Some(frame) =
                                self.call_stack.iter_mut().rev().find(|f| f.id == frame)
                            else {
                                self.raise(
                                    ErrorFlags::OBJECT_NOT_FOUND,
                                    format!("local variable `{name}` outlived its frame"),
                                );
                                return false;
                            };
                            let Some(local) = frame.locals.get_mut(&name) else {
                                self.raise(
                                    ErrorFlags::OBJECT_NOT_FOUND,
                                    format!("local variable `{name}` was not found"),
                                );
                                return false;
                            };
                            if local.is_const && !local.value.is_null() {
                                true
                            } else {
                                local.value = value;
                                false
                            }
                        };
                        if violation {
                            self.raise(
                                ErrorFlags::CONST_MEMBER_MODIFICATION,
                                format!("trying to modify const local variable: {name}"),
                            );
                            self.note_current_frame();
                            return false;
                        }
                        true
                    }
                    LocalSlot::ArrayElem { array, index } => {
                        let violation = {
                            let Some(object) = self.gc.array_mut(array) else {
                                self.raise(
                                    ErrorFlags::INVALID_STACKOBJECT,
                                    "array element reference outlived its array",
                                );
                                return false;
                            };
                            let Some(element) = object.elements.get_mut(index) else {
                                self.raise(
                                    ErrorFlags::INVALID_CALL_ARGUMENT,
                                    format!("array element index {index} is out of range"),
                                );
                                return false;
                            };
                            if element.is_const && !element.value.is_null() {
                                true
                            } else {
                                element.value = value;
                                false
                            }
                        };
                        if violation {
                            self.raise(
                                ErrorFlags::CONST_MEMBER_MODIFICATION,
                                format!("trying to modify const array element: {name}"),
                            );
                            return false;
                        }
                        true
                    }
                }
            }
            TypeTag::Attribute => {
                let Some((is_const, is_null, name)) = self
                    .gc
                    .attribute(cell)
                    .map(|attr| (attr.is_const(), attr.value.is_null(), attr.name.clone()))
                else {
                    self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid assignment target");
                    return false;
                };
                if is_const && !is_null {
                    self.raise(
                        ErrorFlags::CONST_MEMBER_MODIFICATION,
                        format!("trying to modify const class attribute: {name}"),
                    );
                    self.note_current_frame();
                    return false;
                }
                self.gc
                    .attribute_mut(cell)
                    .expect("attribute checked above")
                    .value = value;
                true
            }
            _ => {
                self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid assignment target");
                false
            }
        }
    }

    /// Dispatch on the left operand's current value.
    fn alu_dispatch(
        &mut self,
        current: ObjectRef,
        value: Option<ObjectRef>,
        op: OpCode,
        operands: usize,
    ) {
        match current.tag {
            TypeTag::ClassObject => {
                self.object_stack.push(current);
                if let Some(value) = value {
                    self.object_stack.push(value);
                }
                self.alu_class_object(current, op);
            }
            TypeTag::Integer => self.alu_integer_left(current, value, op, operands),
            TypeTag::String => self.alu_string_left(current, value, op, operands),
            TypeTag::Float => self.alu_float_left(current, value, op, operands),
            TypeTag::Class => self.alu_class_left(current, value, op, operands),
            TypeTag::True | TypeTag::False => {
                if self.alu_increment {
                    self.raise(
                        ErrorFlags::INVALID_OPCODE,
                        "ALU increment mode cannot be used with bool primitives",
                    );
                    self.note_current_frame();
                    return;
                }
                let left = current.tag == TypeTag::True;
                let right = value.map(|v| v.tag == TypeTag::True).unwrap_or(false);
                self.alu_booleans(left, right, op);
            }
            other => {
                let text = format!("unexpected object type found in ALU call: {other}");
                self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                self.note_current_frame();
            }
        }
    }

    fn alu_class_object(&mut self, object: ObjectRef, op: OpCode) {
        match operator_method(op) {
            Some(method) => self.invoke_object_method(method, object),
            None => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid opcode was passed to VM ALU: {op}"),
                );
                self.note_current_frame();
            }
        }
    }

    fn alu_integer_left(
        &mut self,
        current: ObjectRef,
        value: Option<ObjectRef>,
        op: OpCode,
        operands: usize,
    ) {
        // Copy the left value out first: a conversion call below may collect,
        // and the popped operand is no longer rooted on the object stack.
        let Some(lhs) = self.gc.integer(current).map(|object| object.value.clone()) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
            return;
        };
        let mut rhs: Option<MslInt> = None;
        if operands == 2 {
            let mut value = value.expect("binary op carries a value");
            if value.tag == TypeTag::ClassObject {
                self.object_stack.push(value);
                self.invoke_object_method("ToInteger_1", value);
                if !self.errors.is_empty() {
                    return;
                }
                let Some(converted) = self.pop_stack() else { return };
                if converted.tag != TypeTag::Integer {
                    self.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "cannot convert class object to integer",
                    );
                    self.note_current_frame();
                    return;
                }
                value = converted;
            }
            match value.tag {
                TypeTag::Integer => {
                    rhs = self.gc.integer(value).map(|object| object.value.clone());
                }
                TypeTag::Float => {
                    // Integer meets float: promote the left side.
                    let right = self.gc.float(value).map(|o| o.value);
                    self.alu_floats(lhs.to_f64(), right, op);
                    return;
                }
                _ => {
                    self.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "cannot convert object passed to ALU to integer",
                    );
                    self.note_current_frame();
                    return;
                }
            }
        }
        self.alu_integers(lhs, rhs, op);
    }

    fn alu_integers(&mut self, lhs: MslInt, rhs: Option<MslInt>, op: OpCode) {
        match op {
            OpCode::NegationOp => {
                self.object_stack.push(ObjectRef::bool(lhs.is_zero()));
                return;
            }
            OpCode::NegativeOp => {
                let result = self.gc.alloc_integer(-&lhs);
                self.object_stack.push(result);
                return;
            }
            OpCode::PositiveOp => {
                let result = self.gc.alloc_integer(lhs);
                self.object_stack.push(result);
                return;
            }
            _ => {}
        }
        let Some(rhs) = rhs else {
            self.raise(
                ErrorFlags::INVALID_OPCODE,
                format!("invalid operation with two integers: {op}"),
            );
            self.note_current_frame();
            return;
        };
        let result = match op {
            OpCode::SumOp => &lhs + &rhs,
            OpCode::SubOp => &lhs - &rhs,
            OpCode::MultOp => &lhs * &rhs,
            OpCode::DivOp => &lhs / &rhs,
            OpCode::ModOp => &lhs % &rhs,
            OpCode::PowerOp => lhs.pow(&rhs),
            OpCode::CmpEq
            | OpCode::CmpNeq
            | OpCode::CmpL
            | OpCode::CmpG
            | OpCode::CmpLe
            | OpCode::CmpGe => {
                let outcome = match op {
                    OpCode::CmpEq => lhs == rhs,
                    OpCode::CmpNeq => lhs != rhs,
                    OpCode::CmpL => lhs < rhs,
                    OpCode::CmpG => lhs > rhs,
                    OpCode::CmpLe => lhs <= rhs,
                    _ => lhs >= rhs,
                };
                self.object_stack.push(ObjectRef::bool(outcome));
                return;
            }
            _ => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid operation with two integers: {op}"),
                );
                self.note_current_frame();
                return;
            }
        };
        let result = self.gc.alloc_integer(result);
        self.object_stack.push(result);
    }

    fn alu_float_left(
        &mut self,
        current: ObjectRef,
        value: Option<ObjectRef>,
        op: OpCode,
        operands: usize,
    ) {
        // As with integers, the left value is read before any conversion can
        // trigger a collection.
        let Some(lhs) = self.gc.float(current).map(|object| object.value) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
            return;
        };
        let mut rhs: Option<f64> = None;
        if operands == 2 {
            let mut value = value.expect("binary op carries a value");
            if value.tag == TypeTag::ClassObject {
                self.object_stack.push(value);
                self.invoke_object_method("ToFloat_1", value);
                if !self.errors.is_empty() {
                    return;
                }
                let Some(converted) = self.pop_stack() else { return };
                if converted.tag != TypeTag::Float {
                    self.raise(
                        ErrorFlags::INVALID_METHOD_CALL,
                        "cannot convert class object to float",
                    );
                    self.note_current_frame();
                    return;
                }
                value = converted;
            }
            match value.tag {
                TypeTag::Float => rhs = self.gc.float(value).map(|object| object.value),
                TypeTag::Integer => {
                    rhs = self.gc.integer(value).map(|object| object.value.to_f64());
                }
                _ => {
                    self.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "cannot convert object passed to ALU to float",
                    );
                    self.note_current_frame();
                    return;
                }
            }
        }
        self.alu_floats(lhs, rhs, op);
    }

    fn alu_floats(&mut self, lhs: f64, rhs: Option<f64>, op: OpCode) {
        match op {
            OpCode::NegativeOp => {
                let result = self.gc.alloc_float(-lhs);
                self.object_stack.push(result);
                return;
            }
            OpCode::PositiveOp => {
                let result = self.gc.alloc_float(lhs);
                self.object_stack.push(result);
                return;
            }
            _ => {}
        }
        let Some(rhs) = rhs else {
            self.raise(
                ErrorFlags::INVALID_OPCODE,
                format!("invalid operation with two floats: {op}"),
            );
            self.note_current_frame();
            return;
        };
        let result = match op {
            OpCode::SumOp => lhs + rhs,
            OpCode::SubOp => lhs - rhs,
            OpCode::MultOp => lhs * rhs,
            OpCode::DivOp => lhs / rhs,
            OpCode::PowerOp => lhs.powf(rhs),
            OpCode::CmpEq
            | OpCode::CmpNeq
            | OpCode::CmpL
            | OpCode::CmpG
            | OpCode::CmpLe
            | OpCode::CmpGe => {
                let outcome = match op {
                    OpCode::CmpEq => lhs == rhs,
                    OpCode::CmpNeq => lhs != rhs,
                    OpCode::CmpL => lhs < rhs,
                    OpCode::CmpG => lhs > rhs,
                    OpCode::CmpLe => lhs <= rhs,
                    _ => lhs >= rhs,
                };
                self.object_stack.push(ObjectRef::bool(outcome));
                return;
            }
            _ => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid operation with two floats: {op}"),
                );
                self.note_current_frame();
                return;
            }
        };
        let result = self.gc.alloc_float(result);
        self.object_stack.push(result);
    }

    fn alu_string_left(
        &mut self,
        current: ObjectRef,
        value: Option<ObjectRef>,
        op: OpCode,
        operands: usize,
    ) {
        let Some(lhs) = self.gc.string(current).map(|object| object.value.clone()) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
            return;
        };
        let mut rhs: Option<String> = None;
        if operands == 2 {
            let mut value = value.expect("binary op carries a value");
            if value.tag == TypeTag::ClassObject {
                self.object_stack.push(value);
                self.invoke_object_method("ToString_1", value);
                if !self.errors.is_empty() {
                    return;
                }
                let Some(converted) = self.pop_stack() else { return };
                if converted.tag != TypeTag::String {
                    self.raise(
                        ErrorFlags::INVALID_STACKOBJECT,
                        "cannot convert class object to string",
                    );
                    self.note_current_frame();
                    return;
                }
                value = converted;
            }
            match value.tag {
                TypeTag::String => {
                    rhs = self.gc.string(value).map(|object| object.value.clone());
                }
                TypeTag::Integer => {
                    let Some(integer) = self.gc.integer(value).map(|o| o.value.clone()) else {
                        self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
                        return;
                    };
                    self.alu_string_integer(&lhs, integer, op);
                    return;
                }
                TypeTag::Float => {
                    rhs = self.gc.float(value).map(|object| object.to_text());
                }
                TypeTag::True => rhs = Some("true".to_string()),
                TypeTag::False => rhs = Some("false".to_string()),
                TypeTag::Null => rhs = Some("null".to_string()),
                _ => {
                    let text = format!(
                        "cannot convert object passed to ALU to string: {}",
                        self.gc.to_text(value, &self.assembly)
                    );
                    self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                    self.note_current_frame();
                    return;
                }
            }
        }
        self.alu_strings(lhs, rhs, op);
    }

    fn alu_strings(&mut self, lhs: String, rhs: Option<String>, op: OpCode) {
        let Some(rhs) = rhs else {
            self.raise(
                ErrorFlags::INVALID_OPCODE,
                format!("invalid operation with two strings: {op}"),
            );
            self.note_current_frame();
            return;
        };
        match op {
            OpCode::SumOp => {
                let result = self.gc.alloc_string(format!("{lhs}{rhs}"));
                self.object_stack.push(result);
            }
            OpCode::CmpEq
            | OpCode::CmpNeq
            | OpCode::CmpL
            | OpCode::CmpG
            | OpCode::CmpLe
            | OpCode::CmpGe => {
                let outcome = match op {
                    OpCode::CmpEq => lhs == rhs,
                    OpCode::CmpNeq => lhs != rhs,
                    OpCode::CmpL => lhs < rhs,
                    OpCode::CmpG => lhs > rhs,
                    OpCode::CmpLe => lhs <= rhs,
                    _ => lhs >= rhs,
                };
                self.object_stack.push(ObjectRef::bool(outcome));
            }
            _ => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid operation with two strings: {op}"),
                );
                self.note_current_frame();
            }
        }
    }

    fn alu_string_integer(&mut self, lhs: &str, rhs: MslInt, op: OpCode) {
        match op {
            OpCode::MultOp => {
                let repeated = if rhs.is_negative() {
                    String::new()
                } else {
                    match rhs.to_usize() {
                        Some(count) => lhs.repeat(count),
                        None => {
                            self.raise(
                                ErrorFlags::INVALID_CALL_ARGUMENT,
                                format!("cannot repeat string {rhs} times"),
                            );
                            return;
                        }
                    }
                };
                let result = self.gc.alloc_string(repeated);
                self.object_stack.push(result);
            }
            OpCode::SumOp => {
                let result = self.gc.alloc_string(format!("{lhs}{rhs}"));
                self.object_stack.push(result);
            }
            _ => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid operation with string and integer: {op}"),
                );
                self.note_current_frame();
            }
        }
    }

    fn alu_class_left(
        &mut self,
        current: ObjectRef,
        value: Option<ObjectRef>,
        op: OpCode,
        operands: usize,
    ) {
        let Some(lhs) = self.gc.class_wrapper(current).map(|wrapper| wrapper.class) else {
            self.raise(ErrorFlags::INVALID_STACKOBJECT, "invalid ALU operand");
            return;
        };
        let mut rhs = None;
        if operands == 2 {
            let value = value.expect("binary op carries a value");
            match self.gc.class_wrapper(value).map(|wrapper| wrapper.class) {
                Some(class) => rhs = Some(class),
                None => {
                    let text = format!(
                        "class type expected as ALU operand, found: {}",
                        self.gc.to_text(value, &self.assembly)
                    );
                    self.raise(ErrorFlags::INVALID_STACKOBJECT, text);
                    self.note_current_frame();
                    return;
                }
            }
        }
        match op {
            OpCode::CmpEq | OpCode::CmpNeq => {
                let rhs = rhs.expect("comparison carries a value");
                // Identity is (namespace, name) equality.
                let same = self.assembly.full_class_name(lhs) == self.assembly.full_class_name(rhs);
                let outcome = if op == OpCode::CmpEq { same } else { !same };
                self.object_stack.push(ObjectRef::bool(outcome));
            }
            _ => {
                self.object_stack.push(current);
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid operation with two class types: {op}"),
                );
                self.note_current_frame();
            }
        }
    }

    fn alu_booleans(&mut self, lhs: bool, rhs: bool, op: OpCode) {
        let outcome = match op {
            OpCode::NegationOp => !lhs,
            OpCode::CmpEq => lhs == rhs,
            OpCode::CmpNeq => lhs != rhs,
            OpCode::CmpAnd => lhs && rhs,
            OpCode::CmpOr => lhs || rhs,
            _ => {
                self.raise(
                    ErrorFlags::INVALID_OPCODE,
                    format!("invalid opcode was passed to VM ALU: {op}"),
                );
                self.note_current_frame();
                return;
            }
        };
        self.object_stack.push(ObjectRef::bool(outcome));
    }
}
