//! Programmatic construction of IR functions.
//!
//! ```
//! use cerulean_compiler::ir::{BinOp, FunctionBuilder, Type};
//!
//! let mut b = FunctionBuilder::new("double").returns(Type::I64);
//! let x = b.param(Type::I64);
//! let y = b.binary(BinOp::Add, x, x);
//! b.ret(Some(y));
//! let f = b.finish();
//! assert_eq!(f.blocks.len(), 1);
//! ```

use super::ir::{BinOp, Block, CmpOp, Function, Instr, Param, Type, UnOp, ValueId};

pub struct FunctionBuilder {
    func: Function,
    current: usize,
}

impl FunctionBuilder {
    /// Starts with an empty block labelled `entry`.
    pub fn new(name: &str) -> Self {
        Self {
            func: Function {
                name: name.to_string(),
                params: Vec::new(),
                ret: None,
                blocks: vec![Block {
                    label: "entry".to_string(),
                    instrs: Vec::new(),
                }],
                locals: Vec::new(),
                value_count: 0,
            },
            current: 0,
        }
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.func.ret = Some(ty);
        self
    }

    pub fn new_value(&mut self) -> ValueId {
        let v = ValueId(self.func.value_count);
        self.func.value_count += 1;
        v
    }

    pub fn param(&mut self, ty: Type) -> ValueId {
        let value = self.new_value();
        self.func.params.push(Param { value, ty });
        value
    }

    /// Declare a stack slot and return its index.
    pub fn local(&mut self, ty: Type) -> u32 {
        self.func.locals.push(ty);
        (self.func.locals.len() - 1) as u32
    }

    /// Start a new block and make it current. Blocks are laid out in the
    /// order they are created.
    pub fn block(&mut self, label: &str) {
        self.func.blocks.push(Block {
            label: label.to_string(),
            instrs: Vec::new(),
        });
        self.current = self.func.blocks.len() - 1;
    }

    pub fn push(&mut self, instr: Instr) {
        self.func.blocks[self.current].instrs.push(instr);
    }

    pub fn iconst(&mut self, ty: Type, value: i64) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Const { dst, ty, value });
        dst
    }

    pub fn fconst(&mut self, value: f64) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Const {
            dst,
            ty: Type::F64,
            value: value.to_bits() as i64,
        });
        dst
    }

    /// Redefine `dst` as a copy of `src`.
    pub fn copy_to(&mut self, dst: ValueId, src: ValueId) {
        self.push(Instr::Copy { dst, src });
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dst = self.new_value();
        self.binary_into(dst, op, lhs, rhs);
        dst
    }

    pub fn binary_into(&mut self, dst: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId) {
        self.push(Instr::Binary { dst, op, lhs, rhs });
    }

    pub fn unary(&mut self, op: UnOp, src: ValueId) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Unary { dst, op, src });
        dst
    }

    pub fn cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Cmp { dst, op, lhs, rhs });
        dst
    }

    pub fn local_addr(&mut self, slot: u32) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::LocalAddr { dst, slot });
        dst
    }

    pub fn global_addr(&mut self, name: &str) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::GlobalAddr {
            dst,
            name: name.to_string(),
        });
        dst
    }

    pub fn load(&mut self, ty: Type, addr: ValueId) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Load { dst, ty, addr });
        dst
    }

    pub fn store(&mut self, ty: Type, addr: ValueId, src: ValueId) {
        self.push(Instr::Store { ty, addr, src });
    }

    /// `&local` immediately followed by the load, so the pair can fuse.
    pub fn load_local(&mut self, slot: u32) -> ValueId {
        let ty = self.func.locals[slot as usize];
        let addr = self.local_addr(slot);
        self.load(ty, addr)
    }

    pub fn store_local(&mut self, slot: u32, src: ValueId) {
        let ty = self.func.locals[slot as usize];
        let addr = self.local_addr(slot);
        self.store(ty, addr, src);
    }

    pub fn call(&mut self, func: &str, args: &[ValueId]) -> ValueId {
        let dst = self.new_value();
        self.push(Instr::Call {
            dst: Some(dst),
            func: func.to_string(),
            args: args.to_vec(),
        });
        dst
    }

    pub fn call_void(&mut self, func: &str, args: &[ValueId]) {
        self.push(Instr::Call {
            dst: None,
            func: func.to_string(),
            args: args.to_vec(),
        });
    }

    pub fn jump(&mut self, target: &str) {
        self.push(Instr::Jump {
            target: target.to_string(),
        });
    }

    pub fn branch(&mut self, cond: ValueId, then_label: &str, else_label: &str) {
        self.push(Instr::Branch {
            cond,
            then_label: then_label.to_string(),
            else_label: else_label.to_string(),
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.push(Instr::Return { value });
    }

    pub fn halt(&mut self) {
        self.push(Instr::Halt);
    }

    pub fn finish(self) -> Function {
        self.func
    }
}
