//! The Opcode Catalogue: static descriptors for every instruction.
//!
//! One-byte opcodes keep their byte value as their index. Opcodes in the
//! `0xFE`-prefixed namespace are folded into the same enum at
//! `0x100 + second byte`, so a single closed [`Opcode`] enum covers both
//! tables. Descriptors are immutable `'static` data; nothing mutates them
//! at runtime.

/// First byte of every two-byte opcode.
pub const PREFIX_BYTE: u8 = 0xFE;

/// Offset added to the second byte of a prefixed opcode to form its index.
pub const PREFIXED_BASE: u16 = 0x100;

/// Number of values an instruction pops or pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackCount {
    /// A count known from the opcode alone.
    Fixed(u8),
    /// Depends on a resolved signature (calls, `ret`).
    Varies,
}

/// Layout of the inline operand that follows the opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Inline {
    None,
    Int8,
    UInt8,
    UInt16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// 32-bit metadata token.
    Token,
    /// Signed 8-bit displacement from the next instruction.
    ShortBranch,
    /// Signed 32-bit displacement from the next instruction.
    Branch,
    /// u32 case count followed by that many 32-bit displacements.
    Switch,
    /// u8 payload length followed by the payload.
    Annotation8,
    /// u32 payload length followed by the payload.
    Annotation32,
}

impl Inline {
    /// Bytes occupied by the fixed part of the operand.
    pub const fn fixed_len(self) -> u8 {
        match self {
            Inline::None => 0,
            Inline::Int8 | Inline::UInt8 | Inline::ShortBranch | Inline::Annotation8 => 1,
            Inline::UInt16 => 2,
            Inline::Int32
            | Inline::Float32
            | Inline::Token
            | Inline::Branch
            | Inline::Switch
            | Inline::Annotation32 => 4,
            Inline::Int64 | Inline::Float64 => 8,
        }
    }

    /// The coarse operand class used by the jump-target prepass.
    pub const fn class(self) -> OperandClass {
        match self {
            Inline::ShortBranch => OperandClass::ShortJump,
            Inline::Branch => OperandClass::LongJump,
            Inline::Switch => OperandClass::Switch,
            Inline::Annotation8 | Inline::Annotation32 => OperandClass::VarAnnotation,
            _ => OperandClass::None,
        }
    }
}

/// Operand-class tag of an instruction descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandClass {
    None,
    ShortJump,
    LongJump,
    Switch,
    VarAnnotation,
    /// Unassigned byte value.
    Invalid,
}

/// Instruction descriptor: one catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Assembly mnemonic.
    pub name: &'static str,
    /// Opcode bytes plus the fixed operand bytes.
    pub size: u8,
    /// Values popped.
    pub pops: StackCount,
    /// Values pushed.
    pub pushes: StackCount,
    /// Inline operand layout.
    pub inline: Inline,
}

impl OpcodeInfo {
    /// The operand-class tag for this descriptor.
    pub const fn class(&self) -> OperandClass {
        self.inline.class()
    }
}

/// Descriptor shared by every unassigned opcode index.
pub static INVALID: OpcodeInfo = OpcodeInfo {
    name: "<invalid>",
    size: 1,
    pops: StackCount::Fixed(0),
    pushes: StackCount::Fixed(0),
    inline: Inline::None,
};

const fn opcode_len(index: u16) -> u8 {
    if index >= PREFIXED_BASE {
        2
    } else {
        1
    }
}

macro_rules! count {
    (var) => {
        StackCount::Varies
    };
    ($n:literal) => {
        StackCount::Fixed($n)
    };
}

macro_rules! opcodes {
    ($( $variant:ident = $index:literal, $name:literal, $pop:tt, $push:tt, $inline:ident; )*) => {
        /// Every instruction in the catalogue.
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $( $variant = $index, )*
        }

        /// All opcodes, in catalogue order.
        pub const ALL_OPCODES: &[Opcode] = &[ $( Opcode::$variant, )* ];

        impl Opcode {
            /// Map a folded index back to its opcode.
            pub const fn from_index(index: u16) -> Option<Opcode> {
                match index {
                    $( $index => Some(Opcode::$variant), )*
                    _ => None,
                }
            }

            /// The catalogue descriptor for this opcode.
            pub fn info(self) -> &'static OpcodeInfo {
                match self {
                    $(
                        Opcode::$variant => {
                            const INFO: OpcodeInfo = OpcodeInfo {
                                name: $name,
                                size: opcode_len($index) + Inline::$inline.fixed_len(),
                                pops: count!($pop),
                                pushes: count!($push),
                                inline: Inline::$inline,
                            };
                            &INFO
                        }
                    )*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x000, "nop", 0, 0, None;
    Break = 0x001, "break", 0, 0, None;
    Ldarg0 = 0x002, "ldarg.0", 0, 1, None;
    Ldarg1 = 0x003, "ldarg.1", 0, 1, None;
    Ldarg2 = 0x004, "ldarg.2", 0, 1, None;
    Ldarg3 = 0x005, "ldarg.3", 0, 1, None;
    Ldloc0 = 0x006, "ldloc.0", 0, 1, None;
    Ldloc1 = 0x007, "ldloc.1", 0, 1, None;
    Ldloc2 = 0x008, "ldloc.2", 0, 1, None;
    Ldloc3 = 0x009, "ldloc.3", 0, 1, None;
    Stloc0 = 0x00A, "stloc.0", 1, 0, None;
    Stloc1 = 0x00B, "stloc.1", 1, 0, None;
    Stloc2 = 0x00C, "stloc.2", 1, 0, None;
    Stloc3 = 0x00D, "stloc.3", 1, 0, None;
    LdargS = 0x00E, "ldarg.s", 0, 1, UInt8;
    LdargaS = 0x00F, "ldarga.s", 0, 1, UInt8;
    StargS = 0x010, "starg.s", 1, 0, UInt8;
    LdlocS = 0x011, "ldloc.s", 0, 1, UInt8;
    LdlocaS = 0x012, "ldloca.s", 0, 1, UInt8;
    StlocS = 0x013, "stloc.s", 1, 0, UInt8;
    Ldnull = 0x014, "ldnull", 0, 1, None;
    LdcI4M1 = 0x015, "ldc.i4.m1", 0, 1, None;
    LdcI40 = 0x016, "ldc.i4.0", 0, 1, None;
    LdcI41 = 0x017, "ldc.i4.1", 0, 1, None;
    LdcI42 = 0x018, "ldc.i4.2", 0, 1, None;
    LdcI43 = 0x019, "ldc.i4.3", 0, 1, None;
    LdcI44 = 0x01A, "ldc.i4.4", 0, 1, None;
    LdcI45 = 0x01B, "ldc.i4.5", 0, 1, None;
    LdcI46 = 0x01C, "ldc.i4.6", 0, 1, None;
    LdcI47 = 0x01D, "ldc.i4.7", 0, 1, None;
    LdcI48 = 0x01E, "ldc.i4.8", 0, 1, None;
    LdcI4S = 0x01F, "ldc.i4.s", 0, 1, Int8;
    LdcI4 = 0x020, "ldc.i4", 0, 1, Int32;
    LdcI8 = 0x021, "ldc.i8", 0, 1, Int64;
    LdcR4 = 0x022, "ldc.r4", 0, 1, Float32;
    LdcR8 = 0x023, "ldc.r8", 0, 1, Float64;
    Dup = 0x025, "dup", 1, 2, None;
    Pop = 0x026, "pop", 1, 0, None;
    Jmp = 0x027, "jmp", 0, 0, Token;
    Call = 0x028, "call", var, var, Token;
    Calli = 0x029, "calli", var, var, Token;
    Ret = 0x02A, "ret", var, 0, None;
    BrS = 0x02B, "br.s", 0, 0, ShortBranch;
    BrfalseS = 0x02C, "brfalse.s", 1, 0, ShortBranch;
    BrtrueS = 0x02D, "brtrue.s", 1, 0, ShortBranch;
    BeqS = 0x02E, "beq.s", 2, 0, ShortBranch;
    BgeS = 0x02F, "bge.s", 2, 0, ShortBranch;
    BgtS = 0x030, "bgt.s", 2, 0, ShortBranch;
    BleS = 0x031, "ble.s", 2, 0, ShortBranch;
    BltS = 0x032, "blt.s", 2, 0, ShortBranch;
    BneUnS = 0x033, "bne.un.s", 2, 0, ShortBranch;
    BgeUnS = 0x034, "bge.un.s", 2, 0, ShortBranch;
    BgtUnS = 0x035, "bgt.un.s", 2, 0, ShortBranch;
    BleUnS = 0x036, "ble.un.s", 2, 0, ShortBranch;
    BltUnS = 0x037, "blt.un.s", 2, 0, ShortBranch;
    Br = 0x038, "br", 0, 0, Branch;
    Brfalse = 0x039, "brfalse", 1, 0, Branch;
    Brtrue = 0x03A, "brtrue", 1, 0, Branch;
    Beq = 0x03B, "beq", 2, 0, Branch;
    Bge = 0x03C, "bge", 2, 0, Branch;
    Bgt = 0x03D, "bgt", 2, 0, Branch;
    Ble = 0x03E, "ble", 2, 0, Branch;
    Blt = 0x03F, "blt", 2, 0, Branch;
    BneUn = 0x040, "bne.un", 2, 0, Branch;
    BgeUn = 0x041, "bge.un", 2, 0, Branch;
    BgtUn = 0x042, "bgt.un", 2, 0, Branch;
    BleUn = 0x043, "ble.un", 2, 0, Branch;
    BltUn = 0x044, "blt.un", 2, 0, Branch;
    Switch = 0x045, "switch", 1, 0, Switch;
    LdindI1 = 0x046, "ldind.i1", 1, 1, None;
    LdindU1 = 0x047, "ldind.u1", 1, 1, None;
    LdindI2 = 0x048, "ldind.i2", 1, 1, None;
    LdindU2 = 0x049, "ldind.u2", 1, 1, None;
    LdindI4 = 0x04A, "ldind.i4", 1, 1, None;
    LdindU4 = 0x04B, "ldind.u4", 1, 1, None;
    LdindI8 = 0x04C, "ldind.i8", 1, 1, None;
    LdindI = 0x04D, "ldind.i", 1, 1, None;
    LdindR4 = 0x04E, "ldind.r4", 1, 1, None;
    LdindR8 = 0x04F, "ldind.r8", 1, 1, None;
    LdindRef = 0x050, "ldind.ref", 1, 1, None;
    StindRef = 0x051, "stind.ref", 2, 0, None;
    StindI1 = 0x052, "stind.i1", 2, 0, None;
    StindI2 = 0x053, "stind.i2", 2, 0, None;
    StindI4 = 0x054, "stind.i4", 2, 0, None;
    StindI8 = 0x055, "stind.i8", 2, 0, None;
    StindR4 = 0x056, "stind.r4", 2, 0, None;
    StindR8 = 0x057, "stind.r8", 2, 0, None;
    Add = 0x058, "add", 2, 1, None;
    Sub = 0x059, "sub", 2, 1, None;
    Mul = 0x05A, "mul", 2, 1, None;
    Div = 0x05B, "div", 2, 1, None;
    DivUn = 0x05C, "div.un", 2, 1, None;
    Rem = 0x05D, "rem", 2, 1, None;
    RemUn = 0x05E, "rem.un", 2, 1, None;
    And = 0x05F, "and", 2, 1, None;
    Or = 0x060, "or", 2, 1, None;
    Xor = 0x061, "xor", 2, 1, None;
    Shl = 0x062, "shl", 2, 1, None;
    Shr = 0x063, "shr", 2, 1, None;
    ShrUn = 0x064, "shr.un", 2, 1, None;
    Neg = 0x065, "neg", 1, 1, None;
    Not = 0x066, "not", 1, 1, None;
    ConvI1 = 0x067, "conv.i1", 1, 1, None;
    ConvI2 = 0x068, "conv.i2", 1, 1, None;
    ConvI4 = 0x069, "conv.i4", 1, 1, None;
    ConvI8 = 0x06A, "conv.i8", 1, 1, None;
    ConvR4 = 0x06B, "conv.r4", 1, 1, None;
    ConvR8 = 0x06C, "conv.r8", 1, 1, None;
    ConvU4 = 0x06D, "conv.u4", 1, 1, None;
    ConvU8 = 0x06E, "conv.u8", 1, 1, None;
    Callvirt = 0x06F, "callvirt", var, var, Token;
    Cpobj = 0x070, "cpobj", 2, 0, Token;
    Ldobj = 0x071, "ldobj", 1, 1, Token;
    Ldstr = 0x072, "ldstr", 0, 1, Token;
    Newobj = 0x073, "newobj", var, 1, Token;
    Castclass = 0x074, "castclass", 1, 1, Token;
    Isinst = 0x075, "isinst", 1, 1, Token;
    ConvRUn = 0x076, "conv.r.un", 1, 1, None;
    Unbox = 0x079, "unbox", 1, 1, Token;
    Throw = 0x07A, "throw", 1, 0, None;
    Ldfld = 0x07B, "ldfld", 1, 1, Token;
    Ldflda = 0x07C, "ldflda", 1, 1, Token;
    Stfld = 0x07D, "stfld", 2, 0, Token;
    Ldsfld = 0x07E, "ldsfld", 0, 1, Token;
    Ldsflda = 0x07F, "ldsflda", 0, 1, Token;
    Stsfld = 0x080, "stsfld", 1, 0, Token;
    Stobj = 0x081, "stobj", 2, 0, Token;
    ConvOvfI1Un = 0x082, "conv.ovf.i1.un", 1, 1, None;
    ConvOvfI2Un = 0x083, "conv.ovf.i2.un", 1, 1, None;
    ConvOvfI4Un = 0x084, "conv.ovf.i4.un", 1, 1, None;
    ConvOvfI8Un = 0x085, "conv.ovf.i8.un", 1, 1, None;
    ConvOvfU1Un = 0x086, "conv.ovf.u1.un", 1, 1, None;
    ConvOvfU2Un = 0x087, "conv.ovf.u2.un", 1, 1, None;
    ConvOvfU4Un = 0x088, "conv.ovf.u4.un", 1, 1, None;
    ConvOvfU8Un = 0x089, "conv.ovf.u8.un", 1, 1, None;
    ConvOvfIUn = 0x08A, "conv.ovf.i.un", 1, 1, None;
    ConvOvfUUn = 0x08B, "conv.ovf.u.un", 1, 1, None;
    Box = 0x08C, "box", 1, 1, Token;
    Newarr = 0x08D, "newarr", 1, 1, Token;
    Ldlen = 0x08E, "ldlen", 1, 1, None;
    Ldelema = 0x08F, "ldelema", 2, 1, Token;
    LdelemI1 = 0x090, "ldelem.i1", 2, 1, None;
    LdelemU1 = 0x091, "ldelem.u1", 2, 1, None;
    LdelemI2 = 0x092, "ldelem.i2", 2, 1, None;
    LdelemU2 = 0x093, "ldelem.u2", 2, 1, None;
    LdelemI4 = 0x094, "ldelem.i4", 2, 1, None;
    LdelemU4 = 0x095, "ldelem.u4", 2, 1, None;
    LdelemI8 = 0x096, "ldelem.i8", 2, 1, None;
    LdelemI = 0x097, "ldelem.i", 2, 1, None;
    LdelemR4 = 0x098, "ldelem.r4", 2, 1, None;
    LdelemR8 = 0x099, "ldelem.r8", 2, 1, None;
    LdelemRef = 0x09A, "ldelem.ref", 2, 1, None;
    StelemI = 0x09B, "stelem.i", 3, 0, None;
    StelemI1 = 0x09C, "stelem.i1", 3, 0, None;
    StelemI2 = 0x09D, "stelem.i2", 3, 0, None;
    StelemI4 = 0x09E, "stelem.i4", 3, 0, None;
    StelemI8 = 0x09F, "stelem.i8", 3, 0, None;
    StelemR4 = 0x0A0, "stelem.r4", 3, 0, None;
    StelemR8 = 0x0A1, "stelem.r8", 3, 0, None;
    StelemRef = 0x0A2, "stelem.ref", 3, 0, None;
    Ldelem = 0x0A3, "ldelem", 2, 1, Token;
    Stelem = 0x0A4, "stelem", 3, 0, Token;
    UnboxAny = 0x0A5, "unbox.any", 1, 1, Token;
    ConvOvfI1 = 0x0B3, "conv.ovf.i1", 1, 1, None;
    ConvOvfU1 = 0x0B4, "conv.ovf.u1", 1, 1, None;
    ConvOvfI2 = 0x0B5, "conv.ovf.i2", 1, 1, None;
    ConvOvfU2 = 0x0B6, "conv.ovf.u2", 1, 1, None;
    ConvOvfI4 = 0x0B7, "conv.ovf.i4", 1, 1, None;
    ConvOvfU4 = 0x0B8, "conv.ovf.u4", 1, 1, None;
    ConvOvfI8 = 0x0B9, "conv.ovf.i8", 1, 1, None;
    ConvOvfU8 = 0x0BA, "conv.ovf.u8", 1, 1, None;
    Refanyval = 0x0C2, "refanyval", 1, 1, Token;
    Ckfinite = 0x0C3, "ckfinite", 1, 1, None;
    Mkrefany = 0x0C6, "mkrefany", 1, 1, Token;
    Ldtoken = 0x0D0, "ldtoken", 0, 1, Token;
    ConvU2 = 0x0D1, "conv.u2", 1, 1, None;
    ConvU1 = 0x0D2, "conv.u1", 1, 1, None;
    ConvI = 0x0D3, "conv.i", 1, 1, None;
    ConvOvfI = 0x0D4, "conv.ovf.i", 1, 1, None;
    ConvOvfU = 0x0D5, "conv.ovf.u", 1, 1, None;
    AddOvf = 0x0D6, "add.ovf", 2, 1, None;
    AddOvfUn = 0x0D7, "add.ovf.un", 2, 1, None;
    MulOvf = 0x0D8, "mul.ovf", 2, 1, None;
    MulOvfUn = 0x0D9, "mul.ovf.un", 2, 1, None;
    SubOvf = 0x0DA, "sub.ovf", 2, 1, None;
    SubOvfUn = 0x0DB, "sub.ovf.un", 2, 1, None;
    Endfinally = 0x0DC, "endfinally", 0, 0, None;
    Leave = 0x0DD, "leave", 0, 0, Branch;
    LeaveS = 0x0DE, "leave.s", 0, 0, ShortBranch;
    StindI = 0x0DF, "stind.i", 2, 0, None;
    ConvU = 0x0E0, "conv.u", 1, 1, None;

    Arglist = 0x100, "arglist", 0, 1, None;
    Ceq = 0x101, "ceq", 2, 1, None;
    Cgt = 0x102, "cgt", 2, 1, None;
    CgtUn = 0x103, "cgt.un", 2, 1, None;
    Clt = 0x104, "clt", 2, 1, None;
    CltUn = 0x105, "clt.un", 2, 1, None;
    Ldftn = 0x106, "ldftn", 0, 1, Token;
    Ldvirtftn = 0x107, "ldvirtftn", 1, 1, Token;
    Ldarg = 0x109, "ldarg", 0, 1, UInt16;
    Ldarga = 0x10A, "ldarga", 0, 1, UInt16;
    Starg = 0x10B, "starg", 1, 0, UInt16;
    Ldloc = 0x10C, "ldloc", 0, 1, UInt16;
    Ldloca = 0x10D, "ldloca", 0, 1, UInt16;
    Stloc = 0x10E, "stloc", 1, 0, UInt16;
    Localloc = 0x10F, "localloc", 1, 1, None;
    Endfilter = 0x111, "endfilter", 1, 0, None;
    Unaligned = 0x112, "unaligned.", 0, 0, UInt8;
    Volatile = 0x113, "volatile.", 0, 0, None;
    Tail = 0x114, "tail.", 0, 0, None;
    Initobj = 0x115, "initobj", 1, 0, Token;
    Constrained = 0x116, "constrained.", 0, 0, Token;
    Cpblk = 0x117, "cpblk", 3, 0, None;
    Initblk = 0x118, "initblk", 3, 0, None;
    No = 0x119, "no.", 0, 0, UInt8;
    Rethrow = 0x11A, "rethrow", 0, 0, None;
    Sizeof = 0x11C, "sizeof", 0, 1, Token;
    Refanytype = 0x11D, "refanytype", 1, 1, None;
    Readonly = 0x11E, "readonly.", 0, 0, None;
    AnnDataS = 0x122, "ann.data.s", 0, 0, Annotation8;
    AnnData = 0x123, "ann.data", 0, 0, Annotation32;
}

/// Look up the descriptor for a folded opcode index.
///
/// Unassigned indices map to [`INVALID`], whose class is
/// [`OperandClass::Invalid`].
pub fn lookup(index: u16) -> &'static OpcodeInfo {
    match Opcode::from_index(index) {
        Some(opcode) => opcode.info(),
        None => &INVALID,
    }
}

/// Look up a descriptor and report the invalid class for unassigned indices.
pub fn operand_class(index: u16) -> OperandClass {
    match Opcode::from_index(index) {
        Some(opcode) => opcode.info().class(),
        None => OperandClass::Invalid,
    }
}

impl Opcode {
    /// Folded index of this opcode.
    pub const fn index(self) -> u16 {
        self as u16
    }

    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(self) -> &'static str {
        self.info().name
    }

    /// Whether this opcode lives in the `0xFE` namespace.
    pub const fn is_prefixed(self) -> bool {
        self.index() >= PREFIXED_BASE
    }

    /// The raw bytes that encode this opcode.
    pub fn encoding(self) -> ([u8; 2], usize) {
        let index = self.index();
        if index >= PREFIXED_BASE {
            ([PREFIX_BYTE, (index - PREFIXED_BASE) as u8], 2)
        } else {
            ([index as u8, 0], 1)
        }
    }

    /// Instruction prefixes modify the instruction that follows them.
    pub const fn is_prefix(self) -> bool {
        matches!(
            self,
            Opcode::Unaligned
                | Opcode::Volatile
                | Opcode::Tail
                | Opcode::Constrained
                | Opcode::No
                | Opcode::Readonly
        )
    }

    /// Annotations carry opaque payload and never reach a coder.
    pub const fn is_annotation(self) -> bool {
        matches!(self, Opcode::AnnDataS | Opcode::AnnData)
    }

    /// Control never falls through to the next instruction.
    pub const fn is_unconditional(self) -> bool {
        matches!(
            self,
            Opcode::Br
                | Opcode::BrS
                | Opcode::Leave
                | Opcode::LeaveS
                | Opcode::Ret
                | Opcode::Throw
                | Opcode::Rethrow
                | Opcode::Jmp
                | Opcode::Endfinally
                | Opcode::Endfilter
        )
    }
}
