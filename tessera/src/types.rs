use crate::error::Result;

/// Rank of a participant in a process group (0-indexed).
pub type Rank = u32;

/// Element types supported by the reduction kernels and collectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I8 = 4,
    I32 = 5,
    I64 = 6,
    U8 = 7,
    U32 = 8,
    U64 = 9,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature of a user-defined reduction: `dst[i] = f(dst[i], src[i])` for
/// `count` elements of `dtype`. `dst` is the left operand.
pub type UserOpFn = fn(dst: &mut [u8], src: &[u8], count: usize, dtype: DataType) -> Result<()>;

/// A user-defined reduction operator.
///
/// Identity is the `(name, commutative)` pair: two operators with the same
/// name are assumed to compute the same function.
#[derive(Clone, Copy)]
pub struct UserOp {
    name: &'static str,
    func: UserOpFn,
    commutative: bool,
}

impl UserOp {
    pub const fn new(name: &'static str, func: UserOpFn, commutative: bool) -> Self {
        Self {
            name,
            func,
            commutative,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_commutative(&self) -> bool {
        self.commutative
    }

    pub(crate) fn apply(
        &self,
        dst: &mut [u8],
        src: &[u8],
        count: usize,
        dtype: DataType,
    ) -> Result<()> {
        (self.func)(dst, src, count, dtype)
    }
}

impl PartialEq for UserOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.commutative == other.commutative
    }
}

impl Eq for UserOp {}

impl std::hash::Hash for UserOp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.commutative.hash(state);
    }
}

impl std::fmt::Debug for UserOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserOp")
            .field("name", &self.name)
            .field("commutative", &self.commutative)
            .finish()
    }
}

/// Reduction operations for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Element-wise sum across ranks.
    Sum,
    /// Element-wise product across ranks.
    Prod,
    /// Element-wise minimum across ranks.
    Min,
    /// Element-wise maximum across ranks.
    Max,
    /// User-supplied operator; may be non-commutative.
    Custom(UserOp),
}

impl ReduceOp {
    /// Whether operands may be combined in any order.
    pub fn is_commutative(&self) -> bool {
        match self {
            ReduceOp::Sum | ReduceOp::Prod | ReduceOp::Min | ReduceOp::Max => true,
            ReduceOp::Custom(user) => user.is_commutative(),
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
            ReduceOp::Custom(user) => write!(f, "custom:{}", user.name()),
        }
    }
}

/// Source of a collective's input.
///
/// `InPlace` means the input is read from the receive buffer, which is then
/// overwritten with the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBuf {
    InPlace,
    Ptr(u64),
}

impl SendBuf {
    /// The pointer the input is read from.
    pub fn resolve(self, rbuf: u64) -> u64 {
        match self {
            SendBuf::InPlace => rbuf,
            SendBuf::Ptr(p) => p,
        }
    }

    /// Shift a separate send pointer by `bytes`; `InPlace` is unchanged.
    pub fn offset(self, bytes: usize) -> Self {
        match self {
            SendBuf::InPlace => SendBuf::InPlace,
            SendBuf::Ptr(p) => SendBuf::Ptr(p + bytes as u64),
        }
    }
}
