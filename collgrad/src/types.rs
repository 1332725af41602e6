/// Rank of a participant in the training run (0-indexed).
pub type Rank = u32;

/// Element types a tensor can carry.
///
/// The set is wider than what any particular engine build supports; the
/// [`CapabilityTable`](crate::collective::CapabilityTable) decides which
/// combinations are accepted for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    U8 = 8,
    U32 = 9,
    U64 = 10,
}

impl DataType {
    /// Every element type, in `repr` order.
    #[cfg(test)]
    pub(crate) const ALL: [DataType; 11] = [
        DataType::F32,
        DataType::F64,
        DataType::F16,
        DataType::BF16,
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::U8,
        DataType::U32,
        DataType::U64,
    ];

    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::F16 | DataType::BF16 | DataType::I16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// True for the floating-point types.
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            DataType::F32 | DataType::F64 | DataType::F16 | DataType::BF16
        )
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
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

/// Where a tensor's buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator memory, by local device ordinal.
    Accelerator(u32),
}

impl Device {
    pub const fn is_cpu(self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Memory space, ignoring the device ordinal.
    pub const fn kind(self) -> DeviceKind {
        match self {
            Device::Cpu => DeviceKind::Host,
            Device::Accelerator(_) => DeviceKind::Accelerator,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(idx) => write!(f, "accel:{idx}"),
        }
    }
}

/// Memory space a tensor category is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Host,
    Accelerator,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Host => f.write_str("host"),
            DeviceKind::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// A concrete element type × memory space combination.
///
/// The engine exposes one submission path per category; the dispatcher
/// resolves the category once and hands it to the engine instead of
/// looking entry points up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorCategory {
    pub dtype: DataType,
    pub device: DeviceKind,
}

impl TensorCategory {
    pub const fn new(dtype: DataType, device: DeviceKind) -> Self {
        Self { dtype, device }
    }
}

impl std::fmt::Display for TensorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device, self.dtype)
    }
}

/// Reduction operations for collective communication.
///
/// `Average` and `Adasum` are meta-ops: the divisor policy may rewrite them
/// into `Sum` plus a divisor before they reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReduceOp {
    /// Element-wise mean across ranks.
    #[default]
    Average,
    /// Element-wise sum across ranks.
    Sum,
    /// Amplitude-adaptive summation.
    Adasum,
    /// Element-wise minimum across ranks.
    Min,
    /// Element-wise maximum across ranks.
    Max,
    /// Element-wise product across ranks.
    Product,
}

impl ReduceOp {
    pub const fn name(self) -> &'static str {
        match self {
            ReduceOp::Average => "average",
            ReduceOp::Sum => "sum",
            ReduceOp::Adasum => "adasum",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Product => "product",
        }
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ReduceOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(ReduceOp::Average),
            "sum" => Ok(ReduceOp::Sum),
            "adasum" => Ok(ReduceOp::Adasum),
            "min" => Ok(ReduceOp::Min),
            "max" => Ok(ReduceOp::Max),
            "product" | "prod" => Ok(ReduceOp::Product),
            other => Err(format!("unknown reduce op '{other}'")),
        }
    }
}

/// Opaque token for one in-flight collective, issued by the engine.
///
/// Valid from submission until exactly one `synchronize` consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
