use half::f16;
use num_traits::{Float, FromPrimitive, ToPrimitive};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Hash)]
pub enum DType {
    F16,
    #[default]
    F32,
    F64,
}

impl DType {
    /// Returns the size of the type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
        }
    }
}

/// Element types a [crate::Matrix] can hold.
pub trait TensorDType:
    Float
    + FromPrimitive
    + ToPrimitive
    + Default
    + std::fmt::Debug
    + std::fmt::Display
    + Send
    + Sync
    + 'static
{
    fn dt() -> DType;

    fn from_usize_lossy(v: usize) -> Self {
        Self::from_usize(v).unwrap_or_else(Self::infinity)
    }

    fn from_f64_lossy(v: f64) -> Self {
        Self::from_f64(v).unwrap_or_else(Self::nan)
    }

    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

macro_rules! map_type {
    ($t:ty, $v:ident) => {
        impl TensorDType for $t {
            fn dt() -> DType {
                DType::$v
            }
        }
    };
}

map_type!(f32, F32);
map_type!(f64, F64);
map_type!(f16, F16);
