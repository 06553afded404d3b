/// Where a matrix's elements live.
///
/// Only host memory is implemented.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    CPU,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::CPU => write!(f, "CPU"),
        }
    }
}
