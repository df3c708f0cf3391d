use std::fmt;

/// Device a tensor's storage lives on.
///
/// Kernels only accept tensors that live on the device their runtime drives;
/// `Device` is the identity compared by those residency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,
    /// CUDA GPU with device index
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Device::default(), Device::Cpu);
        assert_eq!(format!("{}", Device::Cpu), "cpu");
        assert_eq!(format!("{}", Device::Cuda(1)), "cuda:1");
    }
}
