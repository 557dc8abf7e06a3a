mod tun;

pub use self::tun::Tun;

// Mock device for testing
#[cfg(test)]
pub mod mock;
#[cfg(test)]
pub use self::mock::MockDevice;

/// A packet source the capture loop reads raw IPv4 frames from
pub trait Device: Send {
    /// Receive a packet from the device
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;
}
