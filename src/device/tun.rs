use crate::device::Device;
use std::io;

// Tun wraps a real tun device; traffic routed through it is observed, not answered
pub struct Tun {
    device: tun_tap::Iface,
}

impl Tun {
    pub fn new(name: &str) -> io::Result<Self> {
        let device = tun_tap::Iface::without_packet_info(name, tun_tap::Mode::Tun)?;
        Ok(Self { device })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }
}

impl Device for Tun {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.recv(buf)
    }
}
