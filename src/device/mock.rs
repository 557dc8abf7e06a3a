use crate::device::Device;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockDevice {
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_packet(&self, desc: &str, packet: Vec<u8>) {
        tracing::trace!("INJECT: {} ({} bytes)", desc, packet.len());
        self.rx_queue.lock().unwrap().push_back(packet);
    }

    pub fn pending(&self) -> usize {
        self.rx_queue.lock().unwrap().len()
    }
}

impl Device for MockDevice {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.rx_queue.lock().unwrap();
        match queue.pop_front() {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}
