/// Capture loop: pcap handle on the monitor interface, frames fed
/// through the decoder into the store.
///
/// Runs on the supervisor's thread and blocks in the kernel read. The
/// short read timeout keeps shutdown prompt: the running flag is
/// re-checked at every read boundary.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pcap::{Capture, Error as PcapError};

use crate::error::SensorError;
use crate::frame;
use crate::store::ObservationStore;

/// Large enough for any management frame plus radiotap header.
pub const SNAPLEN: i32 = 2048;

/// Read timeout; bounds the shutdown latency.
pub const READ_TIMEOUT_MS: i32 = 100;

/// Kernel-side filter. If the driver rejects it the decoder filters
/// instead, at the cost of copying every frame to userspace.
pub const BPF_FILTER: &str = "type mgt and (subtype beacon or subtype probe-req)";

pub struct CaptureLoop {
    interface: String,
    store: Arc<ObservationStore>,
    running: Arc<AtomicBool>,
}

impl CaptureLoop {
    pub fn new(interface: &str, store: Arc<ObservationStore>, running: Arc<AtomicBool>) -> Self {
        Self {
            interface: interface.to_string(),
            store,
            running,
        }
    }

    /// Open the handle and pump frames until shutdown or a read error.
    /// Malformed frames are dropped by the decoder and never kill the
    /// loop.
    pub fn run(&self) -> Result<(), SensorError> {
        let mut capture = Capture::from_device(self.interface.as_str())?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .open()?;

        if let Err(err) = capture.filter(BPF_FILTER, true) {
            log::warn!("BPF filter rejected, filtering in software: {}", err);
        }

        log::info!("capture started on {}", self.interface);
        let mut frames = 0u64;
        let mut observations = 0u64;

        while self.running.load(Ordering::SeqCst) {
            match capture.next_packet() {
                Ok(packet) => {
                    frames += 1;
                    match frame::decode(packet.data) {
                        Some(observation) => {
                            observations += 1;
                            self.store.ingest(observation);
                        }
                        None => log::trace!("dropped undecodable frame"),
                    }
                }
                Err(PcapError::TimeoutExpired) => continue,
                Err(err) => {
                    if self.running.load(Ordering::SeqCst) {
                        log::error!("capture read failed: {}", err);
                        return Err(SensorError::Capture(err));
                    }
                    break;
                }
            }
        }

        log::info!(
            "capture stopped: {} frames, {} observations",
            frames,
            observations
        );
        Ok(())
    }
}
