use super::parser::parse_datagram;
use super::AccessEvent;
use crate::metrics::Metrics;

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use fibre::mpmc;
use fibre::TrySendError;

/// Largest datagram accepted; longer payloads are truncated by the socket.
const MAX_DATAGRAM: usize = 64 * 1024;

/// How often a blocked read wakes to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The single receive loop: reads datagrams, parses them and enqueues the
/// resulting events without ever blocking on the queue.
pub(crate) struct Receiver {
  handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl Receiver {
  pub(crate) fn spawn(
    socket: UdpSocket,
    queue: mpmc::Sender<AccessEvent>,
    file_key: String,
    metrics: Arc<Metrics>,
  ) -> std::io::Result<Self> {
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let handle = thread::Builder::new()
      .name("dynplace-receiver".to_string())
      .spawn(move || Self::run(socket, queue, &file_key, &metrics, &stop_clone))?;

    Ok(Self { handle, stop_flag })
  }

  fn run(
    socket: UdpSocket,
    queue: mpmc::Sender<AccessEvent>,
    file_key: &str,
    metrics: &Metrics,
    stop: &AtomicBool,
  ) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
      let len = match socket.recv_from(&mut buf) {
        Ok((len, _peer)) => len,
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
        Err(err) => {
          tracing::warn!(%err, "datagram read failed");
          continue;
        }
      };
      Metrics::incr(&metrics.datagrams_received);

      let event = match parse_datagram(&buf[..len], file_key, Utc::now()) {
        Ok(event) => event,
        Err(err) => {
          Metrics::incr(&metrics.parse_errors);
          tracing::trace!(%err, "dropping datagram");
          continue;
        }
      };

      match queue.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
          Metrics::incr(&metrics.queue_full_drops);
          tracing::debug!(file = %event.file, "queue full; dropping access event");
        }
        Err(_) => break,
      }
    }
    tracing::debug!("receiver stopped");
    // Dropping `queue` here lets the workers drain and exit.
  }

  /// Signals the loop to stop and waits for it. Returns once the queue
  /// sender held by the loop has been dropped.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Relaxed);
    if self.handle.join().is_err() {
      tracing::error!("receiver thread panicked");
    }
  }
}
