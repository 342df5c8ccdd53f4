//! Background server driver (C5, `spec.md` §4.5): runs the sender on a
//! dedicated thread with a cooperative stop signal.

use crate::error::{KbError, Result};
use crate::server::Sender;
use crate::train::Train;
use crate::transport::Socket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

static DRIVER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A handle to a running background driver. Dropping it requests a stop and
/// joins the thread, mirroring a scoped resource release (`spec.md` §5
/// "Cancellation / shutdown").
pub struct ServerHandle {
    stopper_w: Socket,
    stop_sent: AtomicBool,
    queue_tx: Option<crossbeam_channel::Sender<Train>>,
    join: Option<JoinHandle<()>>,
    _ctx: zmq::Context,
}

impl ServerHandle {
    /// Signals the driver to stop after its current send completes. Level-
    /// triggered and idempotent (`spec.md` §5): calling it more than once is
    /// harmless.
    ///
    /// If the driver is queue-fed, the queue is also unblocked (an empty
    /// train is pushed if the queue is currently empty) so a producer
    /// blocked in `feed()` — or the driver itself blocked in a queue
    /// receive — is released (`spec.md` §4.5).
    pub fn stop(&self) -> Result<()> {
        if self.stop_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stopper_w.send(b"x")?;
        if let Some(queue_tx) = &self.queue_tx {
            let _ = queue_tx.try_send(Train::new());
        }
        Ok(())
    }

    /// Stops the driver (if not already stopped) and blocks until its
    /// thread has exited.
    pub fn join(mut self) -> Result<()> {
        self.stop()?;
        if let Some(handle) = self.join.take() {
            handle
                .join()
                .map_err(|_| KbError::TransportClosed)?;
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

fn make_stop_pair(ctx: &zmq::Context) -> Result<(Socket, Socket)> {
    let id = DRIVER_SEQ.fetch_add(1, Ordering::Relaxed);
    let endpoint = format!("inproc://karabo-bridge-driver-stop-{id}");
    let reader = Socket::bind(ctx, zmq::PAIR, &endpoint, 1)?;
    let writer = Socket::connect(ctx, zmq::PAIR, &endpoint, 1)?;
    Ok((reader, writer))
}

/// Runs `{dequeue -> send}` on a dedicated thread, consuming trains `feed()`
/// places on `sender`'s bounded queue (`spec.md` §4.4, §4.5).
pub fn spawn(sender: Arc<Sender>) -> Result<ServerHandle> {
    let ctx = sender.context();
    let (stopper_r, stopper_w) = make_stop_pair(&ctx)?;
    let queue_rx = sender.queue_receiver();
    let queue_tx_for_stop = sender.queue_sender();

    let join = std::thread::Builder::new()
        .name("karabo-bridge-driver".to_string())
        .spawn(move || {
            loop {
                let train = match queue_rx.recv() {
                    Ok(t) => t,
                    Err(_) => break,
                };
                match sender.send(&train, Some(&stopper_r)) {
                    Ok(true) => break,
                    Ok(false) => continue,
                    Err(e) => {
                        log::error!("driver send failed: {e}");
                        break;
                    }
                }
            }
        })
        .map_err(|e| KbError::Configuration(format!("failed to spawn driver thread: {e}")))?;

    Ok(ServerHandle {
        stopper_w,
        stop_sent: AtomicBool::new(false),
        queue_tx: Some(queue_tx_for_stop),
        join: Some(join),
        _ctx: ctx,
    })
}

/// A second variant that runs a lazy, infinite train source inline instead
/// of reading from the feed queue (`spec.md` §4.5, §9 "Coroutine-like
/// producer"). Intended for the synthetic data generator used by tests and
/// demos: the generator is modeled as a pull-based iterator with an
/// idempotent `next`, and the driver is its sole consumer.
pub fn spawn_with_generator<I>(sender: Arc<Sender>, mut generator: I) -> Result<ServerHandle>
where
    I: Iterator<Item = Train> + Send + 'static,
{
    let ctx = sender.context();
    let (stopper_r, stopper_w) = make_stop_pair(&ctx)?;
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_thread = stop_flag.clone();

    let join = std::thread::Builder::new()
        .name("karabo-bridge-generator-driver".to_string())
        .spawn(move || loop {
            if stop_flag_for_thread.load(Ordering::SeqCst) {
                break;
            }
            let train = match generator.next() {
                Some(t) => t,
                None => break,
            };
            match sender.send(&train, Some(&stopper_r)) {
                Ok(true) => break,
                Ok(false) => continue,
                Err(e) => {
                    log::error!("generator driver send failed: {e}");
                    break;
                }
            }
        })
        .map_err(|e| KbError::Configuration(format!("failed to spawn driver thread: {e}")))?;

    Ok(ServerHandle {
        stopper_w,
        stop_sent: AtomicBool::new(false),
        queue_tx: None,
        join: Some(join),
        _ctx: ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtocolVersion;
    use crate::server::ServerOptions;
    use crate::transport::ServerPattern;

    #[test]
    fn stop_is_idempotent_and_joins() {
        let sender = Arc::new(
            Sender::bind(
                "tcp://127.0.0.1:*",
                ServerOptions {
                    pattern: ServerPattern::Push,
                    protocol_version: ProtocolVersion::V2_2,
                    dummy_timestamps: false,
                    queue_len: 4,
                    hwm: 1,
                },
            )
            .unwrap(),
        );
        let handle = spawn(sender).unwrap();
        handle.stop().unwrap();
        handle.stop().unwrap();
        handle.join().unwrap();
    }
}
