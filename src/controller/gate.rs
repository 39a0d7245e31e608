//! One-shot readiness signalling between a controller and the runtime.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Creates a connected signal/gate pair.
pub fn ready_gate() -> (ReadySignal, ReadyGate) {
    let (tx, rx) = watch::channel(false);
    (ReadySignal { tx: Arc::new(tx) }, ReadyGate { rx })
}

/// Fired by a controller once it can accept work. Firing twice is harmless.
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadySignal {
    pub fn ready(&self) {
        self.tx.send_replace(true);
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("fired", &*self.tx.borrow())
            .finish()
    }
}

/// Runtime side of a readiness pair.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    rx: watch::Receiver<bool>,
}

/// Every copy of the signal was dropped without firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateAbandoned;

impl fmt::Display for GateAbandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("readiness signal dropped before it was fired")
    }
}

impl std::error::Error for GateAbandoned {}

impl ReadyGate {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) -> Result<(), GateAbandoned> {
        let mut rx = self.rx.clone();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| GateAbandoned)
    }
}
