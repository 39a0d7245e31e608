use anyhow::Error as AnyError;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

/// First fault that brought the runtime down.
pub enum Fault {
    Error(AnyError),
    Panic(Box<dyn Any + Send>),
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Fault::Panic(payload) => f
                .debug_tuple("Panic")
                .field(&panic_message(payload.as_ref()))
                .finish(),
        }
    }
}

/// Records the first fatal fault raised by any runtime task and cancels the
/// run token so every stage winds down.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured: Mutex<Option<Fault>>,
}

impl FatalErrorHandler {
    pub fn new(run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured: Mutex::new(None),
            }),
        }
    }

    pub fn trigger_error(&self, context: &str, error: AnyError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::warn!(context, error = %error, "additional fatal error after shutdown began");
            return;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal runtime error; initiating shutdown"
        );
        self.capture(Fault::Error(error));
    }

    pub fn trigger_panic(&self, context: &str, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::warn!(context, panic = %message, "additional panic after shutdown began");
            return;
        }

        tracing::error!(
            context,
            panic = %message,
            "task panicked; initiating shutdown"
        );
        self.capture(Fault::Panic(payload));
    }

    fn capture(&self, fault: Fault) {
        {
            let mut slot = self.inner.captured.lock().unwrap();
            if slot.is_none() {
                *slot = Some(fault);
            }
        }

        self.inner.run_shutdown.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Takes the captured fault, leaving nothing behind.
    pub fn take_fault(&self) -> Option<Fault> {
        self.inner.captured.lock().unwrap().take()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Chains a panic hook that logs every panic with its location and backtrace.
///
/// The previous hook still runs afterwards. Installing twice is a no-op.
pub fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_default();
            tracing::error!(
                panic = %panic_message(info.payload()),
                location = %location,
                backtrace = %Backtrace::force_capture(),
                "panic"
            );
            previous(info);
        }));
    });
}

#[cfg(test)]
pub(crate) fn panic_hook_installed() -> bool {
    PANIC_HOOK.get().is_some()
}
