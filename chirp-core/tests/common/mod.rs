//! Scripted backend shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chirp_core::{ActionRequest, Backend, BackendError, DiagnosticLog, Gateway, LogRing};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

type Handler = Box<dyn Fn(&ActionRequest) -> Result<Value, BackendError> + Send + Sync>;

/// Backend answering from a closure and recording every request.
pub struct ScriptedBackend {
    handler: Mutex<Handler>,
    calls: Mutex<Vec<ActionRequest>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
}

impl ScriptedBackend {
    pub fn new(
        handler: impl Fn(&ActionRequest) -> Result<Value, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Mutex::new(Box::new(handler)),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            entered: Notify::new(),
        })
    }

    pub fn respond(
        &self,
        handler: impl Fn(&ActionRequest) -> Result<Value, BackendError> + Send + Sync + 'static,
    ) {
        *self.handler.lock() = Box::new(handler);
    }

    pub fn calls(&self) -> Vec<ActionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Park every following call until [`ScriptedBackend::release`].
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// Wait until at least `n` calls have reached the backend.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.entered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, request: &ActionRequest) -> Result<Value, BackendError> {
        self.calls.lock().push(request.clone());
        self.entered.notify_waiters();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        let handler = self.handler.lock();
        (*handler)(request)
    }
}

pub fn gateway(backend: &Arc<ScriptedBackend>) -> (Gateway, Arc<LogRing>) {
    let ring = LogRing::default().shared();
    let log: Arc<dyn DiagnosticLog> = ring.clone();
    (Gateway::new(backend.clone(), log), ring)
}
