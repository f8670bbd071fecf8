//! Scripted in-memory devices for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::Arbiter;
use crate::metrics::MetricsRegistry;
use crate::protocol::{AdapterError, DeviceTransport, StatusReport};
use crate::registry::{Registry, ServiceDescriptor};

#[derive(Debug, Clone)]
pub(crate) struct FakeDevice {
    pub locked: bool,
    pub active: bool,
    pub reachable: bool,
    pub malformed: bool,
    pub reject_lock: bool,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            locked: true,
            active: false,
            reachable: true,
            malformed: false,
            reject_lock: false,
        }
    }
}

impl FakeDevice {
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            ..Self::default()
        }
    }

    pub fn playing() -> Self {
        Self {
            locked: false,
            active: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    devices: Mutex<HashMap<String, FakeDevice>>,
    lock_calls: Mutex<Vec<(String, bool)>>,
}

impl FakeTransport {
    pub fn set(&self, id: &str, f: impl FnOnce(&mut FakeDevice)) {
        let mut devices = self.devices.lock().unwrap();
        f(devices.entry(id.to_string()).or_default());
    }

    pub fn device(&self, id: &str) -> FakeDevice {
        self.devices.lock().unwrap().get(id).cloned().unwrap_or_default()
    }

    pub fn lock_calls(&self) -> Vec<(String, bool)> {
        self.lock_calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.lock_calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn fetch_status(&self, service: &ServiceDescriptor) -> Result<StatusReport, AdapterError> {
        let device = self.device(&service.id);
        if !device.reachable {
            return Err(AdapterError::Transport("connection refused".to_string()));
        }
        if device.malformed {
            return Err(AdapterError::Malformed("expected a JSON object".to_string()));
        }
        Ok(StatusReport {
            locked: Some(device.locked),
            active: Some(device.active),
        })
    }

    async fn set_lock(&self, service: &ServiceDescriptor, locked: bool) -> Result<(), AdapterError> {
        self.lock_calls
            .lock()
            .unwrap()
            .push((service.id.clone(), locked));

        let mut devices = self.devices.lock().unwrap();
        let device = devices.entry(service.id.clone()).or_default();
        if !device.reachable {
            return Err(AdapterError::Transport("connection refused".to_string()));
        }
        if device.reject_lock {
            return Err(AdapterError::Rejected {
                status: 500,
                body: "lock refused".to_string(),
            });
        }
        device.locked = locked;
        if locked {
            device.active = false;
        }
        Ok(())
    }
}

/// Build an arbiter over fake devices `(id, priority, initial device)`.
pub(crate) fn arbiter_with(devices: &[(&str, i32, FakeDevice)]) -> (Arc<Arbiter>, Arc<FakeTransport>) {
    let fake = Arc::new(FakeTransport::default());
    let mut descriptors = Vec::new();
    for (id, priority, device) in devices {
        let device = device.clone();
        fake.set(id, move |d| *d = device);
        descriptors.push(ServiceDescriptor::new(*id, *id, format!("http://{id}.test"), *priority));
    }
    let transport: Arc<dyn DeviceTransport> = fake.clone();
    let arbiter = Arbiter::new(
        Registry::new(descriptors),
        transport,
        MetricsRegistry::new().metrics,
    );
    (Arc::new(arbiter), fake)
}
