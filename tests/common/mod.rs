//! Scripted in-memory device shared by the integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gree_hp::{
    CipherContext, DEFAULT_PORT, DeviceIdentity, EncryptionVersion, Error, Event,
    GreeClientBuilder, Result, SessionKey, Transport, bootstrap_key, parse_response, seal,
};
use serde_json::{Value, json};

#[allow(dead_code)]
pub const DEVICE_KEY: &str = "St8Vw1Yz4Bc7Ef0H";
#[allow(dead_code)]
pub const MAC: &str = "f4911eaabbcc";

/// What the next exchange does instead of answering normally.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Timeout,
    /// Reply sealed under a key the client does not hold.
    ForeignKey,
    /// Well-encrypted reply with no `dat` field.
    Malformed,
    /// Envelope whose `pack` is not base64.
    BadPack,
    /// Never answers.
    Hang,
}

#[derive(Default)]
struct Shared {
    registers: BTreeMap<String, i64>,
    faults: VecDeque<Option<Fault>>,
    commands: Vec<Vec<(String, i64)>>,
    status_queries: usize,
    binds: usize,
}

#[derive(Clone)]
pub struct FakeDevice {
    version: EncryptionVersion,
    device: CipherContext,
    generic: CipherContext,
    shared: Arc<Mutex<Shared>>,
}

#[allow(dead_code)]
impl FakeDevice {
    pub fn new(version: EncryptionVersion) -> Self {
        let key = SessionKey::try_from(DEVICE_KEY).unwrap();
        Self {
            version,
            device: CipherContext::new(version, &key),
            generic: CipherContext::new(version, &bootstrap_key(version)),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn with_registers(self, registers: &[(&str, i64)]) -> Self {
        for (name, value) in registers {
            self.set_register(name, *value);
        }
        self
    }

    pub fn set_register(&self, name: &str, value: i64) {
        self.shared
            .lock()
            .unwrap()
            .registers
            .insert(name.to_string(), value);
    }

    pub fn register(&self, name: &str) -> Option<i64> {
        self.shared.lock().unwrap().registers.get(name).copied()
    }

    pub fn push_fault(&self, fault: Fault) {
        self.shared.lock().unwrap().faults.push_back(Some(fault));
    }

    /// Lets the next exchange through untouched, so a later fault lands mid-cycle.
    pub fn pass(&self) {
        self.shared.lock().unwrap().faults.push_back(None);
    }

    pub fn commands(&self) -> Vec<Vec<(String, i64)>> {
        self.shared.lock().unwrap().commands.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.shared.lock().unwrap().status_queries
    }

    pub fn binds(&self) -> usize {
        self.shared.lock().unwrap().binds
    }

    fn respond(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut shared = self.shared.lock().unwrap();
        let fault = shared.faults.pop_front().flatten();
        if let Some(Fault::Timeout) = fault {
            return Err(Error::Timeout);
        }

        let (request, cipher) = match parse_response(payload, &self.device) {
            Ok(body) => (body, &self.device),
            Err(_) => (parse_response(payload, &self.generic)?, &self.generic),
        };

        let reply = match request["t"].as_str() {
            Some("bind") => {
                shared.binds += 1;
                json!({"t": "bindok", "mac": MAC, "key": DEVICE_KEY, "r": 200})
            }
            Some("status") => {
                shared.status_queries += 1;
                let cols: Vec<&str> = request["cols"]
                    .as_array()
                    .map(|c| c.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let dat: Vec<Value> = cols
                    .iter()
                    .map(|c| shared.registers.get(*c).map_or(Value::Null, |v| json!(v)))
                    .collect();
                let dat = match dat.as_slice() {
                    [single] => single.clone(),
                    _ => Value::Array(dat),
                };
                json!({"t": "dat", "mac": MAC, "r": 200, "cols": cols, "dat": dat})
            }
            Some("cmd") => {
                let opt = request["opt"].as_array().cloned().unwrap_or_default();
                let p = request["p"].as_array().cloned().unwrap_or_default();
                let writes: Vec<(String, i64)> = opt
                    .iter()
                    .zip(&p)
                    .filter_map(|(o, v)| Some((o.as_str()?.to_string(), v.as_i64()?)))
                    .collect();
                for (name, value) in &writes {
                    shared.registers.insert(name.clone(), *value);
                }
                shared.commands.push(writes);
                json!({"t": "res", "mac": MAC, "r": 200, "opt": opt, "p": p, "val": p})
            }
            other => panic!("fake device got unexpected request type {other:?}"),
        };

        let reply = match fault {
            Some(Fault::Malformed) => json!({"t": "dat", "r": 200}),
            _ => reply,
        };
        let foreign;
        let cipher = match fault {
            Some(Fault::ForeignKey) => {
                foreign = CipherContext::new(
                    self.version,
                    &SessionKey::try_from("0000000000000000").unwrap(),
                );
                &foreign
            }
            _ => cipher,
        };
        if let Some(Fault::BadPack) = fault {
            let envelope = json!({"cid": "app", "i": 0, "pack": "%%not base64%%", "t": "pack", "tcid": "", "uid": 0});
            return Ok(envelope.to_string().into_bytes());
        }
        seal(&reply.to_string(), "app", 0, 0, cipher)
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn send_and_receive(
        &mut self,
        _target: SocketAddr,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<Vec<u8>> {
        let hang = matches!(
            self.shared.lock().unwrap().faults.front(),
            Some(Some(Fault::Hang))
        );
        if hang {
            self.shared.lock().unwrap().faults.pop_front();
            std::future::pending::<()>().await;
        }
        self.respond(payload)
    }
}

#[allow(dead_code)]
pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new("192.168.1.50".parse().unwrap(), DEFAULT_PORT, MAC).unwrap()
}

/// Builder wired to `device` and holding the device key.
#[allow(dead_code)]
pub fn keyed_builder(device: &FakeDevice) -> GreeClientBuilder {
    GreeClientBuilder::new(identity())
        .encryption_version(device.version)
        .key(SessionKey::try_from(DEVICE_KEY).unwrap())
        .transport(device.clone())
}

#[allow(dead_code)]
pub fn event_log() -> Arc<Mutex<Vec<Event>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[allow(dead_code)]
pub fn availability_changes(events: &Arc<Mutex<Vec<Event>>>) -> Vec<Event> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::AvailabilityChanged { .. }))
        .cloned()
        .collect()
}
