use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cipher::{CipherContext, SessionKey};
use crate::config::{DEFAULT_TIMEOUT_SECS, DeviceConfig, DeviceIdentity};
use crate::diff::{option_events, state_events};
use crate::handshake::obtain_key;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::options::OptionSet;
use crate::profile::{DeviceProfile, MAX_TEMP_F, MIN_TEMP_F, SensorEncoding, TargetSpec};
use crate::protocol::{Framed, Request, extract_values, frame_request, parse_response};
use crate::temperature::{
    OffsetMode, TempOffsetResolver, Temperature, celsius_to_fahrenheit, decode_composite,
    fahrenheit_from_device, fahrenheit_to_celsius,
};
use crate::transport::{Transport, UdpTransport};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&DeviceState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    Configured,
    Exchanged,
}

pub struct GreeClientBuilder {
    identity: DeviceIdentity,
    version: EncryptionVersion,
    key: Option<SessionKey>,
    uid: u32,
    timeout: Duration,
    disable_available_check: bool,
    offset_mode: OffsetMode,
    unit: TemperatureUnit,
    profile: DeviceProfile,
    transport: Option<Box<dyn Transport>>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl GreeClientBuilder {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            version: EncryptionVersion::V1Ecb,
            key: None,
            uid: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            disable_available_check: false,
            offset_mode: OffsetMode::Auto,
            unit: TemperatureUnit::Celsius,
            profile: DeviceProfile::heat_pump(),
            transport: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let mut builder = Self::new(config.identity()?)
            .encryption_version(config.encryption_version()?)
            .uid(config.uid.unwrap_or(0))
            .timeout(config.timeout())
            .disable_available_check(config.disable_available_check)
            .temp_sensor_offset(config.temp_sensor_offset)
            .temperature_unit(config.temperature_unit)
            .profile(config.profile.to_profile());
        if let Some(key) = config.session_key()? {
            builder = builder.key(key);
        }
        Ok(builder)
    }

    pub fn encryption_version(mut self, version: EncryptionVersion) -> Self {
        self.version = version;
        self
    }

    /// Static device key. Without one the client binds on its first cycle.
    pub fn key(mut self, key: SessionKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn disable_available_check(mut self, disable: bool) -> Self {
        self.disable_available_check = disable;
        self
    }

    pub fn temp_sensor_offset(mut self, offset: Option<bool>) -> Self {
        self.offset_mode = OffsetMode::from(offset);
        self
    }

    pub fn temperature_unit(mut self, unit: TemperatureUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&DeviceState) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<GreeClient> {
        let session = Uuid::new_v4();
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path, session)?),
            _ => None,
        };

        let cipher = self
            .key
            .as_ref()
            .map(|key| CipherContext::new(self.version, key));
        let availability = if self.disable_available_check {
            Availability::Online
        } else {
            Availability::Unknown
        };
        let options = self.profile.option_set();

        Ok(GreeClient {
            session,
            identity: self.identity,
            version: self.version,
            uid: self.uid,
            timeout: self.timeout,
            check_availability: !self.disable_available_check,
            offset_mode: self.offset_mode,
            cipher,
            key_source: self.key.map(|_| KeySource::Configured),
            transport: self
                .transport
                .unwrap_or_else(|| Box::new(UdpTransport::new()) as Box<dyn Transport>),
            profile: self.profile,
            state: SessionState::Uninitialized,
            availability,
            options,
            baseline_established: false,
            resolvers: BTreeMap::new(),
            device_state: DeviceState {
                availability,
                unit: self.unit,
                ..Default::default()
            },
            unit: self.unit,
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        })
    }
}

/// Session with one device: owns its key, its option mirror and its availability.
///
/// Every method that talks to the device takes `&mut self`, so a client runs at
/// most one cycle at a time. Share it through [`DeviceHandle`] to serialize
/// scheduled and user-initiated cycles.
pub struct GreeClient {
    session: Uuid,
    identity: DeviceIdentity,
    version: EncryptionVersion,
    uid: u32,
    timeout: Duration,
    check_availability: bool,
    offset_mode: OffsetMode,
    cipher: Option<CipherContext>,
    key_source: Option<KeySource>,
    transport: Box<dyn Transport>,
    profile: DeviceProfile,
    state: SessionState,
    availability: Availability,
    options: OptionSet,
    baseline_established: bool,
    resolvers: BTreeMap<String, TempOffsetResolver>,
    device_state: DeviceState,
    unit: TemperatureUnit,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<MessageLogger>,
}

impl GreeClient {
    pub fn builder(identity: DeviceIdentity) -> GreeClientBuilder {
        GreeClientBuilder::new(identity)
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        GreeClientBuilder::from_config(config)?.build()
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Never-contacted devices report unavailable unless checks are disabled.
    pub fn available(&self) -> bool {
        !self.check_availability || self.availability == Availability::Online
    }

    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    pub fn device_state(&self) -> &DeviceState {
        &self.device_state
    }

    pub fn has_key(&self) -> bool {
        self.cipher.is_some()
    }

    /// One scheduled cycle without overrides.
    pub async fn update(&mut self) -> SyncResult {
        self.sync(&[]).await
    }

    /// Fetches the full vocabulary, merges `overrides` on top and, once a
    /// baseline exists, pushes the writable registers back to the device.
    ///
    /// Nothing is committed until the last exchange of the cycle has finished,
    /// so dropping the future mid-cycle leaves the mirror untouched.
    pub async fn sync(&mut self, overrides: &[(String, i64)]) -> SyncResult {
        let cipher = match self.ensure_key().await {
            Ok(cipher) => cipher,
            Err(e) => return SyncResult::CommunicationFailure(e.to_string()),
        };

        let cols: Vec<String> = self.options.names().map(str::to_string).collect();
        let fetched = match self
            .exchange(&cipher, Request::Status { cols: &cols })
            .await
            .and_then(|body| extract_values(&body, &cols))
        {
            Ok(values) => values,
            Err(e) => return self.fail(SyncStage::Fetch, e),
        };

        let mut merged = self.options.clone();
        merged.merge_fetched(&fetched);
        let accepted = merged.merge_overrides(overrides);
        let read_only: Vec<String> = accepted
            .iter()
            .filter(|(name, _)| !self.profile.writable.contains(name))
            .map(|(name, _)| name.clone())
            .collect();
        if !read_only.is_empty() {
            warn!(
                session = %self.session,
                options = ?read_only,
                "overrides for read-only options are kept locally, not sent"
            );
        }

        let mut pushed = None;
        let mut push_error = None;
        if accepted.len() > read_only.len() {
            if self.baseline_established {
                let writes = merged.known_subset(&self.profile.writable);
                match self.push(&cipher, &writes).await {
                    Ok(()) => pushed = Some(writes),
                    Err(e) => push_error = Some(e),
                }
            } else {
                debug!(
                    session = %self.session,
                    count = accepted.len(),
                    "first cycle establishes a baseline, overrides kept locally"
                );
            }
        }

        // Commit point: no awaits past here.
        let changes = self.options.diff(&merged);
        self.options = merged;
        self.baseline_established = true;
        let mut events = option_events(&changes);
        if let Some(options) = pushed {
            events.push(Event::CommandSent { options });
        }
        self.emit_all(&events);

        if let Some(e) = push_error {
            return self.fail(SyncStage::Push, e);
        }

        self.state = SessionState::Ready;
        self.set_availability(Availability::Online);
        self.refresh_device_state();
        trace!(session = %self.session, changed = changes.len(), "cycle complete");
        SyncResult::Success(self.options.clone())
    }

    pub async fn set_power(&mut self, on: bool) -> SyncResult {
        let register = self.profile.modes.power_register.clone();
        self.sync(&[(register, i64::from(on))]).await
    }

    pub async fn turn_on(&mut self) -> SyncResult {
        self.set_power(true).await
    }

    pub async fn turn_off(&mut self) -> SyncResult {
        self.set_power(false).await
    }

    /// `"off"` powers the unit down; any other name must be in the profile's mode table.
    pub async fn set_mode(&mut self, mode: &str) -> Result<SyncResult> {
        let overrides = self
            .profile
            .modes
            .overrides_for(mode)
            .ok_or_else(|| Error::InvalidMode(mode.to_string()))?;
        Ok(self.sync(&overrides).await)
    }

    /// `value` is in the display unit. Ignored while the unit is powered off.
    pub async fn set_target_temperature(&mut self, target: &str, value: f64) -> Result<SyncResult> {
        let spec = self
            .profile
            .target(target)
            .ok_or_else(|| Error::UnknownTarget(target.to_string()))?;
        let (min, max) = display_bounds(spec, self.unit);
        if !(min..=max).contains(&value) {
            return Err(Error::InvalidTemperature {
                target: target.to_string(),
                value,
                min,
                max,
            });
        }
        let overrides = target_writes(spec, value, self.unit);

        if self.options.get(&self.profile.modes.power_register) == Some(0) {
            debug!(session = %self.session, name = %target, value, "unit is off, set point not sent");
            return Ok(SyncResult::Success(self.options.clone()));
        }
        Ok(self.sync(&overrides).await)
    }

    async fn ensure_key(&mut self) -> Result<CipherContext> {
        if let Some(cipher) = &self.cipher {
            return Ok(cipher.clone());
        }

        self.state = SessionState::AwaitingKey;
        debug!(session = %self.session, host = %self.identity.ip, "no device key, binding");
        match obtain_key(&mut *self.transport, &self.identity, self.version, self.timeout).await {
            Ok(key) => {
                info!(session = %self.session, host = %self.identity.ip, "device key obtained");
                let cipher = CipherContext::new(self.version, &key);
                self.cipher = Some(cipher.clone());
                self.key_source = Some(KeySource::Exchanged);
                self.emit(&Event::KeyObtained);
                Ok(cipher)
            }
            Err(e) => {
                warn!(session = %self.session, host = %self.identity.ip, error = %e, "bind failed");
                if let Some(ref mut logger) = self.logger {
                    logger.log_failure("bind", &e.to_string());
                }
                let reason = e.to_string();
                self.emit_all(&[
                    Event::HandshakeFailed {
                        reason: reason.clone(),
                    },
                    Event::SyncFailed {
                        stage: SyncStage::Handshake,
                        reason,
                    },
                ]);
                Err(e)
            }
        }
    }

    async fn push(&mut self, cipher: &CipherContext, writes: &[(String, i64)]) -> Result<()> {
        let (opt, p): (Vec<String>, Vec<i64>) = writes.iter().cloned().unzip();
        debug!(session = %self.session, options = ?opt, values = ?p, "pushing options");
        self.exchange(cipher, Request::Command { opt: &opt, p: &p })
            .await
            .map(|_| ())
    }

    async fn exchange(&mut self, cipher: &CipherContext, request: Request<'_>) -> Result<Value> {
        let kind = request.kind();
        let Framed { plaintext, wire } = frame_request(&request, &self.identity, self.uid, cipher)?;
        if let Some(ref mut logger) = self.logger {
            logger.log_request(kind, &serde_json::from_str::<Value>(&plaintext)?);
        }

        let target = self.identity.socket_addr();
        let result = match self
            .transport
            .send_and_receive(target, &wire, self.timeout)
            .await
        {
            Ok(reply) => parse_response(&reply, cipher),
            Err(e) => Err(e),
        };

        if let Some(ref mut logger) = self.logger {
            match &result {
                Ok(body) => logger.log_reply(kind, body),
                Err(e) => logger.log_failure(kind, &e.to_string()),
            }
        }
        result
    }

    fn fail(&mut self, stage: SyncStage, error: Error) -> SyncResult {
        warn!(session = %self.session, host = %self.identity.ip, ?stage, error = %error, "cycle failed");

        if matches!(error, Error::Crypto(_)) && self.key_source == Some(KeySource::Exchanged) {
            debug!(session = %self.session, "discarding exchanged key");
            self.cipher = None;
            self.key_source = None;
        }

        self.state = if self.cipher.is_some() {
            SessionState::Offline
        } else {
            SessionState::AwaitingKey
        };
        self.set_availability(Availability::Offline);

        let reason = error.to_string();
        self.emit(&Event::SyncFailed {
            stage,
            reason: reason.clone(),
        });
        if error.is_communication() {
            SyncResult::CommunicationFailure(reason)
        } else {
            SyncResult::DecodeFailure(reason)
        }
    }

    fn set_availability(&mut self, next: Availability) {
        if !self.check_availability || next == self.availability {
            return;
        }
        info!(session = %self.session, host = %self.identity.ip, ?next, "availability changed");
        self.availability = next;
        self.device_state.availability = next;
        self.emit(&Event::AvailabilityChanged { availability: next });
    }

    fn refresh_device_state(&mut self) {
        let modes = &self.profile.modes;
        let mut next = DeviceState {
            availability: self.availability,
            power: self.options.get(&modes.power_register).map(|v| v != 0),
            mode: modes.resolve(&self.options),
            unit: self.unit,
            ..Default::default()
        };

        for spec in &self.profile.targets {
            if let Some(raw) = self.options.get(&spec.register) {
                let fraction = spec
                    .fraction_register
                    .as_deref()
                    .and_then(|r| self.options.get(r))
                    .unwrap_or(0);
                next.targets
                    .insert(spec.name.clone(), target_display(spec, raw, fraction, self.unit));
            }
        }

        let mut events = Vec::new();
        for spec in &self.profile.sensors {
            let Some(raw) = self.options.get(&spec.register) else {
                continue;
            };
            let mut celsius = match spec.encoding {
                SensorEncoding::Direct => raw as f64,
                SensorEncoding::Composite => decode_composite(raw),
            };
            if spec.calibrated {
                let resolver = self
                    .resolvers
                    .entry(spec.name.clone())
                    .or_insert_with(|| TempOffsetResolver::new(self.offset_mode));
                let was_resolved = resolver.is_resolved();
                celsius = resolver.resolve(celsius);
                if !was_resolved && let Some(offset) = resolver.offset() {
                    debug!(session = %self.session, sensor = %spec.name, offset, "sensor offset resolved");
                    events.push(Event::OffsetResolved {
                        sensor: spec.name.clone(),
                        offset,
                    });
                }
            }
            next.sensors.insert(
                spec.name.clone(),
                Temperature::from_celsius(celsius).in_unit(self.unit),
            );
        }

        events.extend(state_events(&self.device_state, &next));
        self.device_state = next;
        self.emit_all(&events);

        for cb in &self.snapshot_callbacks {
            cb(&self.device_state);
        }
    }

    fn emit(&self, event: &Event) {
        for cb in &self.event_callbacks {
            cb(event);
        }
    }

    fn emit_all(&self, events: &[Event]) {
        for event in events {
            self.emit(event);
        }
        if !events.is_empty() {
            trace!(session = %self.session, count = events.len(), "events emitted");
        }
    }
}

/// Settable range in the display unit. Targets with a half-degree register use
/// the unit's native Fahrenheit range.
fn display_bounds(spec: &TargetSpec, unit: TemperatureUnit) -> (f64, f64) {
    match unit {
        TemperatureUnit::Celsius => (spec.min_c, spec.max_c),
        TemperatureUnit::Fahrenheit if spec.fraction_register.is_some() => (MIN_TEMP_F, MAX_TEMP_F),
        TemperatureUnit::Fahrenheit => (
            celsius_to_fahrenheit(spec.min_c),
            celsius_to_fahrenheit(spec.max_c),
        ),
    }
}

fn target_writes(spec: &TargetSpec, value: f64, unit: TemperatureUnit) -> Vec<(String, i64)> {
    match (unit, spec.fraction_register.as_ref()) {
        (TemperatureUnit::Fahrenheit, Some(fraction)) => {
            let (set_tem, tem_rec) = fahrenheit_to_celsius(value);
            vec![(spec.register.clone(), set_tem), (fraction.clone(), tem_rec)]
        }
        _ => {
            let celsius = Temperature::from_unit(value, unit).celsius().round() as i64;
            vec![(spec.register.clone(), celsius)]
        }
    }
}

fn target_display(spec: &TargetSpec, raw: i64, fraction: i64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Fahrenheit if spec.fraction_register.is_some() => {
            fahrenheit_from_device(raw, fraction)
        }
        _ => Temperature::from_celsius(raw as f64).in_unit(unit),
    }
}

/// Cloneable handle that queues every cycle behind one lock.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<Mutex<GreeClient>>,
}

impl DeviceHandle {
    pub fn new(client: GreeClient) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, GreeClient> {
        self.inner.lock().await
    }

    pub async fn update(&self) -> SyncResult {
        self.inner.lock().await.update().await
    }

    pub async fn sync(&self, overrides: &[(String, i64)]) -> SyncResult {
        self.inner.lock().await.sync(overrides).await
    }

    /// Runs a cycle every `interval`, the first one immediately.
    pub fn spawn_poller(&self, interval: Duration) -> Poller {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut client = inner.lock().await;
                let result = client.update().await;
                if !result.is_success() {
                    debug!(session = %client.session_id(), ?result, "scheduled cycle failed");
                }
            }
        });
        Poller { task }
    }
}

/// Background polling task. Dropping it stops polling.
pub struct Poller {
    task: JoinHandle<()>,
}

impl Poller {
    pub fn shutdown(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
