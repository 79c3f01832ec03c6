//! The positioning combiner
//!
//! [`PositioningCombiner`] owns the device links and the output sinks, reacts
//! to link events, fuses them into station and beacon state and writes the
//! result out as text lines.
//!
//! All mutable state lives in one core behind a single mutex. Link threads,
//! the control surface and the 1-second override timer all go through it.
//! Listener callbacks run after the core lock has been released.

use crate::algorithms::{
    decode_linear, geodesic_project, geodetic_to_local, horizontal_projection, local_to_geodetic, shift_rotate,
    solve_ranges_2d, wrap_360, GeoPoint, RangePoint,
};
use crate::algorithms::multilateration::centroid;
use crate::combiner::beacon::{BeaconSnapshot, BeaconState};
use crate::combiner::control::{ControlCommand, ControlReply, ReferenceCommand};
use crate::combiner::nmea::fix_triplet;
use crate::combiner::polling::PollingMonitor;
use crate::combiner::station::StationLocals;
use crate::core::{
    BeaconAddress, Clock, DeviceId, DeviceType, ReportStatus, RequestCode, ResponseCode, ABS_MAX_TEMP_C,
    ABS_MAX_VCC_V, ABS_MIN_TEMP_C, ABS_MIN_VCC_V, CODE_RANGE,
};
use crate::hardware::{
    CommResult, CompassEvent, DeviceInfo, DeviceLink, GnssEvent, InterrogatorEvent, InterrogatorLink, LineSink,
    NavigationReport, QueryKind, SerialLineSink, UdpLineSink,
};
use crate::processing::{TrackOutlierFilter, TrackPoint, TrackSmoother, TrilaterationBuffer, WaterProperties};
use crate::utils::config::{LinkConfig, ReferenceMode, DEFAULT_BAUD_RATE};
use crate::utils::{CombinerConfig, ConfigError};
use chrono::Utc;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Period of the location override timer
pub const OVERRIDE_PERIOD: Duration = Duration::from_secs(1);

const REFERENCE_ADDRESSES: [BeaconAddress; 3] = [BeaconAddress::Addr1, BeaconAddress::Addr2, BeaconAddress::Addr3];

/// Errors raised while building a combiner
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CombinerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Notifications delivered to registered listeners
#[derive(Debug, Clone, PartialEq)]
pub enum CombinerEvent {
    /// A responder answered a user-data request
    UserDataResult {
        address: BeaconAddress,
        request: RequestCode,
        response: ResponseCode,
    },
    /// A directly connected responder reported its address
    LocalAddress { address: BeaconAddress },
    InterrogationChanged(bool),
    DeviceInfo {
        device_type: DeviceType,
        serial_number: String,
        version: String,
    },
}

/// Listener callback type
pub type EventListener = Box<dyn Fn(&CombinerEvent) + Send>;

/// Registration handle returned by [`PositioningCombiner::add_event_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u32);

impl ListenerHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Location and heading forced onto the station
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationOverride {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub heading_deg: f64,
}

/// Header lines describing both output formats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub station: String,
    pub beacon: String,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Station local parameters:\n{}\nRemote parameters:\n{}",
            self.station, self.beacon
        )
    }
}

/// Inputs to range derivation that come from outside the beacon
struct RangeContext {
    recalculate: bool,
    sound_speed_mps: f64,
    /// Propagation time correction for this address (s), LBL only
    timing_adjustment_s: Option<f64>,
    station_depth_m: Option<f64>,
}

struct CombinerCore {
    config: CombinerConfig,
    station: StationLocals,
    beacons: BTreeMap<BeaconAddress, BeaconState>,
    buffer: TrilaterationBuffer,
    water: WaterProperties,
    polling: PollingMonitor,
    device_info: Option<DeviceInfo>,
    interrogator: Box<dyn InterrogatorLink>,
    gnss: Option<Box<dyn DeviceLink>>,
    compass: Option<Box<dyn DeviceLink>>,
    sinks: Vec<Box<dyn LineSink>>,
    reference_origin: Option<GeoPoint>,
    location_override: Option<LocationOverride>,
}

fn lock_core(core: &Mutex<CombinerCore>) -> MutexGuard<'_, CombinerCore> {
    core.lock().unwrap_or_else(|e| e.into_inner())
}

impl CombinerCore {
    fn device_type(&self) -> DeviceType {
        self.device_info
            .as_ref()
            .map(|info| info.device_type)
            .unwrap_or(DeviceType::Invalid)
    }

    fn beacon(&mut self, address: BeaconAddress) -> &mut BeaconState {
        self.beacons
            .entry(address)
            .or_insert_with(|| BeaconState::new(address))
    }

    /// Broadcast a line to every open sink
    fn emit(&mut self, line: &str) {
        for sink in self.sinks.iter_mut().filter(|s| s.is_open()) {
            match sink.send_line(line) {
                Ok(()) => debug!("{} << {}", sink.describe(), line.trim_end()),
                Err(e) => warn!("{}: send failed: {e}", sink.describe()),
            }
        }
    }

    fn start_polling(&mut self, now: Instant) -> bool {
        let mask = self.config.address_mask;
        let salinity = self.config.salinity_psu;
        let max_distance = self.config.max_distance_m;

        self.polling.request_start(now);
        match self.interrogator.query_start_polling(mask, salinity, max_distance) {
            Ok(()) => true,
            Err(e) => {
                error!("Start polling request failed: {e}");
                false
            }
        }
    }

    fn check_watchdog(&mut self, now: Instant) {
        if self.interrogator.is_active() && self.polling.check_watchdog(now) {
            error!(
                "No remote activity for {:.1} s (short-term power loss?), restarting polling",
                self.polling.silence(now).as_secs_f64()
            );
            self.start_polling(now);
        }
    }

    fn apply_override(&mut self, now: Instant) {
        if let Some(forced) = self.location_override {
            self.station.lat_deg.set(forced.lat_deg, now);
            self.station.lon_deg.set(forced.lon_deg, now);
            self.station.heading_deg.set(forced.heading_deg, now);
        }
    }

    fn tick(&mut self, now: Instant) {
        self.apply_override(now);
        self.check_watchdog(now);
    }

    // Interrogator events

    fn on_interrogator_event(&mut self, event: InterrogatorEvent, now: Instant, events: &mut Vec<CombinerEvent>) {
        match event {
            InterrogatorEvent::DetectedChanged(detected) => {
                info!("Interrogator detected={detected}");
                if detected {
                    if self.gnss.is_some() {
                        start_aux(&mut self.gnss, "GNSS");
                    } else {
                        start_aux(&mut self.compass, "compass");
                    }
                }
            }
            InterrogatorEvent::ActiveChanged(active) => {
                info!("Interrogator active={active}");
                if !active {
                    let was_active = self.polling.is_active();
                    self.polling.stop();
                    interrogation_changed(false, was_active, events);
                }
            }
            InterrogatorEvent::DeviceInfoChanged(Some(device_info)) => {
                info!(
                    "Device info: {:?}, s/n {}, version {}",
                    device_info.device_type, device_info.serial_number, device_info.version
                );
                let supported = device_info.device_type.is_base_station();
                events.push(CombinerEvent::DeviceInfo {
                    device_type: device_info.device_type,
                    serial_number: device_info.serial_number.clone(),
                    version: device_info.version.clone(),
                });
                self.device_info = Some(device_info);

                if supported {
                    info!("Starting polling (mask={:016b})", self.config.address_mask);
                    self.start_polling(now);
                } else {
                    warn!("Connected device is not a base station, polling not started");
                }
            }
            InterrogatorEvent::DeviceInfoChanged(None) => {
                info!("Device info lost");
                self.device_info = None;
            }
            InterrogatorEvent::Ack { query, ok, result } => self.on_ack(query, ok, &result, now),
            InterrogatorEvent::PollingStarted {
                address_mask,
                salinity_psu,
                sound_speed_mps,
                max_distance_m,
            } => {
                let was_active = self.polling.is_active();
                self.polling.polling_started(address_mask, now);

                if address_mask == 0 {
                    info!("Interrogation paused");
                } else {
                    let sound_speed = sound_speed_mps
                        .map(|v| format!("{v:.1} m/s"))
                        .unwrap_or_else(|| "Auto".to_string());
                    info!(
                        "Polling started (mask={address_mask:016b}, salinity={salinity_psu:.1} PSU, \
                         sound speed={sound_speed}, max distance={max_distance_m:.1} m)"
                    );
                }
                interrogation_changed(address_mask != 0, was_active, events);
            }
            InterrogatorEvent::Report(report) => self.on_report(&report, now, events),
            InterrogatorEvent::LocalAddress(address) => {
                info!("Local responder address: {address}");
                events.push(CombinerEvent::LocalAddress { address });
            }
            InterrogatorEvent::Log(line) => debug!("AZM: {line}"),
        }
    }

    fn on_ack(&mut self, query: QueryKind, ok: bool, result: &str, now: Instant) {
        match (query, ok) {
            (_, true) => debug!("{query:?} acknowledged"),
            (QueryKind::Polling, false) => {
                error!("Start/stop polling caused a \"{result}\" error, retrying");
                self.start_polling(now);
            }
            (_, false) => warn!("{query:?} rejected: {result}"),
        }
    }

    // Report pipeline

    fn on_report(&mut self, report: &NavigationReport, now: Instant, events: &mut Vec<CombinerEvent>) {
        self.process_station(report, now);

        let remote = matches!(report.status, ReportStatus::RemoteTimeout | ReportStatus::RemoteResponse);
        if remote && !report.address.is_valid() {
            warn!("Remote report without a valid address ignored");
        } else {
            match report.status {
                ReportStatus::RemoteTimeout => {
                    self.mark_timeout(report.address, now);
                    self.polling.touch(now);
                }
                ReportStatus::RemoteResponse => {
                    match self.device_type() {
                        DeviceType::UsblBase => self.process_usbl(report, now, events),
                        DeviceType::LblBase => self.process_lbl(report, now, events),
                        other => debug!("Response from {} ignored for device type {other:?}", report.address),
                    }
                    self.polling.touch(now);
                }
                ReportStatus::Local => {}
            }

            if remote {
                self.send_to_beacon_channel(report.address, now);
            }
        }

        self.check_watchdog(now);
    }

    fn process_station(&mut self, report: &NavigationReport, now: Instant) {
        if let Some(temperature) = report.local_temperature_c {
            self.station.water_temp_c.set(temperature, now);
            self.water.temperature_c = Some(temperature);
        }

        if let Some(pressure) = report.local_pressure_mbar {
            self.station.pressure_mbar.set(pressure, now);
            self.water.pressure_mbar = Some(pressure);
            if let Some(depth) = self.water.depth() {
                self.station.depth_m.set(depth, now);
                self.station.z_m.set(depth, now);
            }
        }

        if let Some(pitch) = report.local_pitch_deg {
            self.station.pitch_deg.set(pitch, now);
        }
        if let Some(roll) = report.local_roll_deg {
            self.station.roll_deg.set(roll, now);
        }

        let line = self.station.to_line(now);
        self.emit(&line);

        if self.config.station_nmea_output {
            let sentences = fix_triplet(&self.station.nmea_fix(now), Utc::now());
            self.emit(&sentences);
        }
    }

    fn mark_timeout(&mut self, address: BeaconAddress, now: Instant) {
        let beacon = self.beacon(address);
        beacon.is_timeout = true;
        beacon.timeouts += 1;

        // Nothing worth showing until the beacon has been located once
        let line = (beacon.azimuth_deg.is_initialized() && beacon.srange_projection_m.is_initialized())
            .then(|| beacon.to_line(now));
        if let Some(line) = line {
            self.emit(&line);
        }
    }

    fn range_context(&self, address: BeaconAddress, now: Instant) -> RangeContext {
        let timing = &self.config.timing;
        let timing_adjustment_s = (self.device_type() == DeviceType::LblBase && timing.enabled).then(|| {
            let number = address.number().unwrap_or(0) as f64;
            timing.base_adjustment_s + timing.per_address_adjustment_s * number
        });

        RangeContext {
            recalculate: self.config.recalculate_range,
            sound_speed_mps: self.water.sound_speed(),
            timing_adjustment_s,
            station_depth_m: self.station.depth_m.fresh_copy(now),
        }
    }

    fn process_usbl(&mut self, report: &NavigationReport, now: Instant, events: &mut Vec<CombinerEvent>) {
        let address = report.address;
        let ctx = self.range_context(address, now);
        let own_position = match (
            self.station.lat_deg.fresh_copy(now),
            self.station.lon_deg.fresh_copy(now),
            self.station.heading_deg.fresh_copy(now),
        ) {
            (Some(lat), Some(lon), Some(heading)) => Some((lat, lon, heading)),
            _ => None,
        };
        let antenna = self.config.antenna.clone();
        let filters = self.config.filters.clone();

        let beacon = self.beacon(address);
        let has_projection = apply_common_items(beacon, report, &ctx, now, events);

        if let Some(elevation) = report.elevation_deg {
            beacon.elevation_deg.set(elevation, now);
        }

        let projection = beacon.srange_projection_m.get().copied().filter(|_| has_projection);
        if let Some(azimuth) = report.azimuth_deg {
            beacon.azimuth_deg.set(azimuth, now);
        }

        if let (Some(azimuth), Some(projection)) = (report.azimuth_deg, projection) {
            if let Some((lat, lon, heading)) = own_position {
                let (abs_azimuth, abs_range) = shift_rotate(
                    heading,
                    antenna.angular_offset_deg,
                    azimuth,
                    projection,
                    antenna.x_offset_m,
                    antenna.y_offset_m,
                );
                let fix = geodesic_project(lat, lon, abs_azimuth, abs_range);

                let outliers = beacon.outlier_filter.get_or_insert_with(|| {
                    TrackOutlierFilter::new(filters.outlier_window, filters.outlier_threshold_mps, filters.outlier_gate_m)
                });
                match outliers.process(TrackPoint::new(fix.lat_deg, fix.lon_deg, 0.0), now) {
                    Some(accepted) => {
                        let depth = beacon.depth_m.get().copied().unwrap_or(0.0);
                        let smoother = beacon
                            .smoother
                            .get_or_insert_with(|| TrackSmoother::new(filters.smoother_window, filters.smoother_max_gap()));
                        let smoothed = smoother.process(TrackPoint::new(accepted.lat_deg, accepted.lon_deg, depth), now);

                        beacon.aazimuth_deg.set(abs_azimuth, now);
                        beacon.razimuth_deg.set(wrap_360(abs_azimuth + 180.0), now);
                        beacon.adistance_m.set(abs_range, now);
                        beacon.lat_deg.set(smoothed.lat_deg, now);
                        beacon.lon_deg.set(smoothed.lon_deg, now);
                    }
                    None => debug!("Beacon {address}: fix rejected as outlier"),
                }
            } else {
                beacon.razimuth_deg.set(wrap_360(azimuth + 180.0), now);
            }
        }

        let line = beacon.to_line(now);
        self.emit(&line);
    }

    fn process_lbl(&mut self, report: &NavigationReport, now: Instant, events: &mut Vec<CombinerEvent>) {
        let address = report.address;
        let ctx = self.range_context(address, now);

        let CombinerCore {
            beacons,
            station,
            buffer,
            config,
            reference_origin,
            ..
        } = &mut *self;
        let beacon = beacons
            .entry(address)
            .or_insert_with(|| BeaconState::new(address));

        let has_projection = apply_common_items(beacon, report, &ctx, now, events);

        let z = beacon.z_m.get().or_else(|| station.z_m.get()).copied();
        let anchor = match (beacon.x_m.get(), beacon.y_m.get(), z, beacon.srange_projection_m.get()) {
            (Some(&x), Some(&y), Some(z), Some(&range)) if has_projection => Some(RangePoint::new(x, y, z, range)),
            _ => None,
        };

        match anchor {
            Some(point) => {
                buffer.update_point(address, point, now);

                if buffer.can_form_navigation_base(now) {
                    let points = buffer.valid_points(now);
                    let seed = match (station.x_m.get(), station.y_m.get()) {
                        (Some(&x), Some(&y)) => (x, y),
                        _ => centroid(&points).unwrap_or((0.0, 0.0)),
                    };
                    let depth = station.z_m.get().copied().unwrap_or(0.0);

                    let solution = solve_ranges_2d(&points, Vector3::new(seed.0, seed.1, depth), &config.lbl.solver);
                    debug!(
                        "LBL solution x={:.3} y={:.3} rerr={:.3} ({} points, {} iterations)",
                        solution.x,
                        solution.y,
                        solution.residual,
                        points.len(),
                        solution.iterations
                    );

                    station.x_m.set(solution.x, now);
                    station.y_m.set(solution.y, now);
                    station.rerr_m.set(solution.residual, now);
                    beacon.rerr_m.set(solution.residual, now);

                    if let Some(origin) = reference_origin.as_ref() {
                        let position = local_to_geodetic(solution.x, solution.y, origin);
                        station.lat_deg.set(position.lat_deg, now);
                        station.lon_deg.set(position.lon_deg, now);
                    }
                }
            }
            None if has_projection => debug!("Beacon {address}: position unknown, range not used"),
            None => {}
        }

        let line = beacon.to_line(now);
        self.emit(&line);
    }

    fn send_to_beacon_channel(&mut self, address: BeaconAddress, now: Instant) {
        let Some(beacon) = self.beacons.get_mut(&address) else {
            return;
        };
        if !beacon.has_channel() {
            return;
        }

        let sentences = beacon.nmea_triplet(now, Utc::now());
        match beacon.send_to_channel(&sentences) {
            Ok(()) => debug!(
                "{} (beacon {address}) << {}",
                beacon.channel_description().unwrap_or_default(),
                sentences.trim_end()
            ),
            Err(e) => error!("Beacon {address} channel: {e}"),
        }
    }

    // Auxiliary links

    fn on_gnss_event(&mut self, event: GnssEvent, now: Instant) {
        match event {
            GnssEvent::DetectedChanged(detected) => {
                info!("GNSS detected={detected}");
                if detected {
                    start_aux(&mut self.compass, "compass");
                }
            }
            GnssEvent::Location { .. } | GnssEvent::Heading(_) if self.location_override.is_some() => {
                debug!("GNSS update ignored while the location override is active");
            }
            GnssEvent::Location {
                lat_deg,
                lon_deg,
                course_deg,
                speed_kmh,
            } => {
                self.station.lat_deg.set(lat_deg, now);
                self.station.lon_deg.set(lon_deg, now);
                if let Some(course) = course_deg.filter(|c| !c.is_nan()) {
                    self.station.course_deg.set(course, now);
                }
                if let Some(speed) = speed_kmh.filter(|s| !s.is_nan()) {
                    self.station.speed_mps.set(speed / 3.6, now);
                }
            }
            GnssEvent::Heading(heading) => self.station.heading_deg.set(heading, now),
            GnssEvent::Log(line) => debug!("AUX1: {line}"),
        }
    }

    fn on_compass_event(&mut self, event: CompassEvent, now: Instant) {
        match event {
            CompassEvent::DetectedChanged(detected) => info!("Compass detected={detected}"),
            CompassEvent::Heading(_) if self.location_override.is_some() => {
                debug!("Compass heading ignored while the location override is active");
            }
            CompassEvent::Heading(heading) => self.station.heading_deg.set(heading, now),
            CompassEvent::Log(line) => debug!("AUX2: {line}"),
        }
    }

    // Connection management

    fn connect(&mut self, now: Instant) -> bool {
        stop_aux(&mut self.gnss, "GNSS");
        stop_aux(&mut self.compass, "compass");

        for sink in self.sinks.iter_mut().filter(|s| !s.is_open()) {
            match sink.open() {
                Ok(()) => info!("Output opened: {}", sink.describe()),
                Err(e) => error!("Could not open {}: {e}", sink.describe()),
            }
        }

        if self.interrogator.is_active() {
            return true;
        }

        self.polling = PollingMonitor::new(self.config.watchdog_timeout(), now);
        match self.interrogator.start() {
            Ok(()) => {
                info!("Interrogator link started");
                true
            }
            Err(e) => {
                error!("Could not start interrogator link: {e}");
                false
            }
        }
    }

    fn disconnect(&mut self, events: &mut Vec<CombinerEvent>) -> bool {
        if !self.interrogator.is_active() {
            return false;
        }

        if let Err(e) = self.interrogator.query_stop_polling() {
            warn!("Stop polling request failed: {e}");
        }

        let stopped = match self.interrogator.stop() {
            Ok(()) => true,
            Err(e) => {
                error!("Could not stop interrogator link: {e}");
                false
            }
        };

        stop_aux(&mut self.gnss, "GNSS");
        stop_aux(&mut self.compass, "compass");

        for sink in self.sinks.iter_mut().filter(|s| s.is_open()) {
            if let Err(e) = sink.close() {
                warn!("Could not close {}: {e}", sink.describe());
            }
        }

        let was_active = self.polling.is_active();
        self.polling.stop();
        interrogation_changed(false, was_active, events);

        info!("Disconnected");
        stopped
    }

    fn query<F>(&mut self, what: &str, op: F) -> bool
    where
        F: FnOnce(&mut dyn InterrogatorLink) -> CommResult<()>,
    {
        match op(self.interrogator.as_mut()) {
            Ok(()) => true,
            Err(e) => {
                error!("{what} failed: {e}");
                false
            }
        }
    }

    // LBL reference beacons

    fn set_reference_points(&mut self, points: [(f64, f64); 3], origin: Option<GeoPoint>, now: Instant) -> bool {
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            warn!("Reference coordinates rejected: {points:?}");
            return false;
        }

        for (address, (x, y)) in REFERENCE_ADDRESSES.into_iter().zip(points) {
            let beacon = self.beacon(address);
            beacon.x_m.set(x, now);
            beacon.y_m.set(y, now);
        }
        self.buffer.clear();
        self.reference_origin = origin;

        info!("Reference responders set: {points:?}");
        true
    }

    fn set_reference_geographic(&mut self, points: [GeoPoint; 3], now: Instant) -> bool {
        if points.iter().any(|p| !p.is_valid()) {
            warn!("Reference coordinates rejected: {points:?}");
            return false;
        }

        let origin = points[0];
        let local = points.map(|p| geodetic_to_local(&p, &origin));
        self.set_reference_points(local, Some(origin), now)
    }

    fn discard_reference(&mut self) -> bool {
        for address in REFERENCE_ADDRESSES {
            if let Some(beacon) = self.beacons.get_mut(&address) {
                beacon.x_m.reset();
                beacon.y_m.reset();
            }
        }
        self.buffer.clear();
        self.reference_origin = None;

        info!("Reference responders discarded");
        true
    }
}

/// Fields shared by USBL and LBL responses. Returns whether a fresh
/// horizontal projection is available this cycle.
fn apply_common_items(
    beacon: &mut BeaconState,
    report: &NavigationReport,
    ctx: &RangeContext,
    now: Instant,
    events: &mut Vec<CombinerEvent>,
) -> bool {
    beacon.is_timeout = false;
    beacon.successes += 1;

    if report.request.is_user_data() {
        events.push(CombinerEvent::UserDataResult {
            address: report.address,
            request: report.request,
            response: report.response,
        });
    }

    if let Some(message) = report.response.error_message(report.request) {
        beacon.message.set(message, now);
    } else if let ResponseCode::Value(code) = report.response {
        match report.request {
            RequestCode::Vcc => beacon
                .vcc_v
                .set(decode_linear(code, CODE_RANGE, ABS_MIN_VCC_V, ABS_MAX_VCC_V), now),
            RequestCode::Temperature => beacon
                .water_temp_c
                .set(decode_linear(code, CODE_RANGE, ABS_MIN_TEMP_C, ABS_MAX_TEMP_C), now),
            _ => {}
        }
    }

    if let Some(msr) = report.msr_db {
        beacon.msr_db.set(msr, now);
    }

    if let Some(depth) = report.remote_depth_m {
        beacon.depth_m.set(depth, now);
        beacon.z_m.set(depth, now);
    }

    let mut has_projection = false;
    let mut range_from_time = false;

    if let Some(ptime) = report.propagation_time_s {
        beacon.ptime_s.set(ptime, now);

        if ctx.recalculate {
            range_from_time = true;
            has_projection = true;

            let time = ptime - ctx.timing_adjustment_s.unwrap_or(0.0);
            let range = time * ctx.sound_speed_mps;
            beacon.slant_range_m.set(range, now);

            let depth_delta = match (ctx.station_depth_m, beacon.depth_m.fresh_copy(now)) {
                (Some(own), Some(remote)) => Some(own - remote),
                _ => None,
            };
            beacon
                .srange_projection_m
                .set(horizontal_projection(range, depth_delta), now);
        }
    }

    if !range_from_time {
        if let Some(range) = report.slant_range_m {
            beacon.slant_range_m.set(range, now);
        }
        if let Some(projection) = report.slant_range_projection_m.or(report.slant_range_m) {
            beacon.srange_projection_m.set(projection, now);
            has_projection = true;
        }
    }

    has_projection
}

fn interrogation_changed(active: bool, was_active: bool, events: &mut Vec<CombinerEvent>) {
    if active != was_active {
        events.push(CombinerEvent::InterrogationChanged(active));
    }
}

fn configure_link<L: DeviceLink + ?Sized>(link: &mut L, settings: &LinkConfig) {
    link.set_preferred_port(settings.port.clone());
    link.set_baud_rate(settings.baud_rate);
}

fn start_aux(link: &mut Option<Box<dyn DeviceLink>>, name: &str) {
    if let Some(link) = link.as_mut().filter(|l| !l.is_active()) {
        let port = link.preferred_port().unwrap_or_else(|| "auto".to_string());
        let baud_rate = link.baud_rate();
        match link.start() {
            Ok(()) => info!("{name} link started (port {port} @ {baud_rate})"),
            Err(e) => error!("Could not start {name} link: {e}"),
        }
    }
}

fn stop_aux(link: &mut Option<Box<dyn DeviceLink>>, name: &str) {
    if let Some(link) = link.as_mut().filter(|l| l.is_active()) {
        match link.stop() {
            Ok(()) => info!("{name} link stopped"),
            Err(e) => error!("Could not stop {name} link: {e}"),
        }
    }
}

struct OverrideTimer {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct ListenerRegistry {
    next_id: u32,
    entries: Vec<(ListenerHandle, EventListener)>,
}

/// Fuses interrogator, GNSS and compass data into station and beacon state
pub struct PositioningCombiner {
    core: Arc<Mutex<CombinerCore>>,
    clock: Arc<dyn Clock>,
    listeners: Mutex<ListenerRegistry>,
    timer: Mutex<Option<OverrideTimer>>,
}

impl PositioningCombiner {
    /// Build a combiner around an interrogator link. Outputs and auxiliary
    /// links are attached with the `with_*` builders.
    pub fn new(
        config: CombinerConfig,
        mut interrogator: Box<dyn InterrogatorLink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CombinerError> {
        config.validate()?;
        let now = clock.now();

        configure_link(interrogator.as_mut(), &config.links.interrogator);

        let mut core = CombinerCore {
            station: StationLocals::new(),
            beacons: BTreeMap::new(),
            buffer: TrilaterationBuffer::with_limits(config.lbl.max_point_age(), config.lbl.min_points),
            water: WaterProperties::new(config.salinity_psu),
            polling: PollingMonitor::new(config.watchdog_timeout(), now),
            device_info: None,
            interrogator,
            gnss: None,
            compass: None,
            sinks: Vec::new(),
            reference_origin: None,
            location_override: None,
            config,
        };

        if let Some(reference) = core.config.lbl.reference.clone() {
            let applied = match reference.mode {
                ReferenceMode::Local => core.set_reference_points(reference.points.map(|[x, y]| (x, y)), None, now),
                ReferenceMode::Geographic => core.set_reference_geographic(
                    reference.points.map(|[lat, lon]| GeoPoint::new(lat, lon)),
                    now,
                ),
            };
            if !applied {
                return Err(CombinerError::InvalidArgument("lbl.reference".to_string()));
            }
        }

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            clock,
            listeners: Mutex::new(ListenerRegistry {
                next_id: 0,
                entries: Vec::new(),
            }),
            timer: Mutex::new(None),
        })
    }

    /// Attach the GNSS receiver link, unless `links.gnss` is disabled
    pub fn with_gnss(self, mut link: Box<dyn DeviceLink>) -> Self {
        {
            let mut core = lock_core(&self.core);
            let settings = core.config.links.gnss.clone();
            if settings.enabled {
                configure_link(link.as_mut(), &settings.link);
                core.gnss = Some(link);
            } else {
                info!("GNSS link disabled in configuration, not attached");
            }
        }
        self
    }

    /// Attach the compass link, unless `links.compass` is disabled
    pub fn with_compass(self, mut link: Box<dyn DeviceLink>) -> Self {
        {
            let mut core = lock_core(&self.core);
            let settings = core.config.links.compass.clone();
            if settings.enabled {
                configure_link(link.as_mut(), &settings.link);
                core.compass = Some(link);
            } else {
                info!("Compass link disabled in configuration, not attached");
            }
        }
        self
    }

    /// Attach a broadcast output. It is opened on [`connect`](Self::connect).
    pub fn with_output(self, sink: Box<dyn LineSink>) -> Self {
        lock_core(&self.core).sinks.push(sink);
        self
    }

    /// Attach the serial and UDP outputs and the per-beacon channels named in
    /// the configuration
    pub fn with_configured_outputs(self) -> Self {
        let outputs = lock_core(&self.core).config.outputs.clone();

        let mut combiner = self;
        if let Some(serial) = outputs.serial {
            let baud_rate = if serial.baud_rate == 0 { DEFAULT_BAUD_RATE } else { serial.baud_rate };
            combiner = combiner.with_output(Box::new(SerialLineSink::new(serial.port, baud_rate)));
        }
        if let Some(target) = outputs.udp {
            combiner = combiner.with_output(Box::new(UdpLineSink::new(target)));
        }
        for (raw, endpoint) in outputs.beacon_channels {
            combiner.set_beacon_channel(BeaconAddress::from_raw(raw), endpoint);
        }
        combiner
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Run `op` on the locked core, then deliver whatever events it raised
    fn with_core<R>(&self, op: impl FnOnce(&mut CombinerCore, Instant, &mut Vec<CombinerEvent>) -> R) -> R {
        let mut events = Vec::new();
        let now = self.now();
        let result = {
            let mut core = lock_core(&self.core);
            op(&mut core, now, &mut events)
        };
        self.dispatch(&events);
        result
    }

    fn dispatch(&self, events: &[CombinerEvent]) {
        if events.is_empty() {
            return;
        }
        let registry = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for event in events {
            for (_, listener) in &registry.entries {
                listener(event);
            }
        }
    }

    /// Register a listener; listeners run in registration order and must not
    /// register further listeners from inside the callback
    pub fn add_event_listener(&self, listener: EventListener) -> ListenerHandle {
        let mut registry = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let handle = ListenerHandle(registry.next_id);
        registry.entries.push((handle, listener));
        handle
    }

    pub fn remove_event_listener(&self, handle: ListenerHandle) -> bool {
        let mut registry = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = registry.entries.len();
        registry.entries.retain(|(h, _)| *h != handle);
        registry.entries.len() != before
    }

    // Link events

    pub fn handle_interrogator_event(&self, event: InterrogatorEvent) {
        self.with_core(|core, now, events| core.on_interrogator_event(event, now, events));
    }

    pub fn handle_gnss_event(&self, event: GnssEvent) {
        self.with_core(|core, now, _| core.on_gnss_event(event, now));
    }

    pub fn handle_compass_event(&self, event: CompassEvent) {
        self.with_core(|core, now, _| core.on_compass_event(event, now));
    }

    /// Periodic housekeeping: applies the location override and checks the
    /// polling watchdog
    pub fn tick(&self) {
        self.with_core(|core, now, _| core.tick(now));
    }

    // Connection

    pub fn connect(&self) -> bool {
        self.with_core(|core, now, _| core.connect(now))
    }

    pub fn disconnect(&self) -> bool {
        self.with_core(|core, _, events| core.disconnect(events))
    }

    pub fn is_connected(&self) -> bool {
        lock_core(&self.core).interrogator.is_active()
    }

    pub fn is_interrogation_active(&self) -> bool {
        lock_core(&self.core).polling.is_active()
    }

    pub fn is_device_detected(&self, device: DeviceId) -> bool {
        let core = lock_core(&self.core);
        match device {
            DeviceId::Interrogator => core.interrogator.is_detected(),
            DeviceId::Gnss => core.gnss.as_ref().map_or(false, |l| l.is_detected()),
            DeviceId::Compass => core.compass.as_ref().map_or(false, |l| l.is_detected()),
        }
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        lock_core(&self.core).device_info.clone()
    }

    // Interrogation control

    /// Poll nobody until resumed
    pub fn pause(&self) -> bool {
        self.with_core(|core, _, _| {
            let salinity = core.config.salinity_psu;
            let max_distance = core.config.max_distance_m;
            core.query("Pause", |link| link.query_start_polling(0, salinity, max_distance))
        })
    }

    pub fn resume(&self) -> bool {
        self.with_core(|core, now, _| {
            let (mask, salinity, max_distance) =
                (core.config.address_mask, core.config.salinity_psu, core.config.max_distance_m);
            core.polling.touch(now);
            core.query("Resume", |link| link.query_start_polling(mask, salinity, max_distance))
        })
    }

    /// Ask a responder for a user-defined value; the answer arrives as
    /// [`CombinerEvent::UserDataResult`]
    pub fn request_user_data(&self, address: BeaconAddress, code: RequestCode) -> bool {
        if !address.is_valid() || !code.is_user_data() {
            warn!("User data request rejected: address {address}, code {code}");
            return false;
        }
        self.with_core(|core, _, _| core.query("User data request", |link| link.query_user_data(address, code)))
    }

    pub fn query_local_address(&self) -> bool {
        self.with_core(|core, _, _| core.query("Local address query", |link| link.query_local_address()))
    }

    pub fn set_local_address(&self, address: BeaconAddress) -> bool {
        if !address.is_valid() {
            return false;
        }
        self.with_core(|core, _, _| core.query("Local address change", |link| link.set_local_address(address)))
    }

    // Location override

    /// Force the station position and heading, refreshed every second
    pub fn set_location_override(&self, lat_deg: f64, lon_deg: f64, heading_deg: f64) -> bool {
        let valid = (-90.0..=90.0).contains(&lat_deg)
            && (-180.0..=180.0).contains(&lon_deg)
            && (0.0..=360.0).contains(&heading_deg);
        if !valid {
            warn!("Location override rejected: {lat_deg}, {lon_deg}, {heading_deg}");
            return false;
        }

        self.stop_timer();
        self.with_core(|core, now, _| {
            core.location_override = Some(LocationOverride {
                lat_deg,
                lon_deg,
                heading_deg,
            });
            core.apply_override(now);
        });
        self.start_timer();

        info!("Location override enabled: {lat_deg:.6}, {lon_deg:.6}, {heading_deg:.1}");
        true
    }

    pub fn disable_location_override(&self) -> bool {
        self.stop_timer();
        lock_core(&self.core).location_override = None;
        info!("Location override disabled");
        true
    }

    pub fn location_override(&self) -> Option<LocationOverride> {
        lock_core(&self.core).location_override
    }

    fn start_timer(&self) {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let core = Arc::clone(&self.core);
        let clock = Arc::clone(&self.clock);

        let spawned = thread::Builder::new()
            .name("location-override".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(OVERRIDE_PERIOD) {
                    Err(RecvTimeoutError::Timeout) => {
                        let now = clock.now();
                        lock_core(&core).tick(now);
                    }
                    _ => break,
                }
            });

        match spawned {
            Ok(handle) => {
                *self.timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(OverrideTimer { stop, handle });
            }
            Err(e) => error!("Could not start override timer: {e}"),
        }
    }

    fn stop_timer(&self) {
        let timer = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(timer) = timer {
            let _ = timer.stop.send(());
            if timer.handle.join().is_err() {
                error!("Override timer thread panicked");
            }
        }
    }

    // Per-beacon channels

    /// Open a private UDP channel for one responder
    pub fn set_beacon_channel(&self, address: BeaconAddress, endpoint: SocketAddr) -> bool {
        if !address.is_valid() {
            return false;
        }
        match UdpLineSink::connect(endpoint) {
            Ok(sink) => self.attach_beacon_channel(address, Box::new(sink)),
            Err(e) => {
                error!("Beacon {address} channel to {endpoint}: {e}");
                false
            }
        }
    }

    /// Attach an already opened sink as a responder's private channel
    pub fn attach_beacon_channel(&self, address: BeaconAddress, sink: Box<dyn LineSink>) -> bool {
        if !address.is_valid() {
            return false;
        }
        let description = sink.describe();
        lock_core(&self.core).beacon(address).set_channel(sink);
        info!("Beacon {address} channel: {description}");
        true
    }

    pub fn clear_beacon_channel(&self, address: BeaconAddress) -> bool {
        if let Some(beacon) = lock_core(&self.core).beacons.get_mut(&address) {
            if beacon.clear_channel() {
                info!("Beacon {address} channel closed");
            }
        }
        true
    }

    // LBL reference

    pub fn set_reference_local(&self, points: [(f64, f64); 3]) -> bool {
        self.with_core(|core, now, _| core.set_reference_points(points, None, now))
    }

    pub fn set_reference_geographic(&self, points: [GeoPoint; 3]) -> bool {
        self.with_core(|core, now, _| core.set_reference_geographic(points, now))
    }

    pub fn discard_reference(&self) -> bool {
        lock_core(&self.core).discard_reference()
    }

    pub fn reference_origin(&self) -> Option<GeoPoint> {
        lock_core(&self.core).reference_origin
    }

    // Read access

    pub fn output_format(&self) -> OutputFormat {
        let core = lock_core(&self.core);
        OutputFormat {
            station: core.station.header_line(),
            beacon: BeaconState::new(BeaconAddress::Addr1).header_line(),
        }
    }

    pub fn station(&self) -> StationLocals {
        lock_core(&self.core).station.clone()
    }

    pub fn beacon_snapshot(&self, address: BeaconAddress) -> Option<BeaconSnapshot> {
        lock_core(&self.core).beacons.get(&address).map(BeaconState::snapshot)
    }

    pub fn success_statistics(&self, address: BeaconAddress) -> Option<String> {
        lock_core(&self.core)
            .beacons
            .get(&address)
            .map(BeaconState::success_statistics)
    }

    pub fn config(&self) -> CombinerConfig {
        lock_core(&self.core).config.clone()
    }

    /// Carry out a parsed control command
    pub fn execute(&self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::Connect => ControlReply::Done(self.connect()),
            ControlCommand::Disconnect => ControlReply::Done(self.disconnect()),
            ControlCommand::QueryConnection => ControlReply::Report(format!("CNA,{}", self.is_connected())),
            ControlCommand::QueryInterrogation => {
                ControlReply::Report(format!("ITG,{}", self.is_interrogation_active()))
            }
            ControlCommand::QueryDetected(device) => {
                ControlReply::Report(format!("DET,{},{}", device, self.is_device_detected(device)))
            }
            ControlCommand::UserDataRequest { address, code } => {
                ControlReply::Done(self.request_user_data(address, code))
            }
            ControlCommand::QueryLocationOverride => {
                ControlReply::Report(format!("LHO,{}", self.location_override().is_some()))
            }
            ControlCommand::SetLocationOverride(Some((lat, lon, heading))) => {
                ControlReply::Done(self.set_location_override(lat, lon, heading))
            }
            ControlCommand::SetLocationOverride(None) => ControlReply::Done(self.disable_location_override()),
            ControlCommand::QueryOutputFormat => ControlReply::Report(self.output_format().to_string()),
            ControlCommand::SetBeaconChannel {
                address,
                endpoint: Some(endpoint),
            } => ControlReply::Done(self.set_beacon_channel(address, endpoint)),
            ControlCommand::SetBeaconChannel { address, endpoint: None } => {
                ControlReply::Done(self.clear_beacon_channel(address))
            }
            ControlCommand::QueryLocalAddress => ControlReply::Done(self.query_local_address()),
            ControlCommand::SetLocalAddress(address) => ControlReply::Done(self.set_local_address(address)),
            ControlCommand::Pause => ControlReply::Done(self.pause()),
            ControlCommand::Resume => ControlReply::Done(self.resume()),
            ControlCommand::SetReference(ReferenceCommand::Discard) => ControlReply::Done(self.discard_reference()),
            ControlCommand::SetReference(ReferenceCommand::Local(points)) => {
                ControlReply::Done(self.set_reference_local(points))
            }
            ControlCommand::SetReference(ReferenceCommand::Geographic(points)) => {
                ControlReply::Done(self.set_reference_geographic(points))
            }
        }
    }
}

impl Drop for PositioningCombiner {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
