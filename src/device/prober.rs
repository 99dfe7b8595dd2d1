//! Device probing and auto-selection.
//!
//! A probe opens a device only briefly (sub-second) to measure its level,
//! and only when that device is NOT held open by the capture engine. Opening
//! an already-active device for measurement is the documented cause of
//! audible glitches in downstream consumers, so the probe gate rejects it
//! before any device-open call is made.

use crate::config::DeviceConfig;
use crate::defaults;
use crate::device::heuristics::{is_blacklisted, is_microphone_like};
use crate::error::{Result, SoundlogError};
use std::time::Duration;

/// Measured level of one probed device.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub device: String,
    pub rms_level: f32,
    pub peak_level: f32,
    /// True when the RMS exceeded the signal floor.
    pub has_signal: bool,
}

/// The device chosen by [`DeviceProber::select_device`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// A probed device with measurable signal.
    Active(ProbeResult),
    /// No device had signal; the configured preferred device is used untested.
    Preferred(String),
}

impl ProbeOutcome {
    /// Name of the selected device.
    pub fn device_name(&self) -> &str {
        match self {
            ProbeOutcome::Active(result) => &result.device,
            ProbeOutcome::Preferred(name) => name,
        }
    }
}

/// Probes candidate devices and selects the capture source.
pub struct DeviceProber {
    blacklist: Vec<String>,
    preferred_device: Option<String>,
    signal_floor: f32,
    probe_duration: Duration,
    /// Device currently held open by the capture engine, if any.
    active_device: Option<String>,
}

impl DeviceProber {
    /// Creates a prober from the device configuration.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            blacklist: config.blacklist.clone(),
            preferred_device: config.preferred_device.clone(),
            signal_floor: defaults::PROBE_SIGNAL_FLOOR,
            probe_duration: Duration::from_millis(defaults::PROBE_DURATION_MS),
            active_device: None,
        }
    }

    /// Overrides the signal floor.
    pub fn with_signal_floor(mut self, floor: f32) -> Self {
        self.signal_floor = floor;
        self
    }

    /// Overrides the probe duration.
    pub fn with_probe_duration(mut self, duration: Duration) -> Self {
        self.probe_duration = duration;
        self
    }

    /// Registers the device the capture engine currently holds open.
    ///
    /// That device is excluded from probing for as long as it is registered.
    pub fn with_active_device(mut self, name: Option<String>) -> Self {
        self.active_device = name;
        self
    }

    /// Checks whether a device may be opened for probing.
    ///
    /// Pure gate over the device name; rejection means no device-open call
    /// happens at all.
    pub fn ensure_probeable(&self, name: &str) -> Result<()> {
        if let Some(active) = &self.active_device
            && active == name
        {
            return Err(SoundlogError::ProbeRejected {
                device: name.to_string(),
                reason: "device is held open by the capture engine".to_string(),
            });
        }
        if is_blacklisted(name, &self.blacklist) {
            return Err(SoundlogError::ProbeRejected {
                device: name.to_string(),
                reason: "device name matches the blacklist".to_string(),
            });
        }
        if is_microphone_like(name) {
            return Err(SoundlogError::ProbeRejected {
                device: name.to_string(),
                reason: "device looks like a microphone endpoint".to_string(),
            });
        }
        Ok(())
    }

    /// Picks the loudest result with signal, if any.
    pub fn pick_best<'a>(&self, results: &'a [ProbeResult]) -> Option<&'a ProbeResult> {
        results
            .iter()
            .filter(|r| r.has_signal)
            .max_by(|a, b| a.rms_level.total_cmp(&b.rms_level))
    }

    /// Resolves the selection from measured results, applying the preferred
    /// fallback when nothing had signal.
    pub fn select_from_results(&self, results: &[ProbeResult]) -> Result<ProbeOutcome> {
        if let Some(best) = self.pick_best(results) {
            return Ok(ProbeOutcome::Active(best.clone()));
        }
        if let Some(preferred) = &self.preferred_device {
            return Ok(ProbeOutcome::Preferred(preferred.clone()));
        }
        Err(SoundlogError::NoActiveDevice)
    }
}

#[cfg(feature = "cpal-audio")]
impl DeviceProber {
    /// Probes a single device by name and measures its signal level.
    ///
    /// The stream exists only within this call: it is dropped (and the
    /// device closed) when the probe window ends, before returning.
    pub fn probe_level(&self, name: &str) -> Result<ProbeResult> {
        use crate::audio::capture::{find_device, with_suppressed_stderr};
        use crate::audio::level::{peak_f32, rms_f32};
        use cpal::traits::{DeviceTrait, StreamTrait};
        use std::sync::{Arc, Mutex};

        self.ensure_probeable(name)?;

        let device = find_device(name)?;
        let supported = with_suppressed_stderr(|| device.default_input_config()).map_err(|e| {
            SoundlogError::DeviceProbe {
                device: name.to_string(),
                message: format!("no input config: {}", e),
            }
        })?;
        let stream_config: cpal::StreamConfig = supported.into();

        let captured: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);

        {
            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(data);
                        }
                    },
                    |err| tracing::debug!(error = %err, "probe stream error"),
                    None,
                )
                .map_err(|e| SoundlogError::DeviceProbe {
                    device: name.to_string(),
                    message: format!("failed to open probe stream: {}", e),
                })?;

            stream.play().map_err(|e| SoundlogError::DeviceProbe {
                device: name.to_string(),
                message: format!("failed to start probe stream: {}", e),
            })?;

            std::thread::sleep(self.probe_duration);
            // Stream drops here, closing the device before any further work.
        }

        let samples = captured.lock().map_err(|_| SoundlogError::DeviceProbe {
            device: name.to_string(),
            message: "probe buffer poisoned".to_string(),
        })?;

        let rms = rms_f32(&samples);
        let peak = peak_f32(&samples);
        Ok(ProbeResult {
            device: name.to_string(),
            rms_level: rms,
            peak_level: peak,
            has_signal: rms > self.signal_floor,
        })
    }

    /// Enumerates candidate devices, probes each, and selects the capture
    /// source.
    ///
    /// Loopback and virtual devices are probed first since they are the
    /// endpoints most likely to carry system audio. Devices rejected by the
    /// probe gate are skipped without being opened; individual probe
    /// failures are logged and skipped.
    pub fn select_device(&self) -> Result<ProbeOutcome> {
        use crate::audio::capture::list_input_devices;
        use crate::device::heuristics::probe_order;

        let names = list_input_devices()?;
        let candidates: Vec<String> = names
            .into_iter()
            .filter(|name| self.ensure_probeable(name).is_ok())
            .collect();

        let mut results = Vec::new();
        for name in probe_order(&candidates) {
            match self.probe_level(&name) {
                Ok(result) => {
                    tracing::debug!(
                        device = %result.device,
                        rms = result.rms_level,
                        has_signal = result.has_signal,
                        "probed device"
                    );
                    results.push(result);
                }
                Err(e) => tracing::debug!(device = %name, error = %e, "probe failed, skipping"),
            }
        }

        self.select_from_results(&results)
    }
}
