//! Device-name heuristics.
//!
//! Pure string predicates over device names, kept independent of the live
//! device enumeration call so selection policy is testable without hardware.
//! Loopback and virtual devices carry recognizable name markers on every
//! platform; microphone-style endpoints are recognized so they are never
//! probed for system-audio selection.

/// Name markers of virtual audio devices (routing software, cables).
const VIRTUAL_MARKERS: &[&str] = &[
    "blackhole",
    "soundflower",
    "loopback",
    "virtual",
    "vb-audio",
    "cable",
    "aggregate",
];

/// Name markers of loopback/monitor endpoints that carry system output.
const LOOPBACK_MARKERS: &[&str] = &[".monitor", "monitor of", "blackhole", "cable output"];

/// Name markers of microphone/communication endpoints.
const MIC_MARKERS: &[&str] = &["microphone", "webcam", "headset", "communications"];

/// Device name patterns that are never useful for capture (hardware
/// subdevices and digital outputs exposed as inputs by ALSA).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// Check if a device name matches any blacklist pattern (case-insensitive
/// substring match).
pub fn is_blacklisted(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Check if a device looks like a microphone or communications endpoint.
///
/// The bare token "mic" is matched word-wise so that "USB Mic" is caught
/// but "Dynamic Audio Out" is not.
pub fn is_microphone_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    if MIC_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == "mic")
}

/// Check if a device is a virtual audio device.
pub fn is_virtual_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    VIRTUAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Check if a device is a loopback/monitor endpoint carrying system output.
pub fn is_loopback_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Check if a device name should be filtered out entirely.
pub fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Order candidate names for probing: loopback and virtual devices first.
///
/// They are the endpoints most likely to carry system audio, so probing them
/// first finds a signal with the fewest device opens.
pub fn probe_order(names: &[String]) -> Vec<String> {
    let mut preferred = Vec::new();
    let mut rest = Vec::new();
    for name in names {
        if is_loopback_device(name) || is_virtual_device(name) {
            preferred.push(name.clone());
        } else {
            rest.push(name.clone());
        }
    }
    preferred.extend(rest);
    preferred
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_blacklisted_case_insensitive() {
        let blacklist = patterns(&["microphone", "webcam"]);
        assert!(is_blacklisted("Built-in Microphone", &blacklist));
        assert!(is_blacklisted("MICROPHONE (USB)", &blacklist));
        assert!(is_blacklisted("HD Webcam Audio", &blacklist));
        assert!(!is_blacklisted("Monitor of Built-in Audio", &blacklist));
    }

    #[test]
    fn test_is_blacklisted_empty_patterns() {
        assert!(!is_blacklisted("anything", &[]));
    }

    #[test]
    fn test_is_microphone_like() {
        assert!(is_microphone_like("Built-in Microphone"));
        assert!(is_microphone_like("USB Mic"));
        assert!(is_microphone_like("Headset Earphone"));
        assert!(is_microphone_like("Communications Device"));
        assert!(!is_microphone_like("Monitor of Built-in Audio"));
        // "mic" must not match inside another word
        assert!(!is_microphone_like("Dynamic Audio Out"));
    }

    #[test]
    fn test_is_virtual_device() {
        assert!(is_virtual_device("BlackHole 2ch"));
        assert!(is_virtual_device("VB-Audio Virtual Cable"));
        assert!(is_virtual_device("Soundflower (2ch)"));
        assert!(is_virtual_device("Aggregate Device"));
        assert!(!is_virtual_device("Built-in Audio"));
    }

    #[test]
    fn test_is_loopback_device() {
        assert!(is_loopback_device("alsa_output.pci-0000.analog-stereo.monitor"));
        assert!(is_loopback_device("Monitor of Built-in Audio"));
        assert!(is_loopback_device("CABLE Output (VB-Audio)"));
        assert!(is_loopback_device("BlackHole 16ch"));
        assert!(!is_loopback_device("Built-in Microphone"));
    }

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Monitor of Built-in Audio"));
    }

    #[test]
    fn test_probe_order_prefers_loopback_and_virtual() {
        let names = patterns(&[
            "Built-in Audio",
            "Monitor of Built-in Audio",
            "pipewire",
            "BlackHole 2ch",
        ]);
        let ordered = probe_order(&names);
        assert_eq!(
            ordered,
            patterns(&[
                "Monitor of Built-in Audio",
                "BlackHole 2ch",
                "Built-in Audio",
                "pipewire",
            ])
        );
    }

    #[test]
    fn test_probe_order_keeps_relative_order() {
        let names = patterns(&["a", "b", "c"]);
        assert_eq!(probe_order(&names), names);
    }
}
