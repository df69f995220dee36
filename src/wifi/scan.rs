//! Robot access point discovery

use robot_link_shared::link;

/// SSID prefixes used by robot firmware for its own access point
const ROBOT_SSID_PREFIXES: [&str; 4] = ["ROBOT_", "Robot", "ESP_", "Arduino_"];

/// A WiFi network seen in a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    /// Signal quality in percent
    pub signal: u8,
}

impl AccessPoint {
    pub fn new(ssid: impl Into<String>, signal: u8) -> Self {
        Self {
            ssid: ssid.into(),
            signal: signal.min(100),
        }
    }

    /// Signal strength as 0-4 bars
    pub fn signal_level(&self) -> u8 {
        (u16::from(self.signal.min(100)) * 5 / 101) as u8
    }
}

/// Whether `ssid` looks like a robot access point
pub fn is_robot_ssid(ssid: &str) -> bool {
    let ssid = ssid.trim();
    ssid.eq_ignore_ascii_case(link::DEFAULT_WIFI_SSID)
        || ROBOT_SSID_PREFIXES
            .iter()
            .any(|prefix| ssid.starts_with(prefix))
}

/// Keep robot access points, strongest first, one entry per SSID
pub fn filter_robot_aps(scan: impl IntoIterator<Item = AccessPoint>) -> Vec<AccessPoint> {
    let mut robots: Vec<AccessPoint> = Vec::new();
    for mut ap in scan {
        ap.ssid = ap.ssid.trim().to_string();
        if ap.ssid.is_empty() || !is_robot_ssid(&ap.ssid) {
            continue;
        }
        match robots.iter_mut().find(|seen| seen.ssid == ap.ssid) {
            Some(seen) => seen.signal = seen.signal.max(ap.signal),
            None => robots.push(ap),
        }
    }
    robots.sort_by(|a, b| b.signal.cmp(&a.signal).then_with(|| a.ssid.cmp(&b.ssid)));
    robots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_ssids() {
        assert!(is_robot_ssid("Robot_AP"));
        assert!(is_robot_ssid("robot_ap"));
        assert!(is_robot_ssid("ROBOT_7"));
        assert!(is_robot_ssid("RobotArm"));
        assert!(is_robot_ssid("ESP_1A2B"));
        assert!(is_robot_ssid("Arduino_Uno"));
        assert!(!is_robot_ssid("HomeNet"));
        assert!(!is_robot_ssid("esp_lowercase"));
        assert!(!is_robot_ssid(""));
    }

    #[test]
    fn test_filter_keeps_strongest_robot_networks() {
        let scan = vec![
            AccessPoint::new("HomeNet", 90),
            AccessPoint::new("ESP_1A2B", 40),
            AccessPoint::new(" Robot_AP ", 55),
            AccessPoint::new("", 99),
            AccessPoint::new("Robot_AP", 70),
        ];

        assert_eq!(
            filter_robot_aps(scan),
            vec![AccessPoint::new("Robot_AP", 70), AccessPoint::new("ESP_1A2B", 40)]
        );
    }

    #[test]
    fn test_signal_level() {
        assert_eq!(AccessPoint::new("a", 0).signal_level(), 0);
        assert_eq!(AccessPoint::new("a", 20).signal_level(), 0);
        assert_eq!(AccessPoint::new("a", 50).signal_level(), 2);
        assert_eq!(AccessPoint::new("a", 100).signal_level(), 4);
        assert_eq!(AccessPoint::new("a", 250).signal, 100);
    }
}
