// src/gps/gpsd.rs
//! GPSD client implementation

use super::data::Fix;
use crate::error::{LapError, Result};
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            LapError::Connection(format!(
                "Failed to connect to gpsd at {}:{}: {}",
                host, port, e
            ))
        })?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| LapError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON. Only TPV reports with a 2D or 3D fix
/// yield a position.
pub fn parse_gpsd_json(line: &str, timestamp: i64) -> Result<Option<Fix>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| LapError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data, timestamp)),
        "VERSION" => {
            parse_version_message(&msg.data);
            Ok(None)
        }
        "DEVICES" => {
            parse_devices_message(&msg.data);
            Ok(None)
        }
        // SKY, WATCH and friends carry nothing we time with
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>, timestamp: i64) -> Option<Fix> {
    let field = |name: &str| msg_data.get(name).and_then(|v| v.as_f64());

    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let mut fix = Fix::new(field("lat")?, field("lon")?, timestamp);

    if let Some(speed) = field("speed") {
        fix = fix.with_speed(speed);
    }
    if let Some(track) = field("track") {
        fix = fix.with_heading(track);
    }

    let accuracy = field("eph").or_else(|| match (field("epx"), field("epy")) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });
    if let Some(accuracy) = accuracy {
        fix = fix.with_accuracy(accuracy);
    }

    Some(fix)
}

/// Parse VERSION message (informational)
fn parse_version_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(version) = msg_data.get("release").and_then(|v| v.as_str()) {
        info!("Connected to gpsd version: {}", version);
    }
}

/// Parse DEVICES message (informational)
fn parse_devices_message(msg_data: &HashMap<String, serde_json::Value>) {
    if let Some(devices) = msg_data.get("devices").and_then(|v| v.as_array()) {
        info!("gpsd managing {} device(s)", devices.len());
        for device in devices {
            if let Some(path) = device.get("path").and_then(|v| v.as_str()) {
                info!("  Device: {}", path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tpv_parsing() {
        let json = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2023-01-01T12:00:00.000Z","ept":0.005,"lat":48.117,"lon":11.517,"alt":545.4,"epx":15.319,"epy":17.054,"epv":124.484,"track":10.3797,"speed":0.091,"climb":10.7,"eps":34.11,"epc":248.97}"#;

        let fix = parse_gpsd_json(json, 2_000).unwrap().unwrap();

        assert_eq!(fix.latitude, 48.117);
        assert_eq!(fix.longitude, 11.517);
        assert_eq!(fix.speed, Some(0.091));
        assert_eq!(fix.heading, Some(10.3797));
        // No eph: worst of epx/epy
        assert_eq!(fix.accuracy, 17.054);
        assert_eq!(fix.timestamp, 2_000);
    }

    #[test]
    fn test_tpv_prefers_eph() {
        let json = r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0,"eph":3.5,"epx":9.0,"epy":9.0}"#;
        let fix = parse_gpsd_json(json, 0).unwrap().unwrap();
        assert_eq!(fix.accuracy, 3.5);
        assert_eq!(fix.speed, None);
    }

    #[test]
    fn test_tpv_without_fix_ignored() {
        let json = r#"{"class":"TPV","mode":1,"lat":48.117,"lon":11.517}"#;
        assert!(parse_gpsd_json(json, 0).unwrap().is_none());

        let json = r#"{"class":"TPV","mode":3}"#;
        assert!(parse_gpsd_json(json, 0).unwrap().is_none());
    }

    #[test]
    fn test_sky_yields_nothing() {
        let json = r#"{"class":"SKY","device":"/dev/ttyUSB0","hdop":1.2,"satellites":[{"PRN":1,"ss":42,"used":true}]}"#;
        assert!(parse_gpsd_json(json, 0).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json() {
        let invalid_json = r#"{"invalid": json"#;
        assert!(matches!(
            parse_gpsd_json(invalid_json, 0),
            Err(LapError::Parse(_))
        ));
    }
}
