// src/gps/replay.rs
//! Recorded fix files, one JSON object per line
//!
//! Replayed fixes are sent at the recorded spacing divided by the speed-up
//! factor. Their timestamps keep the recorded spacing, moved onto the live
//! clock, so lap times come out the same at any speed-up.

use super::data::Fix;
use crate::error::{LapError, Result};
use std::{
    io::{BufRead, Write},
    path::Path,
    time::Duration,
};

/// Parse one line of a replay file. Blank lines and `#` comments yield `None`.
pub fn parse_replay_line(line: &str) -> Result<Option<Fix>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fix: Fix = serde_json::from_str(line)
        .map_err(|e| LapError::Parse(format!("Invalid replay fix: {}", e)))?;
    Ok(Some(fix))
}

/// Load a whole replay file, refusing files whose timestamps run backwards
pub fn read_replay(path: &Path) -> Result<Vec<Fix>> {
    let file = std::fs::File::open(path).map_err(|e| {
        LapError::Other(format!("Failed to open replay {}: {}", path.display(), e))
    })?;

    let mut fixes: Vec<Fix> = Vec::new();
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        let fix = match parse_replay_line(&line) {
            Ok(Some(fix)) => fix,
            Ok(None) => continue,
            Err(e) => {
                return Err(LapError::Parse(format!(
                    "{} line {}: {}",
                    path.display(),
                    index + 1,
                    e
                )))
            }
        };

        if let Some(last) = fixes.last() {
            if fix.timestamp < last.timestamp {
                return Err(LapError::OutOfOrder {
                    last: last.timestamp,
                    received: fix.timestamp,
                });
            }
        }
        fixes.push(fix);
    }

    Ok(fixes)
}

/// Delay between two recorded fixes at the given speed-up
pub fn pacing(previous_ms: i64, next_ms: i64, speedup: f64) -> Duration {
    let gap = next_ms.saturating_sub(previous_ms).max(0) as f64;
    let speedup = if speedup.is_finite() && speedup > 0.0 {
        speedup
    } else {
        1.0
    };
    Duration::from_secs_f64(gap / speedup / 1000.0)
}

/// Move a recorded fix onto the live time base, `first_ms` landing on `base_ms`
pub fn restamp(fix: &Fix, first_ms: i64, base_ms: i64) -> Fix {
    Fix {
        timestamp: base_ms + (fix.timestamp - first_ms),
        ..*fix
    }
}

/// Append a fix as one replay line
pub fn write_replay_line<W: Write>(writer: &mut W, fix: &Fix) -> Result<()> {
    serde_json::to_writer(&mut *writer, fix)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let line = r#"{"latitude":43.99616,"longitude":11.371457,"accuracy":4.0,"speed":22.5,"heading":181.0,"timestamp":1200}"#;
        let fix = parse_replay_line(line).unwrap().unwrap();
        assert_eq!(fix.timestamp, 1200);
        assert_eq!(fix.speed, Some(22.5));

        assert!(parse_replay_line("   ").unwrap().is_none());
        assert!(parse_replay_line("# warmup lap").unwrap().is_none());
        assert!(parse_replay_line("{oops").is_err());
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");

        let mut file = std::fs::File::create(&path).unwrap();
        write_replay_line(&mut file, &Fix::new(0.0, 0.0, 0).with_speed(10.0)).unwrap();
        writeln!(file).unwrap();
        write_replay_line(&mut file, &Fix::new(0.0, 0.001, 1_000)).unwrap();
        drop(file);

        let fixes = read_replay(&path).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].speed, Some(10.0));
        assert_eq!(fixes[1].speed, None);
    }

    #[test]
    fn test_backwards_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        write_replay_line(&mut file, &Fix::new(0.0, 0.0, 5_000)).unwrap();
        write_replay_line(&mut file, &Fix::new(0.0, 0.0, 4_000)).unwrap();
        drop(file);

        assert!(matches!(
            read_replay(&path),
            Err(LapError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_pacing() {
        assert_eq!(pacing(0, 1_000, 1.0), Duration::from_millis(1_000));
        assert_eq!(pacing(0, 1_000, 4.0), Duration::from_millis(250));
        assert_eq!(pacing(1_000, 1_000, 2.0), Duration::ZERO);
        assert_eq!(pacing(0, 500, 0.0), Duration::from_millis(500));
    }

    #[test]
    fn test_restamp_keeps_recorded_spacing() {
        let fix = Fix::new(1.0, 2.0, 3_625_000).with_speed(30.0);
        let moved = restamp(&fix, 3_600_000, 700);
        assert_eq!(moved.timestamp, 25_700);
        assert_eq!((moved.latitude, moved.speed), (1.0, Some(30.0)));
    }
}
