/*
 * This file is part of hpdstorm.
 *
 * Copyright (C) 2025 hpdstorm contributors
 *
 * hpdstorm is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * hpdstorm is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with hpdstorm. If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-lines event log for simulator runs
//!
//! One object per line: `{"ts_ms": .., "event": .., "data": ..}`. Logging
//! is a no-op until [`init_event_log`] opened a file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use hpd_error::{HotplugError, Result};
use lazy_static::lazy_static;
use serde_json::{json, Value};

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Open (append) the event log at `path`, or close it with `None`
pub fn init_event_log(path: Option<&Path>) -> Result<()> {
    let file = match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| HotplugError::FileWrite {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| HotplugError::FileWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(file)
        }
        None => None,
    };

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = file;
    }
    Ok(())
}

pub fn is_enabled() -> bool {
    LOG_FILE.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

pub fn log_event(event: &str, data: Value) {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(f) = guard.as_mut() {
            let line = json!({
                "ts_ms": now_millis(),
                "event": event,
                "data": data,
            });
            // Never let a full disk break a simulation
            let _ = writeln!(f, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_events_are_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.json");

        init_event_log(Some(&path)).unwrap();
        assert!(is_enabled());
        log_event("step", json!({"op": "init"}));
        log_event("report", json!({"irq_setups": 1}));
        init_event_log(None).unwrap();
        assert!(!is_enabled());

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "step");
        assert_eq!(lines[1]["data"]["irq_setups"], 1);
        assert!(lines[0]["ts_ms"].is_u64());
    }

    #[test]
    #[serial]
    fn test_disabled_log_is_noop() {
        init_event_log(None).unwrap();
        log_event("ignored", Value::Null);
        assert!(!is_enabled());
    }
}
