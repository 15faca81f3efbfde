//! Decoders for Grbl query responses.
//!
//! Each decoder takes the payload lines of a completed response (terminal
//! marker already stripped) and returns a structured value:
//! - `?` status report: `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`
//! - `$$` settings: one `$<code>=<value>` per line
//! - `$` help: `[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $C $X $H ~ ! ? ctrl-x]`

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::ProtocolError;

/// Three-axis coordinate triple.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Planner and serial receive buffer availability (`Bf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks.
    pub planner_blocks: u32,
    /// Free bytes in the serial receive buffer.
    pub rx_bytes: u32,
}

/// Current feed rate and spindle speed (`FS`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedAndSpeed {
    pub feed_rate: f64,
    pub spindle: f64,
}

/// Override percentages (`Ov`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideValues {
    pub feed: u32,
    pub rapids: u32,
    pub spindle: u32,
}

/// Decoded `?` status report.
///
/// Optional fields are present only if the controller reported them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Machine state (`Idle`, `Run`, `Hold:0`, `Alarm`, ...).
    pub state: String,
    /// Machine position (`MPos`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_position: Option<Axes>,
    /// Work coordinate offset (`WCO`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_coordinate_offset: Option<Axes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<BufferState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_and_speed: Option<FeedAndSpeed>,
    /// Triggered input pins (`Pn`), e.g. `XYZPDHRS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_values: Option<OverrideValues>,
}

impl MachineStatus {
    /// Parse a single status report line.
    pub fn parse(line: &str) -> Result<MachineStatus, ProtocolError> {
        let body = line
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(|| ProtocolError::new(line, "status report wrapped in <...>"))?;

        let mut segments = body.split('|');
        let state = segments.next().unwrap_or_default();
        if state.is_empty() {
            return Err(ProtocolError::new(line, "status report starting with a machine state"));
        }

        let mut status = MachineStatus {
            state: state.to_string(),
            ..MachineStatus::default()
        };

        for segment in segments {
            // Segments without a key are firmware-specific; skip them.
            let Some((key, values)) = segment.split_once(':') else {
                continue;
            };

            match key {
                "MPos" => status.machine_position = Some(parse_axes(line, values)?),
                "WCO" => status.work_coordinate_offset = Some(parse_axes(line, values)?),
                "Bf" => {
                    let [planner_blocks, rx_bytes] = parse_fields::<u32, 2>(line, values, "Bf:<blocks>,<bytes>")?;
                    status.buffer = Some(BufferState { planner_blocks, rx_bytes });
                }
                "FS" => {
                    let [feed_rate, spindle] = parse_fields::<f64, 2>(line, values, "FS:<feed>,<spindle>")?;
                    status.feed_and_speed = Some(FeedAndSpeed { feed_rate, spindle });
                }
                "Pn" => status.pin_state = Some(values.to_string()),
                "Ov" => {
                    let [feed, rapids, spindle] =
                        parse_fields::<u32, 3>(line, values, "Ov:<feed>,<rapids>,<spindle>")?;
                    status.override_values = Some(OverrideValues { feed, rapids, spindle });
                }
                _ => {}
            }
        }

        Ok(status)
    }
}

fn parse_axes(line: &str, values: &str) -> Result<Axes, ProtocolError> {
    let [x, y, z] = parse_fields::<f64, 3>(line, values, "coordinates <x>,<y>,<z>")?;
    Ok(Axes { x, y, z })
}

/// Parse exactly `N` comma-separated numbers.
fn parse_fields<T: std::str::FromStr + Copy + Default, const N: usize>(
    line: &str,
    values: &str,
    expected: &str,
) -> Result<[T; N], ProtocolError> {
    let mut out = [T::default(); N];
    let mut parts = values.split(',');

    for slot in out.iter_mut() {
        *slot = parts
            .next()
            .and_then(|part| part.trim().parse().ok())
            .ok_or_else(|| ProtocolError::new(line, expected))?;
    }
    if parts.next().is_some() {
        return Err(ProtocolError::new(line, expected));
    }

    Ok(out)
}

/// A single controller setting, enriched from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    /// Setting code without the `$`.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw value as reported.
    pub value: String,
}

impl Setting {
    /// Parse a `$<code>=<value>` line.
    ///
    /// The value runs to the first space; anything after it (some firmware
    /// builds append a comment) is ignored.
    pub fn parse(line: &str, catalog: &Catalog) -> Result<Setting, ProtocolError> {
        let malformed = || ProtocolError::new(line, "setting line \"$<code>=<value>\"");

        let (code, rest) = line
            .strip_prefix('$')
            .and_then(|body| body.split_once('='))
            .ok_or_else(malformed)?;

        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(malformed());
        }

        let value = rest.split(' ').next().unwrap_or_default();
        if value.is_empty() {
            return Err(malformed());
        }

        let entry = catalog.setting(code);
        Ok(Setting {
            code: code.to_string(),
            name: entry.map(|e| e.name.clone()),
            units: entry.map(|e| e.units.clone()),
            description: entry.map(|e| e.description.clone()),
            value: value.to_string(),
        })
    }
}

/// Decode a `?` response. The report is the last payload line.
pub fn decode_status(lines: &[String]) -> Result<MachineStatus, ProtocolError> {
    let line = lines
        .last()
        .ok_or_else(|| ProtocolError::new("", "a status report line"))?;
    MachineStatus::parse(line)
}

/// Decode a `$$` response: every payload line is a setting.
pub fn decode_settings(lines: &[String], catalog: &Catalog) -> Result<Vec<Setting>, ProtocolError> {
    lines.iter().map(|line| Setting::parse(line, catalog)).collect()
}

/// Decode a `$` response into the help text between `[HLP:` and `]`.
pub fn decode_help(lines: &[String]) -> Result<String, ProtocolError> {
    let line = lines
        .last()
        .ok_or_else(|| ProtocolError::new("", "a help line \"[HLP:...]\""))?;

    line.strip_prefix("[HLP:")
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::new(line.as_str(), "a help line \"[HLP:...]\""))
}
