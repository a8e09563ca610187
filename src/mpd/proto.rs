//! MPD wire protocol parsing
//!
//! Helpers shared by the client and the watcher: argument quoting, response
//! pair parsing, ACK parsing, and grouping of flat pair lists into songs,
//! outputs, and mount/neighbor records.

use super::MpdError;
use crate::song::Song;
use std::collections::HashMap;

/// Quote a command argument, escaping backslashes and double quotes.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Split a response line into a `key: value` pair.
pub fn parse_pair(line: &str) -> Result<(String, String), MpdError> {
    match line.split_once(": ") {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => {
            // "key:" with an empty value has no trailing space
            match line.strip_suffix(':') {
                Some(k) => Ok((k.to_string(), String::new())),
                None => Err(MpdError::Protocol(line.to_string())),
            }
        }
    }
}

/// Parse an `ACK [code@index] {command} message` error line.
pub fn parse_ack(line: &str) -> MpdError {
    let parse = || -> Option<MpdError> {
        let rest = line.strip_prefix("ACK [")?;
        let (code_index, rest) = rest.split_once("] {")?;
        let (code, index) = code_index.split_once('@')?;
        let (command, message) = rest.split_once("} ")?;
        Some(MpdError::Command {
            code: code.parse().ok()?,
            index: index.parse().ok()?,
            command: command.to_string(),
            message: message.to_string(),
        })
    };
    parse().unwrap_or_else(|| MpdError::Protocol(line.to_string()))
}

/// Collect pairs into a map; later duplicates win.
pub fn pairs_to_map(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

/// Group a `listallinfo`/`playlistinfo`/`currentsong` response into songs.
///
/// A song starts at each `file` key. `directory` and `playlist` entries (and
/// their attribute lines) are skipped.
pub fn songs_from_pairs(pairs: Vec<(String, String)>) -> Vec<Song> {
    let mut songs = Vec::new();
    let mut current: Option<Song> = None;
    for (key, value) in pairs {
        match key.as_str() {
            "file" => {
                if let Some(song) = current.take() {
                    songs.push(song);
                }
                let mut song = Song::new();
                song.insert(key, vec![value]);
                current = Some(song);
            }
            "directory" | "playlist" => {
                if let Some(song) = current.take() {
                    songs.push(song);
                }
            }
            _ => {
                if let Some(song) = current.as_mut() {
                    song.entry(key).or_default().push(value);
                }
            }
        }
    }
    if let Some(song) = current {
        songs.push(song);
    }
    songs
}

/// Group a flat pair list into records, starting a new record at `delimiter`.
pub fn records_from_pairs(
    pairs: Vec<(String, String)>,
    delimiter: &str,
) -> Vec<HashMap<String, String>> {
    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    for (key, value) in pairs {
        if key == delimiter {
            if let Some(record) = current.take() {
                records.push(record);
            }
            current = Some(HashMap::from([(key, value)]));
        } else if let Some(record) = current.as_mut() {
            record.insert(key, value);
        }
    }
    if let Some(record) = current {
        records.push(record);
    }
    records
}

/// One audio output as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpdOutput {
    pub id: String,
    pub name: String,
    pub plugin: String,
    pub enabled: bool,
    pub attributes: HashMap<String, String>,
}

/// Group an `outputs` response; records start at `outputid` and attribute
/// lines carry `name=value` payloads.
pub fn outputs_from_pairs(pairs: Vec<(String, String)>) -> Vec<MpdOutput> {
    let mut outputs = Vec::new();
    let mut current: Option<MpdOutput> = None;
    for (key, value) in pairs {
        match key.as_str() {
            "outputid" => {
                if let Some(output) = current.take() {
                    outputs.push(output);
                }
                current = Some(MpdOutput {
                    id: value,
                    name: String::new(),
                    plugin: String::new(),
                    enabled: false,
                    attributes: HashMap::new(),
                });
            }
            _ => {
                let Some(output) = current.as_mut() else {
                    continue;
                };
                match key.as_str() {
                    "outputname" => output.name = value,
                    "plugin" => output.plugin = value,
                    "outputenabled" => output.enabled = value == "1",
                    "attribute" => {
                        if let Some((name, attr)) = value.split_once('=') {
                            output.attributes.insert(name.to_string(), attr.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if let Some(output) = current {
        outputs.push(output);
    }
    outputs
}
