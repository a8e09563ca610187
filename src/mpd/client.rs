//! MPD command connection
//!
//! One TCP connection executing one command (or command list) at a time.
//! The connection is redialed lazily after an I/O failure; ACK errors leave
//! it usable. The server version from the handshake is kept for the version
//! resource and cleared while disconnected.

use super::proto::{self, MpdOutput};
use super::MpdError;
use crate::song::Song;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

pub(crate) struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub(crate) version: String,
}

pub(crate) async fn dial(addr: &str) -> Result<Connection, MpdError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (read, writer) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(MpdError::Closed);
    }
    let version = line
        .trim_end()
        .strip_prefix("OK MPD ")
        .ok_or_else(|| MpdError::Protocol(line.trim_end().to_string()))?
        .to_string();
    debug!(addr, version = %version, "connected to mpd");
    Ok(Connection {
        reader,
        writer,
        version,
    })
}

impl Connection {
    /// Send one command and read pairs until `OK` or `ACK`.
    pub(crate) async fn roundtrip(
        &mut self,
        command: &str,
    ) -> Result<Vec<(String, String)>, MpdError> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.read_response().await
    }

    pub(crate) async fn read_response(&mut self) -> Result<Vec<(String, String)>, MpdError> {
        let mut pairs = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(MpdError::Closed);
            }
            let line = line.trim_end_matches('\n');
            if line == "OK" {
                return Ok(pairs);
            }
            if line.starts_with("ACK ") {
                return Err(proto::parse_ack(line));
            }
            pairs.push(proto::parse_pair(line)?);
        }
    }
}

/// A queued batch of commands executed atomically via `command_list_begin`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<String>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.commands.push("clear".to_string());
    }

    pub fn add(&mut self, uri: &str) {
        self.commands.push(format!("add {}", proto::quote(uri)));
    }

    pub fn play(&mut self, pos: usize) {
        self.commands.push(format!("play {pos}"));
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn render(&self) -> String {
        let mut out = String::from("command_list_begin\n");
        for c in &self.commands {
            out.push_str(c);
            out.push('\n');
        }
        out.push_str("command_list_end");
        out
    }
}

/// Asynchronous MPD client
pub struct Client {
    addr: String,
    conn: tokio::sync::Mutex<Option<Connection>>,
    version: std::sync::Mutex<Option<String>>,
}

impl Client {
    /// Dial the server once to verify it is reachable and keep the
    /// connection for subsequent commands.
    pub async fn connect(addr: &str) -> Result<Self, MpdError> {
        let conn = dial(addr).await?;
        let version = conn.version.clone();
        Ok(Self {
            addr: addr.to_string(),
            conn: tokio::sync::Mutex::new(Some(conn)),
            version: std::sync::Mutex::new(Some(version)),
        })
    }

    /// Server version from the last successful handshake; `None` while
    /// disconnected.
    pub fn version(&self) -> Option<String> {
        self.version.lock().unwrap().clone()
    }

    async fn exec(&self, command: &str) -> Result<Vec<(String, String)>, MpdError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            match dial(&self.addr).await {
                Ok(conn) => {
                    *self.version.lock().unwrap() = Some(conn.version.clone());
                    *guard = Some(conn);
                }
                Err(err) => {
                    *self.version.lock().unwrap() = None;
                    return Err(err);
                }
            }
        }
        let Some(conn) = guard.as_mut() else {
            return Err(MpdError::Closed);
        };
        match conn.roundtrip(command).await {
            Ok(pairs) => Ok(pairs),
            Err(err @ MpdError::Command { .. }) => Err(err),
            Err(err) => {
                *guard = None;
                *self.version.lock().unwrap() = None;
                Err(err)
            }
        }
    }

    async fn exec_ok(&self, command: &str) -> Result<(), MpdError> {
        self.exec(command).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn status(&self) -> Result<HashMap<String, String>, MpdError> {
        Ok(proto::pairs_to_map(self.exec("status").await?))
    }

    pub async fn stats(&self) -> Result<HashMap<String, String>, MpdError> {
        Ok(proto::pairs_to_map(self.exec("stats").await?))
    }

    pub async fn replay_gain_status(&self) -> Result<HashMap<String, String>, MpdError> {
        Ok(proto::pairs_to_map(self.exec("replay_gain_status").await?))
    }

    pub async fn current_song(&self) -> Result<Song, MpdError> {
        let songs = proto::songs_from_pairs(self.exec("currentsong").await?);
        Ok(songs.into_iter().next().unwrap_or_default())
    }

    pub async fn playlist_info(&self) -> Result<Vec<Song>, MpdError> {
        Ok(proto::songs_from_pairs(self.exec("playlistinfo").await?))
    }

    pub async fn list_all_info(&self, path: &str) -> Result<Vec<Song>, MpdError> {
        let cmd = format!("listallinfo {}", proto::quote(path));
        Ok(proto::songs_from_pairs(self.exec(&cmd).await?))
    }

    pub async fn outputs(&self) -> Result<Vec<MpdOutput>, MpdError> {
        Ok(proto::outputs_from_pairs(self.exec("outputs").await?))
    }

    pub async fn list_mounts(&self) -> Result<Vec<HashMap<String, String>>, MpdError> {
        Ok(proto::records_from_pairs(
            self.exec("listmounts").await?,
            "mount",
        ))
    }

    pub async fn list_neighbors(&self) -> Result<Vec<HashMap<String, String>>, MpdError> {
        Ok(proto::records_from_pairs(
            self.exec("listneighbors").await?,
            "neighbor",
        ))
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Start a database update; returns the daemon's response pairs
    /// (`updating_db: <job>`).
    pub async fn update(&self, path: &str) -> Result<HashMap<String, String>, MpdError> {
        let cmd = if path.is_empty() {
            "update".to_string()
        } else {
            format!("update {}", proto::quote(path))
        };
        Ok(proto::pairs_to_map(self.exec(&cmd).await?))
    }

    pub async fn set_vol(&self, volume: i64) -> Result<(), MpdError> {
        self.exec_ok(&format!("setvol {volume}")).await
    }

    pub async fn repeat(&self, enable: bool) -> Result<(), MpdError> {
        self.exec_ok(&format!("repeat {}", bool_arg(enable))).await
    }

    pub async fn random(&self, enable: bool) -> Result<(), MpdError> {
        self.exec_ok(&format!("random {}", bool_arg(enable))).await
    }

    pub async fn single(&self, enable: bool) -> Result<(), MpdError> {
        self.exec_ok(&format!("single {}", bool_arg(enable))).await
    }

    pub async fn one_shot(&self) -> Result<(), MpdError> {
        self.exec_ok("single oneshot").await
    }

    pub async fn consume(&self, enable: bool) -> Result<(), MpdError> {
        self.exec_ok(&format!("consume {}", bool_arg(enable))).await
    }

    pub async fn seek_cur(&self, seconds: f64) -> Result<(), MpdError> {
        self.exec_ok(&format!("seekcur {seconds}")).await
    }

    pub async fn replay_gain_mode(&self, mode: &str) -> Result<(), MpdError> {
        self.exec_ok(&format!("replay_gain_mode {}", proto::quote(mode)))
            .await
    }

    pub async fn crossfade(&self, duration: Duration) -> Result<(), MpdError> {
        self.exec_ok(&format!("crossfade {}", duration.as_secs()))
            .await
    }

    /// Start playback; a negative position resumes without changing track.
    pub async fn play(&self, pos: i64) -> Result<(), MpdError> {
        if pos < 0 {
            self.exec_ok("play").await
        } else {
            self.exec_ok(&format!("play {pos}")).await
        }
    }

    pub async fn pause(&self, enable: bool) -> Result<(), MpdError> {
        self.exec_ok(&format!("pause {}", bool_arg(enable))).await
    }

    pub async fn next(&self) -> Result<(), MpdError> {
        self.exec_ok("next").await
    }

    pub async fn previous(&self) -> Result<(), MpdError> {
        self.exec_ok("previous").await
    }

    pub async fn enable_output(&self, id: &str) -> Result<(), MpdError> {
        self.exec_ok(&format!("enableoutput {}", proto::quote(id)))
            .await
    }

    pub async fn disable_output(&self, id: &str) -> Result<(), MpdError> {
        self.exec_ok(&format!("disableoutput {}", proto::quote(id)))
            .await
    }

    pub async fn output_set(&self, id: &str, name: &str, value: &str) -> Result<(), MpdError> {
        self.exec_ok(&format!(
            "outputset {} {} {}",
            proto::quote(id),
            proto::quote(name),
            proto::quote(value)
        ))
        .await
    }

    pub async fn exec_command_list(&self, list: &CommandList) -> Result<(), MpdError> {
        self.exec_ok(&list.render()).await
    }
}

fn bool_arg(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_render() {
        let mut list = CommandList::new();
        list.clear();
        list.add("foo/bar.mp3");
        list.play(1);
        assert_eq!(
            list.render(),
            "command_list_begin\nclear\nadd \"foo/bar.mp3\"\nplay 1\ncommand_list_end"
        );
    }
}
