//! Operator control surface.
//!
//! A line protocol on its own TCP port, one command per line:
//!
//! ```text
//! set <tile|all> quality <1-100>
//! set <tile|all> sampling <444|422|420|gray>
//! get <tile>            -> tile <n> sampling <s> quality <q>
//! stats                 -> frames <n> bytes <n> skipped <n> degraded <n> [acks <node:frame,...>]
//! ```
//!
//! Every command gets exactly one reply line, `ok`, a value line, or
//! `err <reason>`. A bad command never closes the connection.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::acks::AckTracker;
use crate::broadcaster::BroadcastCounters;
use crate::error::Result;
use crate::params::{EncodingControl, SamplingMode};

const MAX_COMMAND_LINE: usize = 256;

// ── Command ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Tile(usize),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetQuality(Target, u8),
    SetSampling(Target, SamplingMode),
    Get(usize),
    Stats,
}

impl Command {
    /// Parse one command line.
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts.as_slice() {
            ["set", target, "quality", value] => {
                let quality = value
                    .parse::<u8>()
                    .ok()
                    .filter(|q| (1..=100).contains(q))
                    .ok_or_else(|| format!("quality must be 1-100, got '{value}'"))?;
                Ok(Command::SetQuality(parse_target(target)?, quality))
            }
            ["set", target, "sampling", value] => {
                let sampling = value
                    .parse::<SamplingMode>()
                    .map_err(|_| format!("sampling must be 444, 422, 420 or gray, got '{value}'"))?;
                Ok(Command::SetSampling(parse_target(target)?, sampling))
            }
            ["set", ..] => Err("usage: set <tile|all> quality <1-100> | sampling <mode>".to_string()),
            ["get", tile] => match parse_target(tile)? {
                Target::Tile(n) => Ok(Command::Get(n)),
                Target::All => Err("get takes a single tile".to_string()),
            },
            ["stats"] => Ok(Command::Stats),
            [] => Err("empty command".to_string()),
            _ => Err(format!("unknown command: '{input}'")),
        }
    }
}

fn parse_target(s: &str) -> std::result::Result<Target, String> {
    if s == "all" {
        return Ok(Target::All);
    }
    s.parse::<usize>()
        .map(Target::Tile)
        .map_err(|_| format!("bad tile '{s}'"))
}

// ── ControlSurface ───────────────────────────────────────────────

/// Applies operator commands to the live pipeline.
pub struct ControlSurface {
    params: Arc<EncodingControl>,
    counters: Arc<BroadcastCounters>,
    acks: Option<Arc<AckTracker>>,
}

impl ControlSurface {
    pub fn new(params: Arc<EncodingControl>, counters: Arc<BroadcastCounters>) -> Self {
        Self {
            params,
            counters,
            acks: None,
        }
    }

    pub fn with_acks(mut self, acks: Arc<AckTracker>) -> Self {
        self.acks = Some(acks);
        self
    }

    /// Execute one line and produce its reply.
    pub fn handle_line(&self, line: &str) -> String {
        match Command::parse(line).and_then(|cmd| self.execute(cmd)) {
            Ok(reply) => reply,
            Err(reason) => format!("err {reason}"),
        }
    }

    fn execute(&self, cmd: Command) -> std::result::Result<String, String> {
        match cmd {
            Command::SetQuality(Target::All, q) => {
                for tile in 0..self.params.tile_count() {
                    self.params.set_quality(tile, q).map_err(|e| e.to_string())?;
                }
                info!(quality = q, "quality set on all tiles");
                Ok("ok".into())
            }
            Command::SetQuality(Target::Tile(n), q) => {
                self.params.set_quality(n, q).map_err(|e| e.to_string())?;
                info!(tile = n, quality = q, "quality set");
                Ok("ok".into())
            }
            Command::SetSampling(Target::All, s) => {
                for tile in 0..self.params.tile_count() {
                    self.params.set_sampling(tile, s).map_err(|e| e.to_string())?;
                }
                info!(sampling = %s, "sampling set on all tiles");
                Ok("ok".into())
            }
            Command::SetSampling(Target::Tile(n), s) => {
                self.params.set_sampling(n, s).map_err(|e| e.to_string())?;
                info!(tile = n, sampling = %s, "sampling set");
                Ok("ok".into())
            }
            Command::Get(n) => {
                let p = self
                    .params
                    .get(n)
                    .ok_or_else(|| format!("no tile {n} (wall has {})", self.params.tile_count()))?;
                Ok(format!("tile {n} sampling {} quality {}", p.sampling, p.quality))
            }
            Command::Stats => {
                let stats = self.counters.snapshot();
                match &self.acks {
                    Some(acks) => Ok(format!("{stats} acks {}", acks.summary())),
                    None => Ok(stats.to_string()),
                }
            }
        }
    }

    /// Serve one operator connection until it closes.
    pub async fn handle_connection<T>(&self, io: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_COMMAND_LINE));
        while let Some(line) = framed.next().await {
            let reply = match line {
                Ok(line) => self.handle_line(&line),
                Err(tokio_util::codec::LinesCodecError::MaxLineLengthExceeded) => {
                    "err line too long".to_string()
                }
                Err(e) => return Err(e.into()),
            };
            framed.send(reply).await?;
        }
        Ok(())
    }

    /// Accept operator connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "control surface listening");
        }
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("control accept error: {e}");
                    continue;
                }
            };
            debug!(%peer, "operator connected");
            let surface = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = surface.handle_connection(stream).await {
                    debug!(%peer, "operator connection ended: {e}");
                }
            });
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EncodingParams;

    fn surface(tiles: usize) -> ControlSurface {
        ControlSurface::new(
            Arc::new(EncodingControl::new(tiles, EncodingParams::default())),
            Arc::new(BroadcastCounters::default()),
        )
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse("set 2 quality 40"),
            Ok(Command::SetQuality(Target::Tile(2), 40))
        );
        assert_eq!(
            Command::parse("  set all sampling gray "),
            Ok(Command::SetSampling(Target::All, SamplingMode::Gray))
        );
        assert_eq!(Command::parse("get 0"), Ok(Command::Get(0)));
        assert_eq!(Command::parse("stats"), Ok(Command::Stats));
        assert!(Command::parse("set 1 quality 0").is_err());
        assert!(Command::parse("set 1 quality 101").is_err());
        assert!(Command::parse("set x quality 5").is_err());
        assert!(Command::parse("get all").is_err());
        assert!(Command::parse("reboot").is_err());
    }

    #[test]
    fn set_then_get_reports_new_params() {
        let s = surface(4);
        assert_eq!(s.handle_line("set 1 quality 35"), "ok");
        assert_eq!(s.handle_line("set 1 sampling 444"), "ok");
        assert_eq!(s.handle_line("get 1"), "tile 1 sampling 444 quality 35");
        assert_eq!(s.handle_line("get 0"), "tile 0 sampling 420 quality 80");
    }

    #[test]
    fn set_all_touches_every_tile() {
        let s = surface(3);
        assert_eq!(s.handle_line("set all quality 12"), "ok");
        for n in 0..3 {
            assert!(s.handle_line(&format!("get {n}")).ends_with("quality 12"));
        }
    }

    #[test]
    fn errors_are_replies_not_failures() {
        let s = surface(2);
        assert!(s.handle_line("get 7").starts_with("err "));
        assert!(s.handle_line("set 9 quality 50").starts_with("err "));
        assert!(s.handle_line("bogus").starts_with("err "));
        assert!(s.handle_line("stats").starts_with("frames 0"));
    }

    #[tokio::test]
    async fn connection_survives_bad_commands() {
        let s = surface(2);
        let mock = tokio_test::io::Builder::new()
            .read(b"nonsense\n")
            .write(b"err unknown command: 'nonsense'\n")
            .read(b"set 0 quality 50\n")
            .write(b"ok\n")
            .build();
        s.handle_connection(mock).await.unwrap();
        assert_eq!(s.params.get(0).unwrap().quality, 50);
    }
}
