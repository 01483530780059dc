//! Stockfish opponent over the UCI protocol (async I/O)

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chess_core::Position;
use session_sync::{OpponentError, OpponentMoveSource};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine: {0}")]
    Spawn(String),

    #[error("Engine I/O error: {0}")]
    Io(String),

    #[error("Engine closed its output")]
    Closed,

    #[error("Engine found no move")]
    NoMove,
}

/// One engine process.
pub struct StockfishEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StockfishEngine {
    /// Spawn a new Stockfish process and initialize UCI
    pub async fn new(path: &str) -> Result<Self, EngineError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{path}: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("no stdin pipe".into()))?;
        let stdout = process
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| EngineError::Spawn("no stdout pipe".into()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout,
        };

        engine.send("uci").await?;
        engine.wait_for("uciok").await?;

        engine.send("setoption name Threads value 1").await?;
        engine.send("setoption name Hash value 64").await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;

        Ok(engine)
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Io(format!("write: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Io(format!("flush: {e}")))?;
        Ok(())
    }

    async fn read_line(&mut self, line: &mut String) -> Result<(), EngineError> {
        line.clear();
        let read = self
            .stdout
            .read_line(line)
            .await
            .map_err(|e| EngineError::Io(format!("read: {e}")))?;
        if read == 0 {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        let mut line = String::new();
        loop {
            self.read_line(&mut line).await?;
            let trimmed = line.trim();
            debug!(line = trimmed, "SF >");
            if trimmed == expected {
                return Ok(());
            }
        }
    }

    /// Search a position to `depth` and return the best move in UCI notation.
    pub async fn best_move(&mut self, fen: &str, depth: u32) -> Result<String, EngineError> {
        // A search cut off by a timeout may still be running; stop it and
        // drain its output before starting the next one.
        self.send("stop").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await?;

        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go depth {depth}")).await?;

        let mut line = String::new();
        loop {
            self.read_line(&mut line).await?;
            let trimmed = line.trim();
            if let Some(best) = parse_bestmove(trimmed) {
                debug!(best = ?best, "SF >");
                return best.ok_or(EngineError::NoMove);
            }
        }
    }

    /// Send quit command and wait for process to exit
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.process.wait().await;
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

/// `Some(Some(move))` for a bestmove line, `Some(None)` when the engine has
/// no legal move, `None` for any other line.
fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "bestmove" {
        return None;
    }
    match parts.next() {
        Some("(none)") | Some("0000") | None => Some(None),
        Some(mv) => Some(Some(mv.to_string())),
    }
}

/// A small pool of engine processes shared by every room.
pub struct StockfishOpponent {
    engines: Vec<Mutex<StockfishEngine>>,
    next: AtomicUsize,
}

impl StockfishOpponent {
    pub async fn spawn(path: &str, count: usize) -> Result<Self, EngineError> {
        let mut engines = Vec::with_capacity(count);
        for _ in 0..count.max(1) {
            engines.push(Mutex::new(StockfishEngine::new(path).await?));
        }
        info!(path, engines = engines.len(), "Stockfish engines ready");
        Ok(Self {
            engines,
            next: AtomicUsize::new(0),
        })
    }

    pub async fn shutdown(&self) {
        for engine in &self.engines {
            engine.lock().await.quit().await;
        }
    }
}

#[async_trait]
impl OpponentMoveSource for StockfishOpponent {
    async fn request_move(&self, position: &Position, depth: u32) -> Result<String, OpponentError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.engines.len();
        let mut engine = self.engines[index].lock().await;
        engine
            .best_move(position.as_fen(), depth)
            .await
            .map_err(|e| OpponentError::Engine(e.to_string()))
    }
}
