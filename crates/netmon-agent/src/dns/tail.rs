// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Polling tailer for the dnsmasq log.
//!
//! The file is opened at its end on startup. Every tick the tailer checks
//! whether the path now names a different inode (log rotation) or the file
//! shrank (truncation) and, if so, reopens it from the start. Complete lines
//! are pushed into the `dns_lines` mailbox; a trailing partial line is kept
//! until its newline arrives.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::TAIL_POLL_INTERVAL;
use crate::mailbox::Mailbox;

pub struct Tailer {
    path: PathBuf,
    out: Mailbox<String>,
    file: Option<OpenFile>,
    // Set once the first open attempt has happened; later opens start at offset 0.
    started: bool,
}

struct OpenFile {
    reader: BufReader<File>,
    inode: u64,
    position: u64,
    // Raw bytes so a multi-byte character split across reads decodes intact.
    partial: Vec<u8>,
}

impl Tailer {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, out: Mailbox<String>) -> Self {
        Tailer {
            path: path.into(),
            out,
            file: None,
            started: false,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TAIL_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll();
                }
            }
        }
        debug!("Stopped tailing {}", self.path.display());
    }

    /// One polling step: handles rotation, then forwards every complete line.
    /// Returns the number of lines forwarded (including dropped ones).
    pub fn poll(&mut self) -> usize {
        if !self.started {
            self.started = true;
            self.open(true);
            return 0;
        }
        if self.file.is_none() || self.rotated() {
            self.open(false);
        }
        self.read_lines()
    }

    fn open(&mut self, at_end: bool) {
        self.file = None;
        let opened = File::open(&self.path).and_then(|mut file| {
            let metadata = file.metadata()?;
            let position = if at_end {
                file.seek(SeekFrom::End(0))?
            } else {
                0
            };
            Ok(OpenFile {
                reader: BufReader::new(file),
                inode: metadata.ino(),
                position,
                partial: Vec::new(),
            })
        });
        match opened {
            Ok(file) => {
                debug!(
                    "Tailing {} from offset {}",
                    self.path.display(),
                    file.position
                );
                self.file = Some(file);
            }
            Err(e) => debug!("Cannot open {}: {}", self.path.display(), e),
        }
    }

    fn rotated(&self) -> bool {
        let Some(file) = &self.file else {
            return false;
        };
        match fs::metadata(&self.path) {
            Ok(metadata) => metadata.ino() != file.inode || metadata.len() < file.position,
            // Renamed away and not recreated yet: keep draining the old handle.
            Err(_) => false,
        }
    }

    fn read_lines(&mut self) -> usize {
        let Some(file) = self.file.as_mut() else {
            return 0;
        };
        let mut forwarded = 0;
        loop {
            let mut buf = Vec::new();
            match file.reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    file.position += n as u64;
                    file.partial.extend_from_slice(&buf);
                    if !buf.ends_with(b"\n") {
                        break;
                    }
                    let raw = std::mem::take(&mut file.partial);
                    // Invalid UTF-8 is replaced rather than rejected.
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    self.out.try_send(line);
                    forwarded += 1;
                }
                Err(e) => {
                    // Keep the handle and offset; the next tick retries from here.
                    warn!("Failed reading {}: {}", self.path.display(), e);
                    break;
                }
            }
        }
        forwarded
    }
}
