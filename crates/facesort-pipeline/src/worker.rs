//! Line-oriented JSON protocol between the scheduler and worker processes.
//!
//! On start the child announces the parameter fingerprint it recognizes
//! with (`WorkerHello`). The parent then writes one `WorkerRequest` per line
//! and the child answers each with one `WorkerResponse` line, until its stdin
//! is closed. Workers live for the whole run.

use crate::recognizer::Recognizer;
use crate::scheduler::recognize_guarded;
use facesort_core::RecognitionOutcome;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// First line a worker writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub params_fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub index: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub index: usize,
    pub outcome: RecognitionOutcome,
}

/// Answer requests from `input` until EOF. Returns the number served.
///
/// A malformed request line is a protocol error and ends the worker.
pub fn serve<R: BufRead, W: Write>(recognizer: &Recognizer, input: R, mut output: W) -> io::Result<usize> {
    let hello = WorkerHello {
        params_fingerprint: recognizer.params_fingerprint(),
    };
    serde_json::to_writer(&mut output, &hello)?;
    output.write_all(b"\n")?;
    output.flush()?;

    let mut served = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = serde_json::from_str(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let response = WorkerResponse {
            index: request.index,
            outcome: recognize_guarded(recognizer, &request.path),
        };
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
        served += 1;
    }
    tracing::debug!(served, "worker input closed");
    Ok(served)
}
