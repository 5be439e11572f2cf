// Copyright 2026 The fofta Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Failure kinds raised by the partition-table engine.
//!
//! Callers are expected to branch on the variant, not on the message.

use std::path::PathBuf;
use std::process::ExitStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("cannot classify {}: {reason}", .path.display())]
    Misclassified { path: PathBuf, reason: String },
    #[error("couldn't read partition table of {}: {detail}", .path.display())]
    TableUnreadable { path: PathBuf, detail: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("partition #{partno}: start sector {start} is not before end sector {end}")]
    StartEndInverted { partno: u32, start: u64, end: u64 },
    #[error("cannot create partition #{partno} on {}: partition #{missing} does not exist", .disk.display())]
    MissingPriorPartition {
        disk: PathBuf,
        partno: u32,
        missing: u32,
    },
    #[error("cannot create partition #{partno} on {}: it exists already", .disk.display())]
    ExistentPriorPartition { disk: PathBuf, partno: u32 },
    #[error("cannot create logical partition #{partno} on {}: no extended partition", .disk.display())]
    NeedExtendedPartition { disk: PathBuf, partno: u32 },
    #[error("partitions on {} overlap: {detail}", .disk.display())]
    PartitionsOverlap { disk: PathBuf, detail: String },
    #[error("partition #{partno} was not created on {}{}", .disk.display(), suffix(.detail))]
    NotCreated {
        disk: PathBuf,
        partno: u32,
        /// What the tool printed, if it complained.
        detail: Option<String>,
    },
    #[error("cannot delete logical partition #{partno} on {}: partition #{} exists", .disk.display(), .partno + 1)]
    ChainOrder { disk: PathBuf, partno: u32 },
    #[error("partition #{partno} was not deleted from {}{}", .disk.display(), suffix(.detail))]
    NotDeleted {
        disk: PathBuf,
        partno: u32,
        detail: Option<String>,
    },
    #[error("\"{0}\" is not a valid disk identifier")]
    IdentityFormat(String),
    #[error("setting identifier of {} to {wanted} failed; found {found}", .disk.display())]
    IdentitySet {
        disk: PathBuf,
        wanted: String,
        found: String,
    },
    #[error("reading {attribute} of partition #{partno} on {}: {detail}", .disk.display())]
    AttributeRead {
        disk: PathBuf,
        partno: u32,
        attribute: &'static str,
        detail: String,
    },
    #[error("writing {attribute} of partition #{partno} on {}: {detail}", .disk.display())]
    AttributeWrite {
        disk: PathBuf,
        partno: u32,
        attribute: &'static str,
        detail: String,
    },
    #[error("reordering partition table of {}: {detail}", .disk.display())]
    Reorder { disk: PathBuf, detail: String },
    #[error("timed out after {attempts} attempts waiting for {what}")]
    Timeout { attempts: u32, what: String },
    #[error("{command} failed with {status}: {stderr}")]
    Tool {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Captured stderr of a failed tool run, or the message of any other
    /// error.  Used to fold tool failures into the more specific kinds.
    pub(crate) fn detail(&self) -> String {
        match self {
            Self::Tool { stderr, .. } => stderr.trim().to_string(),
            other => other.to_string(),
        }
    }
}
