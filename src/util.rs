// Copyright 2020 CoreOS, Inc.
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

use std::io::Write;
use std::process::{Command, Stdio};

use crate::errors::*;

/// Runs the provided command. The first macro argument is the executable, and following arguments
/// are passed to the command. Returns a Result<()> describing whether the command failed. Errors
/// carry the full command and its captured stderr.
#[macro_export]
macro_rules! runcmd {
    ($cmd:expr) => (runcmd!($cmd,));
    ($cmd:expr, $($args:expr),*) => {{
        let mut cmd = std::process::Command::new($cmd);
        $( cmd.arg($args); )*
        $crate::util::cmd_output(&mut cmd).map(|_| ())
    }}
}

/// Runs the provided command and captures its stdout. The first macro argument is the
/// executable, and following arguments are passed to the command. Returns a Result<String>
/// describing whether the command failed, and if not, its standard output. Output is assumed to
/// be UTF-8.
#[macro_export]
macro_rules! runcmd_output {
    ($cmd:expr) => (runcmd_output!($cmd,));
    ($cmd:expr, $($args:expr),*) => {{
        let mut cmd = std::process::Command::new($cmd);
        $( cmd.arg($args); )*
        // NB: cmd_output already prefixes with cmd in all error paths
        $crate::util::cmd_output(&mut cmd)
    }}
}

/// Runs the provided Command object and captures its stdout and stderr. Returns a Result<String>
/// describing whether the command failed, and if not, its standard output. Output is assumed to
/// be UTF-8.
pub fn cmd_output(cmd: &mut Command) -> Result<String> {
    cmd_output_with_input(cmd, None)
}

/// Like cmd_output, but feeds `input` to the child's stdin first.  This is how scripted
/// keystroke sessions are driven.
pub fn cmd_output_with_input(cmd: &mut Command, input: Option<&str>) -> Result<String> {
    let rendered = format!("{:?}", cmd);
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::io(format!("running {}", rendered), e))?;
    // dropping the handle closes the pipe so the child sees EOF
    let write_error = input.and_then(|input| match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input.as_bytes()).err(),
        None => Some(broken_pipe()),
    });
    // reap the child even if it stopped reading early; its stderr says why
    let result = child
        .wait_with_output()
        .map_err(|e| Error::io(format!("waiting for {}", rendered), e))?;
    if !result.status.success() {
        return Err(Error::Tool {
            command: rendered,
            status: result.status,
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }
    if let Some(e) = write_error {
        return Err(Error::io(format!("writing to stdin of {}", rendered), e));
    }
    String::from_utf8(result.stdout).map_err(|e| {
        Error::io(
            format!("decoding as UTF-8 output of {}", rendered),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

fn broken_pipe() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin not captured")
}
