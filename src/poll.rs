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

//! Bounded wait-with-nudge.
//!
//! After the partition table is rewritten, the kernel and udev take a while
//! to catch up.  Nothing that mutates a table is considered done until a
//! `Retry` has seen the result.

use std::thread::sleep;
use std::time::Duration;

use crate::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    attempts: u32,
    interval: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl Retry {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// No sleeping between attempts.  Mostly useful for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Evaluate `test` right away; while it is false, wait one interval,
    /// run `nudge` if given, and try again.  After `attempts` waits with
    /// `test` still false, fail with `Error::Timeout`.
    pub fn pause_until_true<T>(
        &self,
        what: &str,
        mut test: T,
        mut nudge: Option<&mut dyn FnMut()>,
    ) -> Result<()>
    where
        T: FnMut() -> bool,
    {
        if test() {
            return Ok(());
        }
        for _ in 0..self.attempts {
            if !self.interval.is_zero() {
                sleep(self.interval);
            }
            if let Some(nudge) = nudge.as_mut() {
                nudge();
            }
            if test() {
                return Ok(());
            }
        }
        Err(Error::Timeout {
            attempts: self.attempts,
            what: what.to_string(),
        })
    }
}
