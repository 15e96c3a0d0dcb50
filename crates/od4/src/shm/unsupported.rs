// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Placeholder for targets without process-shared pthread primitives.
//! No value of these types can be constructed.

use crate::error::{Error, Result};
use crate::time::TimeStamp;
use std::convert::Infallible;
use std::time::Duration;

#[derive(Debug)]
pub struct SharedMemory {
    never: Infallible,
}

impl SharedMemory {
    pub fn create(_name: &str, _size: usize) -> Result<Self> {
        Err(Error::Unsupported)
    }

    pub fn open(_name: &str) -> Result<Self> {
        Err(Error::Unsupported)
    }

    pub fn new(_name: &str, _size: usize) -> Result<Self> {
        Err(Error::Unsupported)
    }

    pub fn unlink(_name: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn exists(_name: &str) -> bool {
        false
    }

    pub fn name(&self) -> &str {
        match self.never {}
    }

    pub fn size(&self) -> usize {
        match self.never {}
    }

    pub fn valid(&self) -> bool {
        match self.never {}
    }

    pub fn is_creator(&self) -> bool {
        match self.never {}
    }

    pub fn is_locked(&self) -> bool {
        match self.never {}
    }

    pub fn lock(&self) -> Result<SharedMemoryGuard<'_>> {
        match self.never {}
    }

    pub fn read_data(&self) -> Result<Vec<u8>> {
        match self.never {}
    }

    pub fn write_data(&self, _bytes: &[u8]) -> Result<()> {
        match self.never {}
    }

    pub fn timestamp(&self) -> Result<TimeStamp> {
        match self.never {}
    }

    pub fn set_timestamp(&self, _ts: TimeStamp) -> Result<()> {
        match self.never {}
    }

    pub fn wait(&self) -> Result<()> {
        match self.never {}
    }

    pub fn notify_all(&self) -> Result<()> {
        match self.never {}
    }
}

pub struct SharedMemoryGuard<'a> {
    memory: &'a SharedMemory,
}

impl SharedMemoryGuard<'_> {
    pub fn read_data(&self) -> Vec<u8> {
        match self.memory.never {}
    }

    pub fn write_data(&mut self, _bytes: &[u8]) -> Result<()> {
        match self.memory.never {}
    }

    pub fn timestamp(&self) -> TimeStamp {
        match self.memory.never {}
    }

    pub fn set_timestamp(&mut self, _ts: TimeStamp) {
        match self.memory.never {}
    }

    pub fn size(&self) -> usize {
        match self.memory.never {}
    }

    pub fn wait(&self) -> Result<()> {
        match self.memory.never {}
    }

    pub fn wait_timeout(&self, _timeout: Duration) -> Result<bool> {
        match self.memory.never {}
    }

    pub fn notify_all(&self) -> Result<()> {
        match self.memory.never {}
    }

    pub fn unlock(self) -> Result<()> {
        match self.memory.never {}
    }
}
