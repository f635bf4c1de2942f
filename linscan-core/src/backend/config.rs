//! Target Configuration
//!
//! Describes the register file and calling convention the allocator works
//! against. The default makes every general purpose register except `%rsp`
//! and `%rbp` available, and has calls clobber all of them.
//!
//! # Configuration File Format
//! ```json
//! {
//!   "allocatable": ["A", "B", "C"],
//!   "caller_saved": ["A", "B", "C", "D", "Si", "Di", "R8", "R9", "R10", "R11", "R12", "R13", "R14", "R15"],
//!   "frame_base": "Bp",
//!   "stack_pointer": "Sp",
//!   "slot_size": 8,
//!   "frame_alignment": 16
//! }
//! ```

use crate::backend::error::BackendError;
use crate::backend::registers::Amd64Register;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Register file and ABI description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Registers the allocator may assign, in preference order.
    pub allocatable: Vec<Amd64Register>,
    /// Registers a call may overwrite; values live across a call cannot stay in them.
    pub caller_saved: Vec<Amd64Register>,
    /// Register spill slots are addressed relative to.
    pub frame_base: Amd64Register,
    pub stack_pointer: Amd64Register,
    /// Size of one spill slot in bytes.
    pub slot_size: u32,
    /// Alignment of the activation record in bytes.
    pub frame_alignment: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            allocatable: Amd64Register::ALLOCATABLE.to_vec(),
            caller_saved: Amd64Register::ALLOCATABLE.to_vec(),
            frame_base: Amd64Register::Bp,
            stack_pointer: Amd64Register::Sp,
            slot_size: 8,
            frame_alignment: 16,
        }
    }
}

impl TargetConfig {
    /// The default configuration restricted to `allocatable`.
    pub fn with_allocatable(allocatable: &[Amd64Register]) -> Self {
        Self {
            allocatable: allocatable.to_vec(),
            ..Self::default()
        }
    }

    /// Check the configuration can be allocated against.
    ///
    /// # Errors
    /// Returns `BackendError::InvalidConfig` when no register is allocatable,
    /// a reserved register is allocatable or caller-saved, a register is
    /// listed twice, or the slot size does not divide the frame alignment.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.allocatable.is_empty() {
            return Err(BackendError::invalid_config("no allocatable registers"));
        }
        if let Some(register) = self
            .allocatable
            .iter()
            .find(|register| **register == self.frame_base || **register == self.stack_pointer)
        {
            return Err(BackendError::invalid_config(format!("{} is reserved", register)));
        }
        if let Some(register) = self
            .caller_saved
            .iter()
            .find(|register| **register == self.frame_base || **register == self.stack_pointer)
        {
            return Err(BackendError::invalid_config(format!("{} is reserved and cannot be caller-saved", register)));
        }
        for (index, register) in self.allocatable.iter().enumerate() {
            if self.allocatable[..index].contains(register) {
                return Err(BackendError::invalid_config(format!("{} is listed twice", register)));
            }
        }
        if self.slot_size == 0 || self.frame_alignment % self.slot_size != 0 {
            return Err(BackendError::invalid_config(format!(
                "slot size {} does not divide frame alignment {}",
                self.slot_size, self.frame_alignment
            )));
        }
        Ok(())
    }

    /// Whether `register` may be handed out by the allocator.
    #[inline]
    pub fn is_allocatable(&self, register: Amd64Register) -> bool {
        self.allocatable.contains(&register)
    }

    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TargetConfig = serde_json::from_str(json).context("Failed to parse target configuration")?;
        config.validate().context("Target configuration is invalid")?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target configuration {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Failed to load {}", path.display()))
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("Failed to serialize target configuration")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
