// Debug toggle map
//
// One bit per emulated operation id. A set bit suppresses tracing for that
// id; a fresh map traces everything.

use crate::config::types::{PersonalityError, Result, MAX_DEBUG_STR};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

const FIELD: &str = "debug";
const WORD_BITS: usize = u64::BITS as usize;

/// Which ids a debug command applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugTarget {
    All,
    Op(usize),
}

/// Parsed `"<id>.<toggle>"` / `"all.<toggle>"` command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugCommand {
    pub target: DebugTarget,
    pub enable: bool,
}

#[derive(Debug)]
pub struct DebugMap {
    words: Vec<AtomicU64>,
    size: usize,
}

impl DebugMap {
    pub fn new(size: usize) -> Self {
        let words = (0..size.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, size }
    }

    /// Number of operation ids covered
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether tracing is on for `id`. Ids outside the map are never traced.
    pub fn is_enabled(&self, id: usize) -> bool {
        if id >= self.size {
            return false;
        }
        let (word, bit) = locate(id);
        self.words[word].load(Ordering::Relaxed) & bit == 0
    }

    pub fn set(&self, id: usize, enable: bool) -> Result<()> {
        if id >= self.size {
            return Err(PersonalityError::OutOfRange {
                id: id as i64,
                limit: self.size,
            });
        }
        let (word, bit) = locate(id);
        if enable {
            self.words[word].fetch_and(!bit, Ordering::Relaxed);
        } else {
            self.words[word].fetch_or(bit, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn set_all(&self, enable: bool) {
        let fill = if enable { 0 } else { u64::MAX };
        for word in &self.words {
            word.store(fill, Ordering::Relaxed);
        }
    }

    /// Ids with tracing suppressed
    pub fn suppressed_count(&self) -> usize {
        (0..self.size).filter(|&id| !self.is_enabled(id)).count()
    }

    pub fn parse_command(&self, command: &str) -> Result<DebugCommand> {
        if command.len() >= MAX_DEBUG_STR {
            return Err(PersonalityError::TooLong {
                field: FIELD,
                len: command.len(),
                limit: MAX_DEBUG_STR - 1,
            });
        }

        let format_error = || PersonalityError::Format {
            field: FIELD,
            value: command.to_string(),
        };
        let (target, toggle) = command.split_once('.').ok_or_else(format_error)?;
        let enable = parse_number(toggle).ok_or_else(format_error)? != 0;

        let target = if target == "all" {
            DebugTarget::All
        } else {
            let id = parse_number(target).ok_or_else(format_error)?;
            match usize::try_from(id) {
                Ok(id) if id < self.size => DebugTarget::Op(id),
                _ => {
                    return Err(PersonalityError::OutOfRange {
                        id,
                        limit: self.size,
                    })
                }
            }
        };

        Ok(DebugCommand { target, enable })
    }

    pub fn apply(&self, command: DebugCommand) -> Result<()> {
        match command.target {
            DebugTarget::All => self.set_all(command.enable),
            DebugTarget::Op(id) => self.set(id, command.enable)?,
        }
        debug!(
            "Debug tracing {} for {:?}",
            if command.enable { "enabled" } else { "suppressed" },
            command.target
        );
        Ok(())
    }

    /// Parse and apply a command string
    pub fn apply_command(&self, command: &str) -> Result<DebugCommand> {
        let parsed = self.parse_command(command)?;
        self.apply(parsed)?;
        Ok(parsed)
    }
}

fn locate(id: usize) -> (usize, u64) {
    (id / WORD_BITS, 1u64 << (id % WORD_BITS))
}

/// Decimal or `0x` hex, optionally negative
fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            i64::from_str_radix(hex, 16).ok()?
        }
        Some(_) => return None,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse().ok()?
        }
        None => return None,
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DEFAULT_DEBUG_MAP_SIZE;

    #[test]
    fn fresh_map_traces_everything() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        assert_eq!(map.size(), 337);
        assert!(map.is_enabled(0));
        assert!(map.is_enabled(336));
        assert!(!map.is_enabled(337));
        assert_eq!(map.suppressed_count(), 0);
    }

    #[test]
    fn single_id_toggles() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        let cmd = map.apply_command("12.0").unwrap();
        assert_eq!(
            cmd,
            DebugCommand {
                target: DebugTarget::Op(12),
                enable: false
            }
        );
        assert!(!map.is_enabled(12));
        assert!(map.is_enabled(13));

        map.apply_command("12.1").unwrap();
        assert!(map.is_enabled(12));
    }

    #[test]
    fn all_toggles_every_id() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        map.apply_command("all.0").unwrap();
        assert_eq!(map.suppressed_count(), 337);

        map.apply_command("all.1").unwrap();
        assert_eq!(map.suppressed_count(), 0);
    }

    #[test]
    fn hex_ids_and_nonzero_toggles() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        map.apply_command("0x10.0").unwrap();
        assert!(!map.is_enabled(16));
        map.apply_command("16.7").unwrap();
        assert!(map.is_enabled(16));
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        assert!(matches!(
            map.apply_command("337.1"),
            Err(PersonalityError::OutOfRange { id: 337, limit: 337 })
        ));
        assert!(matches!(
            map.apply_command("-1.1"),
            Err(PersonalityError::OutOfRange { id: -1, .. })
        ));
        assert!(map.set(1000, true).is_err());
    }

    #[test]
    fn malformed_commands_are_rejected() {
        let map = DebugMap::new(DEFAULT_DEBUG_MAP_SIZE);
        for bad in ["12", "twelve.1", "12.on", ".1", "12.", "0x.1"] {
            assert!(
                matches!(map.apply_command(bad), Err(PersonalityError::Format { .. })),
                "{bad:?} should be a format error"
            );
        }
        assert!(matches!(
            map.apply_command("00000000000012.1"),
            Err(PersonalityError::TooLong { limit: 15, .. })
        ));
        assert_eq!(map.suppressed_count(), 0);
    }
}
