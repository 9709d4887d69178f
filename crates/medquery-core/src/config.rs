// ── Runtime defaults ──
//
// Values the core consults when building list parameters. Callers
// construct these (usually from `medquery-config`); the core never reads
// files or the environment.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefaults {
    /// Page size for list queries that don't ask for one.
    pub page_size: u32,
    /// Upper bound applied to any requested page size.
    pub max_page_size: u32,
}

impl QueryDefaults {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn clamp_page_size(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_page_size.max(1))
    }
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_range() {
        let defaults = QueryDefaults::default();
        assert_eq!(defaults.clamp_page_size(0), 1);
        assert_eq!(defaults.clamp_page_size(50), 50);
        assert_eq!(defaults.clamp_page_size(500), 100);
    }
}
