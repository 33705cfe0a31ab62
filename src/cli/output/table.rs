//! Table output formatting for CLI commands
//!
//! Chain summaries rendered with comfy-table, color-coded unless the terminal
//! or `NO_COLOR` says otherwise.

use crate::domain::models::ChainState;
use crate::domain::ports::ChainStatus;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    /// Create a new table formatter
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    /// Create a new table formatter with custom settings
    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Format the final state of every chain
    pub fn format_chains(&self, chains: &[ChainStatus]) -> String {
        let mut table = self.create_base_table();

        table.set_header(vec![
            Cell::new("Chain").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Samples").add_attribute(Attribute::Bold),
            Cell::new("Restarts").add_attribute(Attribute::Bold),
        ]);

        for chain in chains {
            let state_cell = if self.use_colors {
                Cell::new(chain.state.to_string()).fg(state_color(chain.state))
            } else {
                Cell::new(chain.state.to_string())
            };

            table.add_row(vec![
                Cell::new(chain.chain.to_string()),
                state_cell,
                Cell::new(chain.samples.to_string()),
                Cell::new(chain.restarts.to_string()),
            ]);
        }

        table.to_string()
    }

    /// Create a base table with common settings
    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

const fn state_color(state: ChainState) -> Color {
    match state {
        ChainState::Starting => Color::Yellow,
        ChainState::Running => Color::Green,
        ChainState::Exited(0) => Color::Cyan,
        ChainState::Exited(_) => Color::Red,
        ChainState::Killed => Color::Grey,
    }
}

fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ChainId;

    #[test]
    fn test_format_chains_plain() {
        let formatter = TableFormatter::with_config(false, Some(80));
        let table = formatter.format_chains(&[
            ChainStatus {
                chain: ChainId(0),
                state: ChainState::Killed,
                samples: 6800,
                restarts: 0,
            },
            ChainStatus {
                chain: ChainId(1),
                state: ChainState::Exited(1),
                samples: 6712,
                restarts: 2,
            },
        ]);

        assert!(table.contains("chain1"));
        assert!(table.contains("chain2"));
        assert!(table.contains("6712"));
        assert!(table.contains("Restarts"));
    }
}
