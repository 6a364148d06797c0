use clap::Args;
use sheetsync_core::Registry;

use super::OutputFormat;

/// List configured table mappings
#[derive(Debug, Args)]
pub struct TablesCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl TablesCommand {
    pub fn run(&self, registry: &Registry) -> Result<(), Box<dyn std::error::Error>> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(registry.all())?),
            OutputFormat::Text => {
                if registry.is_empty() {
                    println!("No tables configured. Add a `tables:` section to the config file.");
                    return Ok(());
                }
                for mapping in registry.all() {
                    println!(
                        "{}{} <- {} ({})",
                        mapping.sheet_name(),
                        if mapping.is_enabled() { "" } else { " [disabled]" },
                        mapping.source_table(),
                        mapping.direction()
                    );
                    println!(
                        "  key: {}  max_records: {}  batch_size: {}",
                        mapping.primary_key(),
                        mapping.max_records(),
                        mapping.batch_size()
                    );
                    println!("  columns: {}", mapping.header_row().join(", "));
                }
            }
        }
        Ok(())
    }
}
