use clap::{Args, Subcommand};

use super::OutputFormat;
use sheetsync::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn print_optional(name: &str, value: &ConfigValue<Option<String>>) {
    println!("{}: {}", name, value.value.as_deref().unwrap_or("(not set)"));
    println!("  source: {}", value.source);
    println!();
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let config = config.redacted();
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        print_optional("spreadsheet_id", &config.spreadsheet_id);
                        print_optional("ledger_spreadsheet_id", &config.ledger_spreadsheet_id);

                        println!("ledger_sheet: {}", config.ledger_sheet.value);
                        println!("  source: {}", config.ledger_sheet.source);
                        println!();

                        print_optional("access_token", &config.access_token);
                        print_optional("api_key", &config.api_key);

                        println!("port: {}", config.port.value);
                        println!("  source: {}", config.port.source);
                        println!();

                        println!("engine:");
                        print!("{}", serde_yaml::to_string(&config.engine)?);
                        println!();
                        println!("tables: {}", config.tables.len());
                    }
                }
                Ok(())
            }
        }
    }
}
