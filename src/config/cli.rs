use crate::config::TomlConfig;
use crate::domain::model::Level;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(name = "service-area-map")]
#[command(about = "Drill-down cluster map for a service-area contractor directory")]
pub struct CliConfig {
    /// TOML config file; flags below override it
    #[arg(long, short)]
    pub config: Option<String>,

    #[arg(long)]
    pub service_areas: Option<String>,

    #[arg(long)]
    pub directory: Option<String>,

    #[arg(long)]
    pub geocoder_endpoint: Option<String>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit JSON log lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Region,
    County,
    City,
}

impl From<LevelArg> for Level {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Region => Level::Region,
            LevelArg::County => Level::County,
            LevelArg::City => Level::City,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the cluster table for one level
    Clusters {
        #[arg(value_enum)]
        level: LevelArg,
        /// Parent slug: region for counties, county for cities
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        featured: bool,
    },
    /// Resolve and de-collide entry positions for a county
    Resolve {
        county: String,
        #[arg(long)]
        featured: bool,
    },
    /// Open the map from a deep link or memento and print the settled frame
    Browse {
        /// Query string such as "region=sun-coast&county=pinellas"
        #[arg(long)]
        link: Option<String>,
        /// Memento file used to restore and record the last county
        #[arg(long)]
        memento: Option<String>,
        /// Jump to the first service area matching this name
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        show_entries: bool,
        #[arg(long)]
        featured: bool,
        /// Leave the map for this city, writing the memento
        #[arg(long)]
        select_city: Option<String>,
    },
}

impl CliConfig {
    /// 合併設定檔與命令列參數，命令列優先
    pub fn resolve(&self) -> Result<TomlConfig> {
        let mut config = match &self.config {
            Some(path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        if let Some(path) = &self.service_areas {
            config.data.service_areas = Some(path.clone());
        }
        if let Some(path) = &self.directory {
            config.data.directory = Some(path.clone());
        }
        if let Some(endpoint) = &self.geocoder_endpoint {
            config.geocoder.endpoint = endpoint.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.resolver.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }
}
