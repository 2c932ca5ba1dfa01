use std::path::PathBuf;

use clap::Parser;

use gbridge_core::ConfigOverrides;
use gbridge_core::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "gbridge", about = "Gemini API front end for OpenAI-compatible backends")]
pub(crate) struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub(crate) config: PathBuf,
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "GBRIDGE_API_KEY", hide_env_values = true)]
    pub(crate) api_key: Option<String>,
    #[arg(long)]
    pub(crate) base_url: Option<String>,
    #[arg(long)]
    pub(crate) log_level: Option<String>,
}

impl Cli {
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            openai_api_key: self.api_key.clone(),
            openai_base_url: self.base_url.clone(),
            log_level: self.log_level.clone(),
        }
    }
}
