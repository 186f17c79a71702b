use std::path::PathBuf;

use clap::Parser;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "mymap-chat")]
#[command(version)]
#[command(about = "Streaming chat client that renders mind-maps and positional graphics inline")]
pub struct Args {
    /// Prompt to send. Without one an interactive session starts.
    pub prompt: Option<String>,

    /// TOML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Server root, e.g. http://localhost:8088
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer credential for the chat server
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Session key used by the server to keep context
    #[arg(long)]
    pub user: Option<String>,

    /// Attach an image to the prompt (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// Write Mermaid sources and positional HTML here
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Print the models offered by the server and exit
    #[arg(long)]
    pub list_models: bool,

    /// Print visual segments as source instead of rendering them
    #[arg(long)]
    pub raw: bool,

    /// Debug-level logging on stderr
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Flags win over file and environment values.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(v) = &self.base_url {
            settings.base_url = v.clone();
        }
        if let Some(v) = &self.api_key {
            settings.api_key = Some(v.clone());
        }
        if let Some(v) = &self.model {
            settings.model = v.clone();
        }
        if let Some(v) = &self.user {
            settings.user = v.clone();
        }
        settings
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "mymap_chat=debug,info"
        } else {
            "warn"
        }
    }
}
