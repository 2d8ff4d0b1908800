use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "flowcollector", about = "NetFlow v5/v9 and IPFIX collector")]
pub struct Opt {
    /// Configuration file (toml, ini, yaml or json)
    #[structopt(short, long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[structopt(long)]
    pub host: Option<String>,

    /// UDP port to listen on
    #[structopt(short, long)]
    pub port: Option<u16>,

    /// Log at debug level
    #[structopt(short, long)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Log {
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Log { level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Listener {
    pub host: String,
    pub port: u16,
    pub recv_buffer: usize, // Largest datagram accepted, in bytes
}

impl Default for Listener {
    fn default() -> Self {
        Listener { host: "0.0.0.0".to_string(), port: 2055, recv_buffer: 65535 }
    }
}

impl Listener {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Exporter {
    pub queue_depth: usize,       // Datagrams waiting for one exporter worker
    pub template_buffer: usize,   // Data sets held per exporter while their template is unknown
    pub idle_timeout_secs: u64,   // Exporter state is dropped after this long without packets
    pub sweep_interval_secs: u64, // Period of the idle sweep and statistics report
}

impl Default for Exporter {
    fn default() -> Self {
        Exporter { queue_depth: 1024, template_buffer: 8, idle_timeout_secs: 1800, sweep_interval_secs: 60 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Json,
    Gzip,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Sink {
    pub kind: SinkKind,
    pub directory: PathBuf,
    pub rotate_secs: u64,
    pub queue_depth: usize,
}

impl Default for Sink {
    fn default() -> Self {
        Sink { kind: SinkKind::Log, directory: PathBuf::from("./flows"), rotate_secs: 300, queue_depth: 4096 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Filter {
    pub cidr_blocks: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Upload {
    pub url: Option<String>,        // Receives every finished gzip file
    pub filter_url: Option<String>, // Lists the cidr blocks, read at start and after every finished file
    pub auth_token: String,         // Sent as the Authorization header
    pub client_id: String,
    pub retries: u32,
    pub backoff_ms: u64, // Retry n waits n times this long
    pub timeout_secs: u64,
}

impl Default for Upload {
    fn default() -> Self {
        Upload {
            url: None,
            filter_url: None,
            auth_token: String::new(),
            client_id: String::new(),
            retries: 3,
            backoff_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl Upload {
    pub fn enabled(&self) -> bool {
        self.url.is_some() || self.filter_url.is_some()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub log: Log,
    pub listener: Listener,
    pub exporter: Exporter,
    pub sink: Sink,
    pub filter: Filter,
    pub upload: Upload,
}

fn environment() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("filter.cidr_blocks")
}

impl Settings {
    /// Defaults, then the optional file, then `APP__SECTION__KEY` environment variables.
    pub fn init(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::build(config_file, environment())
    }

    fn build(config_file: Option<PathBuf>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        builder.add_source(env).build()?.try_deserialize()
    }

    /// Command line flags win over every other source.
    pub fn apply(&mut self, opt: &Opt) {
        if let Some(host) = &opt.host {
            self.listener.host = host.clone();
        }
        if let Some(port) = opt.port {
            self.listener.port = port;
        }
        if opt.debug {
            self.log.level = "debug".to_string();
        }
    }
}
