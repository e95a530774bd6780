//! `fulcrum init`: generate a starter configuration file.
//!
//! Creates a YAML, JSON, or TOML config file with either a minimal
//! backend list or every section spelled out with its defaults.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::FulcrumError;

pub fn execute(args: &InitArgs) -> Result<(), FulcrumError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("fulcrum.{}", args.format.extension())));

    if output.exists() {
        return Err(FulcrumError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!("Created {}", output.display());
    Ok(())
}

#[must_use]
pub const fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# Fulcrum config

strategy: weighted

backends:
  - id: server1
    host: localhost
    port: 3001
    weight: 2
  - id: server2
    host: localhost
    port: 3002
"#;

const YAML_FULL: &str = r#"# Fulcrum config
#
# All values shown are defaults unless marked otherwise.

# random | roundrobin | weighted
strategy: weighted

health_check:
  interval_ms: 10000          # Time between probe passes
  timeout_ms: 5000            # Per-probe timeout
  path: /healthcheck          # GET path probed on every backend
  expected_status: 200        # Only this status counts as healthy

affinity:
  enabled: true
  cookie_name: lb-affinity    # Cookie value is the backend id
  max_age_ms: 3600000
  http_only: true
  secure: false

forward:
  timeout_ms: 30000           # Upper bound for one forwarded request

backends:
  - id: server1
    host: localhost
    port: 3001
    weight: 2                 # Default: 1
  - id: server2
    host: localhost
    port: 3002
    weight: 1
  - id: server3
    host: localhost
    port: 3003
    weight: 3
"#;

const JSON_MINIMAL: &str = r#"{
  "strategy": "weighted",
  "backends": [
    { "id": "server1", "host": "localhost", "port": 3001, "weight": 2 },
    { "id": "server2", "host": "localhost", "port": 3002 }
  ]
}
"#;

const JSON_FULL: &str = r#"{
  "strategy": "weighted",
  "health_check": {
    "interval_ms": 10000,
    "timeout_ms": 5000,
    "path": "/healthcheck",
    "expected_status": 200
  },
  "affinity": {
    "enabled": true,
    "cookie_name": "lb-affinity",
    "max_age_ms": 3600000,
    "http_only": true,
    "secure": false
  },
  "forward": {
    "timeout_ms": 30000
  },
  "backends": [
    { "id": "server1", "host": "localhost", "port": 3001, "weight": 2 },
    { "id": "server2", "host": "localhost", "port": 3002, "weight": 1 },
    { "id": "server3", "host": "localhost", "port": 3003, "weight": 3 }
  ]
}
"#;

const TOML_MINIMAL: &str = r#"# Fulcrum config

strategy = "weighted"

[[backends]]
id = "server1"
host = "localhost"
port = 3001
weight = 2

[[backends]]
id = "server2"
host = "localhost"
port = 3002
"#;

const TOML_FULL: &str = r#"# Fulcrum config
#
# All values shown are defaults unless marked otherwise.

# random | roundrobin | weighted
strategy = "weighted"

[health_check]
interval_ms = 10000
timeout_ms = 5000
path = "/healthcheck"
expected_status = 200

[affinity]
enabled = true
cookie_name = "lb-affinity"
max_age_ms = 3600000
http_only = true
secure = false

[forward]
timeout_ms = 30000

[[backends]]
id = "server1"
host = "localhost"
port = 3001
weight = 2

[[backends]]
id = "server2"
host = "localhost"
port = 3002
weight = 1

[[backends]]
id = "server3"
host = "localhost"
port = 3003
weight = 3
"#;
