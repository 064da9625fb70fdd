// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use common_telemetry::{error, info};
use servers::config::FedSqlConfig;

#[derive(Parser)]
#[command(name = "fedsql", about = "Federated SQL engine server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "fedsql.toml")]
    config: String,

    /// Listen address, overriding the configuration file.
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match FedSqlConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config);
            std::process::exit(1);
        }
    };
    common_telemetry::init_global_logging(&config.server.log_level);

    let addr = args.addr.unwrap_or_else(|| config.server.addr.clone());
    info!("starting fedsql with config {}", args.config);

    let instance = match servers::bootstrap(&config).await {
        Ok(instance) => instance,
        Err(e) => {
            error!("bootstrap failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = servers::http::serve(instance, &addr).await {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
