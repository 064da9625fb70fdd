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

//! Logging facade for the workspace. Crates log through the re-exported
//! macros so the subscriber setup stays in one place.

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub use tracing::{debug, error, info, trace, warn};

static GLOBAL_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for the server process. `level` accepts an
/// `EnvFilter` directive, e.g. `"info"` or `"query=debug,info"`; the
/// `FEDSQL_LOG` environment variable overrides it.
pub fn init_global_logging(level: &str) {
    GLOBAL_INIT.get_or_init(|| {
        let filter = std::env::var("FEDSQL_LOG")
            .ok()
            .and_then(|v| v.parse::<EnvFilter>().ok())
            .unwrap_or_else(|| EnvFilter::new(level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

/// Initialize logging for unit tests. Safe to call from every test; only
/// the first call installs a subscriber.
pub fn init_default_ut_logging() {
    GLOBAL_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}
