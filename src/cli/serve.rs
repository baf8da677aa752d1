//! Live viewer command.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ops::SessionOptions;
use crate::registry::ProjectRegistry;
use crate::storage::Storage;
use crate::viewer;

use super::CommonOptions;

pub struct ServeOptions {
    pub port: u16,
    pub common: CommonOptions,
}

pub fn run(options: ServeOptions) -> Result<()> {
    let common = options.common;
    let root = Config::resolve_root(common.config_dir.as_deref())?;
    let config = Config::load(&root)?;

    let storage = Storage::from_config(&config);
    storage.init()?;
    let registry = ProjectRegistry::load(&storage.registry_file())?;
    let current = match &common.project {
        Some(name) => registry.get_by_name(name).cloned(),
        None => registry.resolve(&std::env::current_dir()?).cloned(),
    };

    if !common.quiet && !common.json {
        println!("Viewer listening on http://127.0.0.1:{}", options.port);
        if let Some(entry) = &current {
            println!("Current project: {}", entry.name);
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| Error::OperationFailed(format!("failed to start runtime: {err}")))?;
    let session_options = SessionOptions {
        agent_id: common.agent_id,
        no_notify: common.no_notify,
    };
    runtime.block_on(viewer::serve(config, session_options, options.port, current))
}
