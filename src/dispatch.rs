//! Facade tying process configuration, mirror groups, and the worker
//! orchestrator together (spec §4.1, `GetAgentsController`/`configure`
//! equivalent).

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{self, AgentDesc};
use crate::config::GlobalConfig;
use crate::connection::AgentConnection;
use crate::dashboard::{DashboardStorage, HostDashboard};
use crate::error::{Error, Result};
use crate::mirror::MirrorGroup;
use crate::protocol::{ReplyParser, RequestBuilder};
use crate::worker::{self, DispatchConfig};

/// Owns the process-wide dashboard intern table and the configuration
/// every parsed group inherits.
pub struct Dispatcher {
    storage: DashboardStorage,
    config: GlobalConfig,
}

impl Dispatcher {
    pub fn new(config: GlobalConfig) -> Dispatcher {
        Dispatcher {
            storage: DashboardStorage::new(),
            config,
        }
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Parses one agent spec string into a ready `MirrorGroup` (spec §6),
    /// resolving addresses and registering each mirror's dashboard.
    pub fn configure_group(&self, spec: &str, default_index: &str) -> Result<MirrorGroup> {
        let (parsed, options) = agent::configure_mirror_set(spec, default_index)
            .map_err(Error::Config)?;
        if parsed.is_empty() {
            return Err(Error::EmptyMirrorGroup);
        }

        let mirrors: Vec<AgentDesc> = parsed.into_iter()
            .map(|p| {
                agent::validate_and_add_dashboard(p,
                                                   self.config.hostname_lookup,
                                                   &self.storage,
                                                   self.config.karma_period_secs,
                                                   self.config.persistent_pool_capacity)
            })
            .collect();

        Ok(MirrorGroup::new(mirrors,
                             options.strategy,
                             self.config.karma_period_secs,
                             options.retry_count,
                             options.retry_count_multiplier))
    }

    /// Parses every spec in `specs` into its own group (one dispatch call
    /// typically fans out to many logical agents at once).
    pub fn configure_groups(&self, specs: &[&str], default_index: &str) -> Result<Vec<MirrorGroup>> {
        specs.iter().map(|spec| self.configure_group(spec, default_index)).collect()
    }

    /// Dispatches `groups` on a single worker thread, multiplexing every
    /// attempt over one poller (spec §4.7 "Sequential").
    pub fn dispatch(&self,
                     groups: &[MirrorGroup],
                     builder: &dyn RequestBuilder,
                     parser: &dyn ReplyParser,
                     timeout: Duration,
                     retry_delay: Duration)
                     -> Vec<AgentConnection> {
        let config = DispatchConfig {
            timeout,
            retry_delay,
            max_packet_size: self.config.max_packet_size,
        };
        worker::run_sequential(groups, builder, parser, &config)
    }

    /// Dispatches `groups` across `thread_count` worker threads, each
    /// pulling whole groups off a shared queue (spec §4.7 "Parallel").
    pub fn dispatch_parallel(&self,
                              thread_count: usize,
                              groups: Vec<MirrorGroup>,
                              builder: Arc<dyn RequestBuilder>,
                              parser: Arc<dyn ReplyParser>,
                              timeout: Duration,
                              retry_delay: Duration)
                              -> Vec<AgentConnection> {
        let config = DispatchConfig {
            timeout,
            retry_delay,
            max_packet_size: self.config.max_packet_size,
        };
        worker::run_parallel(thread_count, Arc::new(groups), builder, parser, config)
    }

    /// Every dashboard currently interned, for a ping sweep or shutdown.
    pub fn active_dashboards(&self) -> Vec<Arc<HostDashboard>> {
        self.storage.active_dashes()
    }
}
